//! Transport Factory
//!
//! The port registry never constructs transports itself; it asks a
//! [`PortConnector`] for an opened handle. Production uses
//! [`SerialPortConnector`], tests inject a mock.

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tracing::debug;

use super::serial::{SerialTransport, SerialTransportConfig};
use super::traits::{Transport, TransportError};

/// Opens a connected transport for a port path
#[async_trait]
pub trait PortConnector: Send + Sync + fmt::Debug {
    /// Open and connect a transport for `path`
    async fn open(&self, path: &str) -> Result<Box<dyn Transport>, TransportError>;
}

/// Connector for serial relay boards using the fixed 9600 8N1 profile
#[derive(Debug, Clone)]
pub struct SerialPortConnector {
    read_timeout: Duration,
    write_timeout: Duration,
}

impl SerialPortConnector {
    /// Create a connector with per-operation read/write timeouts
    pub fn new(read_timeout: Duration, write_timeout: Duration) -> Self {
        Self {
            read_timeout,
            write_timeout,
        }
    }
}

impl Default for SerialPortConnector {
    fn default() -> Self {
        Self::new(Duration::from_millis(1000), Duration::from_millis(1000))
    }
}

#[async_trait]
impl PortConnector for SerialPortConnector {
    async fn open(&self, path: &str) -> Result<Box<dyn Transport>, TransportError> {
        let config =
            SerialTransportConfig::relay_profile(path, self.read_timeout, self.write_timeout);
        let mut transport = SerialTransport::new(config)?;
        transport.connect().await?;
        debug!("Serial connector opened {}", path);
        Ok(Box::new(transport))
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_serial_connector_surfaces_open_failure() {
        let connector = SerialPortConnector::default();
        let err = connector.open("/dev/does-not-exist-relay").await.unwrap_err();
        assert!(matches!(err, TransportError::ConnectionFailed(_)));
    }

    #[tokio::test]
    async fn test_serial_connector_rejects_empty_path() {
        let connector = SerialPortConnector::default();
        let err = connector.open("").await.unwrap_err();
        assert!(matches!(err, TransportError::ConfigError(_)));
    }
}
