//! Serial Transport Implementation
//!
//! Relay boards hang off USB-serial adapters and all use the same line
//! profile: 9600 baud, 8 data bits, no parity, 1 stop bit.

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tokio_serial::{SerialPort, SerialPortBuilderExt, SerialStream};
use tracing::{debug, error, info, warn};

use common::hex::{format_hex_pretty, printable};

use super::traits::{ConnectionState, Transport, TransportError, TransportStats};

/// Fixed relay-board baud rate
pub const RELAY_BAUD_RATE: u32 = 9600;

/// Serial port path and I/O deadlines; the line settings are fixed
#[derive(Debug, Clone)]
pub struct SerialTransportConfig {
    /// Serial port path (e.g., "/dev/ttyUSB0", "COM1")
    pub port: String,
    /// Read timeout for individual operations
    pub read_timeout: Duration,
    /// Write timeout for individual operations
    pub write_timeout: Duration,
}

impl SerialTransportConfig {
    /// Relay board profile for the given port path
    pub fn relay_profile(
        port: impl Into<String>,
        read_timeout: Duration,
        write_timeout: Duration,
    ) -> Self {
        Self {
            port: port.into(),
            read_timeout,
            write_timeout,
        }
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.port.is_empty() {
            return Err(TransportError::ConfigError(
                "Port path cannot be empty".to_string(),
            ));
        }

        if self.read_timeout.is_zero() || self.write_timeout.is_zero() {
            return Err(TransportError::ConfigError(
                "Read and write timeouts must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

/// Serial transport implementation
#[derive(Debug)]
pub struct SerialTransport {
    config: SerialTransportConfig,
    connection: Option<SerialStream>,
    stats: TransportStats,
}

impl SerialTransport {
    /// Create new serial transport with configuration
    pub fn new(config: SerialTransportConfig) -> Result<Self, TransportError> {
        config.validate()?;

        Ok(Self {
            config,
            connection: None,
            stats: TransportStats::new(),
        })
    }

    /// Drop the stream after an I/O failure so `is_connected` reports the truth
    fn mark_broken(&mut self) {
        self.connection = None;
        self.stats.connection_state = ConnectionState::Error;
    }
}

#[async_trait]
impl Transport for SerialTransport {
    fn transport_type(&self) -> &str {
        "serial"
    }

    fn endpoint(&self) -> &str {
        &self.config.port
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        self.stats.record_connection_attempt();
        debug!("Opening serial port: {}", self.config.port);

        let port_result = tokio_serial::new(&self.config.port, RELAY_BAUD_RATE)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .timeout(self.config.read_timeout)
            .open_native_async();

        match port_result {
            Ok(port) => {
                #[cfg(unix)]
                let port = {
                    let mut port = port;
                    port.set_exclusive(false).map_err(|e| {
                        TransportError::IoError(format!("Failed to set exclusive mode: {e}"))
                    })?;
                    port
                };

                self.connection = Some(port);
                self.stats.record_successful_connection();
                info!("Opened serial port {}", self.config.port);
                Ok(())
            },
            Err(e) => {
                let error_msg = format!("Failed to open serial port {}: {e}", self.config.port);
                error!("{error_msg}");
                self.stats.record_failed_connection();
                Err(TransportError::ConnectionFailed(error_msg))
            },
        }
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        if self.connection.take().is_some() {
            // Serial port is closed when the stream is dropped
            self.stats.record_disconnection();
            info!("Closed serial port {}", self.config.port);
        }
        Ok(())
    }

    async fn send(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let write_timeout = self.config.write_timeout;
        let Some(port) = self.connection.as_mut() else {
            return Err(TransportError::SendFailed(
                "Serial port not connected".to_string(),
            ));
        };

        let send_operation = async {
            port.write_all(data).await?;
            port.flush().await?;
            Ok::<_, std::io::Error>(data.len())
        };

        match timeout(write_timeout, send_operation).await {
            Ok(Ok(bytes_sent)) => {
                self.stats.record_bytes_sent(bytes_sent);
                debug!(
                    hex_data = %format_hex_pretty(data),
                    ascii = %printable(data),
                    length = bytes_sent,
                    direction = "send",
                    "[Serial] {} raw packet",
                    self.config.port
                );
                Ok(bytes_sent)
            },
            Ok(Err(e)) => {
                let error_msg = format!("Failed to send data on {}: {e}", self.config.port);
                error!("{error_msg}");
                self.mark_broken();
                Err(TransportError::SendFailed(error_msg))
            },
            Err(_) => {
                let error_msg = format!("Send on {} timed out after {write_timeout:?}", self.config.port);
                warn!("{error_msg}");
                Err(TransportError::Timeout(error_msg))
            },
        }
    }

    async fn receive(
        &mut self,
        buffer: &mut [u8],
        timeout_duration: Option<Duration>,
    ) -> Result<usize, TransportError> {
        let receive_timeout = timeout_duration.unwrap_or(self.config.read_timeout);
        let Some(port) = self.connection.as_mut() else {
            return Err(TransportError::ReceiveFailed(
                "Serial port not connected".to_string(),
            ));
        };

        match timeout(receive_timeout, port.read(buffer)).await {
            Ok(Ok(bytes_read)) => {
                if bytes_read > 0 {
                    self.stats.record_bytes_received(bytes_read);
                    debug!(
                        hex_data = %format_hex_pretty(&buffer[..bytes_read]),
                        ascii = %printable(&buffer[..bytes_read]),
                        length = bytes_read,
                        direction = "recv",
                        "[Serial] {} raw packet",
                        self.config.port
                    );
                }
                Ok(bytes_read)
            },
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::TimedOut => {
                // Driver-level read timeout, same meaning as the deadline below
                Err(TransportError::Timeout(format!(
                    "No data on {} within {receive_timeout:?}",
                    self.config.port
                )))
            },
            Ok(Err(e)) => {
                let error_msg = format!("Failed to receive data on {}: {e}", self.config.port);
                error!("{error_msg}");
                self.mark_broken();
                Err(TransportError::ReceiveFailed(error_msg))
            },
            Err(_) => Err(TransportError::Timeout(format!(
                "No data on {} within {receive_timeout:?}",
                self.config.port
            ))),
        }
    }

    async fn clear_input(&mut self) -> Result<(), TransportError> {
        if let Some(port) = self.connection.as_mut() {
            port.clear(tokio_serial::ClearBuffer::Input).map_err(|e| {
                TransportError::IoError(format!(
                    "Failed to clear input buffer on {}: {e}",
                    self.config.port
                ))
            })?;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    fn stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    fn config(port: &str) -> SerialTransportConfig {
        SerialTransportConfig::relay_profile(
            port,
            Duration::from_millis(1500),
            Duration::from_millis(1000),
        )
    }

    #[test]
    fn test_serial_config_validation() {
        let mut config = config("/dev/ttyUSB1");
        assert!(config.validate().is_ok());
        assert_eq!(config.read_timeout, Duration::from_millis(1500));

        config.port = "".to_string();
        assert!(config.validate().is_err());

        config.port = "/dev/ttyUSB0".to_string();
        config.read_timeout = Duration::ZERO;
        assert!(config.validate().is_err());

        config.read_timeout = Duration::from_millis(1500);
        config.write_timeout = Duration::ZERO;
        assert!(matches!(
            SerialTransport::new(config).unwrap_err(),
            TransportError::ConfigError(_)
        ));
    }

    #[tokio::test]
    async fn test_serial_transport_not_connected_initially() {
        let mut transport = SerialTransport::new(config("/dev/ttyUSB0")).unwrap();
        assert!(!transport.is_connected());
        assert_eq!(transport.transport_type(), "serial");
        assert_eq!(transport.endpoint(), "/dev/ttyUSB0");

        let err = transport.send(b"x").await.unwrap_err();
        assert!(matches!(err, TransportError::SendFailed(_)));
    }

    #[tokio::test]
    async fn test_open_missing_port_fails() {
        let mut transport = SerialTransport::new(config("/dev/does-not-exist-relay")).unwrap();
        let err = transport.connect().await.unwrap_err();
        assert!(matches!(err, TransportError::ConnectionFailed(_)));
        assert_eq!(transport.stats().failed_connections, 1);
    }
}
