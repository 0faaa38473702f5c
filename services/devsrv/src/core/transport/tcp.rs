//! TCP Transport Implementation
//!
//! Projectors are driven over short-lived TCP connections: one connection
//! per command, no pooling.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

use common::hex::{format_hex_pretty, printable};

use super::traits::{ConnectionState, Transport, TransportError, TransportStats};

/// TCP transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpTransportConfig {
    /// Remote host address
    pub host: String,
    /// Remote port number
    pub port: u16,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Default read timeout
    pub read_timeout: Duration,
    /// TCP no-delay (Nagle algorithm)
    pub no_delay: bool,
}

impl Default for TcpTransportConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4352,
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(5),
            no_delay: true,
        }
    }
}

impl TcpTransportConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.host.is_empty() {
            return Err(TransportError::ConfigError(
                "Host cannot be empty".to_string(),
            ));
        }

        if self.port == 0 {
            return Err(TransportError::ConfigError(
                "Port cannot be zero".to_string(),
            ));
        }

        if self.connect_timeout.is_zero() {
            return Err(TransportError::ConfigError(
                "Timeout must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

/// TCP transport implementation
#[derive(Debug)]
pub struct TcpTransport {
    config: TcpTransportConfig,
    endpoint: String,
    connection: Option<TcpStream>,
    stats: TransportStats,
}

impl TcpTransport {
    /// Create new TCP transport with configuration
    pub fn new(config: TcpTransportConfig) -> Result<Self, TransportError> {
        config.validate()?;
        let endpoint = format!("{}:{}", config.host, config.port);

        Ok(Self {
            config,
            endpoint,
            connection: None,
            stats: TransportStats::new(),
        })
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn transport_type(&self) -> &str {
        "tcp"
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        self.stats.record_connection_attempt();
        debug!("Connecting to TCP endpoint: {}", self.endpoint);

        match timeout(self.config.connect_timeout, TcpStream::connect(&self.endpoint)).await {
            Ok(Ok(stream)) => {
                if self.config.no_delay {
                    if let Err(e) = stream.set_nodelay(true) {
                        warn!("Failed to set TCP_NODELAY on {}: {e}", self.endpoint);
                    }
                }
                self.connection = Some(stream);
                self.stats.record_successful_connection();
                debug!("Connected to {}", self.endpoint);
                Ok(())
            },
            Ok(Err(e)) => {
                self.stats.record_failed_connection();
                Err(TransportError::ConnectionFailed(format!(
                    "Failed to connect to {}: {e}",
                    self.endpoint
                )))
            },
            Err(_) => {
                self.stats.record_failed_connection();
                Err(TransportError::Timeout(format!(
                    "Connect to {} timed out after {:?}",
                    self.endpoint, self.config.connect_timeout
                )))
            },
        }
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        if let Some(mut stream) = self.connection.take() {
            // Best effort: the peer may already have closed its side
            let _ = stream.shutdown().await;
            self.stats.record_disconnection();
            debug!("Disconnected from {}", self.endpoint);
        }
        Ok(())
    }

    async fn send(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let Some(stream) = self.connection.as_mut() else {
            return Err(TransportError::SendFailed(format!(
                "Not connected to {}",
                self.endpoint
            )));
        };

        match stream.write_all(data).await {
            Ok(()) => {
                self.stats.record_bytes_sent(data.len());
                debug!(
                    hex_data = %format_hex_pretty(data),
                    ascii = %printable(data),
                    length = data.len(),
                    direction = "send",
                    "[TCP] {} raw packet",
                    self.endpoint
                );
                Ok(data.len())
            },
            Err(e) => {
                self.connection = None;
                self.stats.connection_state = ConnectionState::Error;
                Err(TransportError::SendFailed(format!(
                    "Failed to send to {}: {e}",
                    self.endpoint
                )))
            },
        }
    }

    async fn receive(
        &mut self,
        buffer: &mut [u8],
        timeout_duration: Option<Duration>,
    ) -> Result<usize, TransportError> {
        let receive_timeout = timeout_duration.unwrap_or(self.config.read_timeout);
        let Some(stream) = self.connection.as_mut() else {
            return Err(TransportError::ReceiveFailed(format!(
                "Not connected to {}",
                self.endpoint
            )));
        };

        match timeout(receive_timeout, stream.read(buffer)).await {
            Ok(Ok(0)) => {
                // Peer closed the connection
                self.connection = None;
                self.stats.record_disconnection();
                Err(TransportError::ConnectionLost(format!(
                    "{} closed the connection",
                    self.endpoint
                )))
            },
            Ok(Ok(bytes_read)) => {
                self.stats.record_bytes_received(bytes_read);
                debug!(
                    hex_data = %format_hex_pretty(&buffer[..bytes_read]),
                    ascii = %printable(&buffer[..bytes_read]),
                    length = bytes_read,
                    direction = "recv",
                    "[TCP] {} raw packet",
                    self.endpoint
                );
                Ok(bytes_read)
            },
            Ok(Err(e)) => {
                self.connection = None;
                self.stats.connection_state = ConnectionState::Error;
                Err(TransportError::ReceiveFailed(format!(
                    "Failed to receive from {}: {e}",
                    self.endpoint
                )))
            },
            Err(_) => Err(TransportError::Timeout(format!(
                "No data from {} within {receive_timeout:?}",
                self.endpoint
            ))),
        }
    }

    fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    fn stats(&self) -> TransportStats {
        self.stats.clone()
    }
}
