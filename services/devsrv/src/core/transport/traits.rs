//! Transport Layer Traits
//!
//! This module defines the core traits and types for the transport layer,
//! providing a unified interface over serial ports and TCP sockets.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime};
use thiserror::Error;

/// Transport layer error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection lost
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Send operation failed
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Receive operation failed
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Timeout occurred
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),
}

impl TransportError {
    /// Whether the error is a plain deadline expiry
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Connection state for transports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Transport is disconnected
    Disconnected,
    /// Transport is attempting to connect
    Connecting,
    /// Transport is connected and ready
    Connected,
    /// Transport has encountered an error
    Error,
}

/// Transport statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportStats {
    /// Total bytes sent
    pub bytes_sent: u64,
    /// Total bytes received
    pub bytes_received: u64,
    /// Number of connection attempts
    pub connection_attempts: u64,
    /// Number of successful connections
    pub successful_connections: u64,
    /// Number of failed connections
    pub failed_connections: u64,
    /// Last successful connection time
    pub last_connection: Option<SystemTime>,
    /// Current connection state
    pub connection_state: ConnectionState,
}

impl TransportStats {
    /// Create new transport statistics
    pub fn new() -> Self {
        Self {
            bytes_sent: 0,
            bytes_received: 0,
            connection_attempts: 0,
            successful_connections: 0,
            failed_connections: 0,
            last_connection: None,
            connection_state: ConnectionState::Disconnected,
        }
    }

    /// Record a connection attempt
    pub fn record_connection_attempt(&mut self) {
        self.connection_attempts += 1;
        self.connection_state = ConnectionState::Connecting;
    }

    /// Record a successful connection
    pub fn record_successful_connection(&mut self) {
        self.successful_connections += 1;
        self.last_connection = Some(SystemTime::now());
        self.connection_state = ConnectionState::Connected;
    }

    /// Record a failed connection
    pub fn record_failed_connection(&mut self) {
        self.failed_connections += 1;
        self.connection_state = ConnectionState::Error;
    }

    /// Record a disconnection
    pub fn record_disconnection(&mut self) {
        self.connection_state = ConnectionState::Disconnected;
    }

    /// Record bytes sent
    pub fn record_bytes_sent(&mut self, bytes: usize) {
        self.bytes_sent += bytes as u64;
    }

    /// Record bytes received
    pub fn record_bytes_received(&mut self, bytes: usize) {
        self.bytes_received += bytes as u64;
    }
}

impl Default for TransportStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Core transport trait defining the interface for all transport implementations
///
/// A transport owns one physical connection. Callers serialize access
/// themselves (see `PortRegistry`), so every I/O method takes `&mut self`.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Get transport type identifier
    fn transport_type(&self) -> &str;

    /// Endpoint this transport talks to (port path or host:port)
    fn endpoint(&self) -> &str;

    /// Connect to the remote endpoint
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Disconnect from the remote endpoint
    async fn disconnect(&mut self) -> Result<(), TransportError>;

    /// Send data to the remote endpoint
    ///
    /// # Returns
    ///
    /// `Ok(bytes_sent)` if successful, `Err` otherwise
    async fn send(&mut self, data: &[u8]) -> Result<usize, TransportError>;

    /// Receive data from the remote endpoint
    ///
    /// # Arguments
    ///
    /// * `buffer` - Buffer to store received data
    /// * `timeout` - Optional timeout for the receive operation
    ///
    /// # Returns
    ///
    /// `Ok(bytes_received)` if successful, `Err(Timeout)` when nothing
    /// arrived in time
    async fn receive(
        &mut self,
        buffer: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<usize, TransportError>;

    /// Discard stale input left over from a previous exchange
    async fn clear_input(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Check if transport is currently connected
    fn is_connected(&self) -> bool;

    /// Get transport statistics
    fn stats(&self) -> TransportStats;
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_transport_stats() {
        let mut stats = TransportStats::new();
        assert_eq!(stats.connection_attempts, 0);
        assert_eq!(stats.connection_state, ConnectionState::Disconnected);

        stats.record_connection_attempt();
        assert_eq!(stats.connection_attempts, 1);
        assert_eq!(stats.connection_state, ConnectionState::Connecting);

        stats.record_successful_connection();
        assert_eq!(stats.successful_connections, 1);
        assert_eq!(stats.connection_state, ConnectionState::Connected);
        assert!(stats.last_connection.is_some());

        stats.record_bytes_sent(9);
        stats.record_bytes_received(4);
        assert_eq!(stats.bytes_sent, 9);
        assert_eq!(stats.bytes_received, 4);

        stats.record_disconnection();
        assert_eq!(stats.connection_state, ConnectionState::Disconnected);
    }

    #[test]
    fn test_transport_error() {
        let error = TransportError::ConnectionFailed("/dev/ttyUSB9".to_string());
        assert!(error.to_string().contains("Connection failed"));
        assert!(error.to_string().contains("/dev/ttyUSB9"));
        assert!(TransportError::Timeout("read".into()).is_timeout());
        assert!(!error.is_timeout());
    }
}
