//! Unified error handling for the device gateway
//!
//! Every hardware-facing operation in `devsrv` classifies its failures into
//! one of a small set of kinds. The HTTP layer (an external caller) renders
//! them through [`ErrorInfo`] and [`GatewayError::status_code`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

// ============================================================================
// ErrorInfo - API error response type
// ============================================================================

/// Standard error information for API responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Error code (HTTP status)
    pub code: u16,
    /// Stable machine-readable error code, e.g. `INVALID_ADDRESS`
    pub error_code: String,
    /// Error message
    pub message: String,
    /// Detailed error description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Field-specific errors for validation
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub field_errors: HashMap<String, Vec<String>>,
}

impl ErrorInfo {
    /// Create a new ErrorInfo with just a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: 500,
            error_code: "INTERNAL_ERROR".to_string(),
            message: message.into(),
            details: None,
            field_errors: HashMap::new(),
        }
    }

    /// Set the status code
    pub fn with_code(mut self, code: u16) -> Self {
        self.code = code;
        self
    }

    /// Set the machine-readable error code
    pub fn with_error_code(mut self, error_code: impl Into<String>) -> Self {
        self.error_code = error_code.into();
        self
    }

    /// Add details
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Add a field error
    pub fn add_field_error(mut self, field: impl Into<String>, error: impl Into<String>) -> Self {
        self.field_errors
            .entry(field.into())
            .or_default()
            .push(error.into());
        self
    }
}

// ============================================================================
// ErrorKind - coarse taxonomy carried in structured results
// ============================================================================

/// Coarse error classification attached to hardware command results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing command table entry, no ports configured, bad config values
    Configuration,
    /// Locker/door number or projector address outside the configured range
    InvalidAddress,
    /// No response within the read window or exchange deadline
    TransportTimeout,
    /// Connection refused, I/O failure, port could not be opened
    TransportFault,
    /// Unexpected handshake, error reply or unparseable response
    ProtocolMismatch,
    /// Anything else (shutdown, serialization)
    Internal,
}

// ============================================================================
// GatewayError - Main error type
// ============================================================================

/// Main error type for the device gateway
#[derive(Debug, Error)]
pub enum GatewayError {
    // ======================================
    // Configuration Errors
    // ======================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("No command defined for {0}")]
    MissingCommand(String),

    // ======================================
    // Addressing Errors
    // ======================================
    #[error("Invalid address: {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    // ======================================
    // Transport & Protocol Errors
    // ======================================
    #[error("Timeout waiting for response from {0}")]
    TransportTimeout(String),

    #[error("Transport fault: {endpoint}: {reason}")]
    TransportFault { endpoint: String, reason: String },

    #[error("Protocol mismatch: {protocol}: {message}")]
    ProtocolMismatch {
        protocol: String,
        message: String,
        raw: Option<String>,
    },

    // ======================================
    // Runtime Errors
    // ======================================
    #[error("Gateway is shutting down")]
    ShuttingDown,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type alias using GatewayError
pub type GatewayResult<T> = Result<T, GatewayError>;

impl GatewayError {
    /// Build an `InvalidAddress` error
    pub fn invalid_address(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAddress {
            address: address.into(),
            reason: reason.into(),
        }
    }

    /// Build a `TransportFault` error
    pub fn fault(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TransportFault {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }

    /// Build a `ProtocolMismatch` error, keeping the raw bytes for diagnosis
    pub fn mismatch(
        protocol: impl Into<String>,
        message: impl Into<String>,
        raw: Option<String>,
    ) -> Self {
        Self::ProtocolMismatch {
            protocol: protocol.into(),
            message: message.into(),
            raw,
        }
    }

    /// Map onto the coarse taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) | Self::InvalidConfig { .. } | Self::MissingCommand(_) => {
                ErrorKind::Configuration
            },
            Self::InvalidAddress { .. } => ErrorKind::InvalidAddress,
            Self::TransportTimeout(_) => ErrorKind::TransportTimeout,
            Self::TransportFault { .. } | Self::Io(_) => ErrorKind::TransportFault,
            Self::ProtocolMismatch { .. } => ErrorKind::ProtocolMismatch,
            Self::ShuttingDown | Self::Serialization(_) => ErrorKind::Internal,
        }
    }

    /// Raw device response attached to the error, if any
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            Self::ProtocolMismatch { raw, .. } => raw.as_deref(),
            _ => None,
        }
    }

    /// Get the appropriate HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            // 400 Bad Request
            Self::InvalidAddress { .. } => 400,

            // 500 Internal Server Error
            Self::Configuration(_)
            | Self::InvalidConfig { .. }
            | Self::MissingCommand(_)
            | Self::Serialization(_) => 500,

            // 502 Bad Gateway
            Self::TransportFault { .. } | Self::ProtocolMismatch { .. } | Self::Io(_) => 502,

            // 503 Service Unavailable
            Self::ShuttingDown => 503,

            // 504 Gateway Timeout
            Self::TransportTimeout(_) => 504,
        }
    }

    /// Stable error code string
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::InvalidConfig { .. } => "INVALID_CONFIG",
            Self::MissingCommand(_) => "MISSING_COMMAND",
            Self::InvalidAddress { .. } => "INVALID_ADDRESS",
            Self::TransportTimeout(_) => "TRANSPORT_TIMEOUT",
            Self::TransportFault { .. } => "TRANSPORT_FAULT",
            Self::ProtocolMismatch { .. } => "PROTOCOL_MISMATCH",
            Self::ShuttingDown => "SHUTTING_DOWN",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Convert to API ErrorInfo for HTTP responses
    pub fn to_error_info(&self) -> ErrorInfo {
        let mut error_info = ErrorInfo::new(self.to_string())
            .with_code(self.status_code())
            .with_error_code(self.error_code());

        match self {
            Self::InvalidConfig { field, reason } => {
                error_info = error_info.add_field_error(field, reason);
            },
            Self::InvalidAddress { address, reason } => {
                error_info = error_info.add_field_error(address, reason);
            },
            Self::ProtocolMismatch { raw: Some(raw), .. } => {
                error_info = error_info.with_details(format!("Raw response: {raw:?}"));
            },
            _ => {},
        }

        error_info
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
