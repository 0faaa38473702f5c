//! Error bridge between the transport layer and the gateway error type

pub use errors::{ErrorInfo, ErrorKind, GatewayError, GatewayResult};

use crate::core::transport::TransportError;

impl TransportError {
    /// Classify a transport failure on `endpoint`
    pub fn into_gateway_error(self, endpoint: &str) -> GatewayError {
        match self {
            TransportError::Timeout(msg) => GatewayError::TransportTimeout(msg),
            TransportError::ConfigError(msg) => GatewayError::InvalidConfig {
                field: endpoint.to_string(),
                reason: msg,
            },
            other => GatewayError::fault(endpoint, other.to_string()),
        }
    }
}

impl From<TransportError> for GatewayError {
    fn from(err: TransportError) -> Self {
        err.into_gateway_error("transport")
    }
}
