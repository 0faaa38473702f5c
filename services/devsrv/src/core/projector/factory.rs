//! Projector control factory

use std::net::IpAddr;
use std::time::Duration;

use errors::{GatewayError, GatewayResult};

use super::control::{ProjectorControl, DEFAULT_EXCHANGE_TIMEOUT};
use super::protocol::ProjectorProtocolType;

/// Builds a [`ProjectorControl`] for an address and protocol
#[derive(Debug, Clone, Copy)]
pub struct ProjectorControlFactory {
    timeout: Duration,
}

impl Default for ProjectorControlFactory {
    fn default() -> Self {
        Self::new(DEFAULT_EXCHANGE_TIMEOUT)
    }
}

impl ProjectorControlFactory {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// `address` must be an IP literal; the protocol picks the TCP port
    pub fn create(
        &self,
        address: &str,
        protocol: ProjectorProtocolType,
    ) -> GatewayResult<ProjectorControl> {
        let ip: IpAddr = address.trim().parse().map_err(|_| {
            GatewayError::invalid_address(address, "projector address must be an IP address")
        })?;
        Ok(ProjectorControl::new(ip.to_string(), protocol, self.timeout))
    }

    /// Same as [`create`](Self::create) with an explicit TCP port
    pub fn create_with_port(
        &self,
        address: &str,
        protocol: ProjectorProtocolType,
        port: Option<u16>,
    ) -> GatewayResult<ProjectorControl> {
        let control = self.create(address, protocol)?;
        Ok(match port {
            Some(port) => control.with_port(port),
            None => control,
        })
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use errors::ErrorKind;

    #[test]
    fn test_protocol_selects_port() {
        let factory = ProjectorControlFactory::default();
        let control = factory.create("10.0.0.20", ProjectorProtocolType::PjTalk).unwrap();
        assert_eq!(control.endpoint(), "10.0.0.20:53484");

        let control = factory
            .create_with_port("10.0.0.21", ProjectorProtocolType::PjLink, Some(14352))
            .unwrap();
        assert_eq!(control.endpoint(), "10.0.0.21:14352");
    }

    #[test]
    fn test_bad_address_rejected() {
        let factory = ProjectorControlFactory::default();
        for address in ["", "projector.local", "10.0.0.300"] {
            let err = factory.create(address, ProjectorProtocolType::Rs232).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidAddress);
        }
    }
}
