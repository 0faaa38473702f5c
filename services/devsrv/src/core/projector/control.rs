//! Projector power control over TCP
//!
//! One fresh connection per command, no pooling. The whole exchange
//! (connect, optional banner, write, read) runs under a single deadline.

use serde::Serialize;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use errors::{ErrorKind, GatewayError, GatewayResult};

use super::protocol::{ProjectorProtocol, ProjectorProtocolType, ProjectorStatus};
use crate::core::transport::{TcpTransport, TcpTransportConfig, Transport, TransportError};

/// Replies longer than this are truncated
const MAX_REPLY: usize = 256;

/// Default whole-exchange deadline
pub const DEFAULT_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of a projector command, never an exception
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectorCommandResult {
    pub success: bool,
    pub status: ProjectorStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl ProjectorCommandResult {
    fn success(status: ProjectorStatus, message: impl Into<String>, raw: String) -> Self {
        Self {
            success: true,
            status,
            message: message.into(),
            raw_response: Some(raw),
            error_kind: None,
        }
    }

    fn failure(
        status: ProjectorStatus,
        message: impl Into<String>,
        raw: Option<String>,
        kind: ErrorKind,
    ) -> Self {
        Self {
            success: false,
            status,
            message: message.into(),
            raw_response: raw,
            error_kind: Some(kind),
        }
    }

    fn from_error(context: &str, err: &GatewayError) -> Self {
        Self::failure(
            ProjectorStatus::Failure,
            format!("{context}: {err}"),
            err.raw_response().map(str::to_string),
            err.kind(),
        )
    }
}

/// Controls one projector
#[derive(Debug, Clone)]
pub struct ProjectorControl {
    host: String,
    port: u16,
    protocol: &'static ProjectorProtocol,
    timeout: Duration,
}

impl ProjectorControl {
    pub fn new(host: impl Into<String>, protocol_type: ProjectorProtocolType, timeout: Duration) -> Self {
        let protocol = protocol_type.descriptor();
        Self {
            host: host.into(),
            port: protocol.port,
            protocol,
            timeout,
        }
    }

    /// Talk to a non-standard TCP port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub async fn on(&self) -> ProjectorCommandResult {
        self.power(ProjectorStatus::On).await
    }

    pub async fn off(&self) -> ProjectorCommandResult {
        self.power(ProjectorStatus::Off).await
    }

    /// Query power state; nothing is cached
    pub async fn status(&self) -> ProjectorCommandResult {
        let endpoint = self.endpoint();
        let response = match self.transmit(self.protocol.status_command).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Projector {endpoint} status query failed: {e}");
                return ProjectorCommandResult::from_error("Status query failed", &e);
            },
        };

        if response.is_empty() {
            return ProjectorCommandResult::failure(
                ProjectorStatus::Unknown,
                "No response from projector",
                None,
                ErrorKind::TransportTimeout,
            );
        }

        let mut status = self.protocol.parse_status(&response);
        if status == ProjectorStatus::Unknown && self.looks_like_ack(&response) {
            status = ProjectorStatus::AckOnly;
        }

        if status.is_power_state() {
            info!("Projector {endpoint}: {}", status.describe());
            ProjectorCommandResult::success(status, status.describe(), response)
        } else {
            warn!("Projector {endpoint} status reply {response:?}: {}", status.describe());
            ProjectorCommandResult::failure(
                status,
                status.describe(),
                Some(response),
                ErrorKind::ProtocolMismatch,
            )
        }
    }

    async fn power(&self, target: ProjectorStatus) -> ProjectorCommandResult {
        let (command, label) = match target {
            ProjectorStatus::On => (self.protocol.on_command, "ON"),
            _ => (self.protocol.off_command, "OFF"),
        };
        let endpoint = self.endpoint();

        let response = match self.transmit(command).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Projector {endpoint} power {label} failed: {e}");
                return ProjectorCommandResult::from_error(
                    &format!("Failed to send power {label} command"),
                    &e,
                );
            },
        };

        if self.protocol.is_ack(&response, target) {
            info!("Projector {endpoint} acknowledged power {label}");
            ProjectorCommandResult::success(target, format!("Power {label} acknowledged"), response)
        } else {
            warn!("Projector {endpoint} did not confirm power {label}: {response:?}");
            let kind = if response.is_empty() {
                ErrorKind::TransportTimeout
            } else {
                ErrorKind::ProtocolMismatch
            };
            ProjectorCommandResult::failure(
                self.protocol.parse_status(&response),
                format!("Power {label} not confirmed by projector"),
                (!response.is_empty()).then_some(response),
                kind,
            )
        }
    }

    fn looks_like_ack(&self, response: &str) -> bool {
        self.protocol.is_ack(response, ProjectorStatus::On)
            || self.protocol.is_ack(response, ProjectorStatus::Off)
    }

    /// Full exchange under the deadline; returns the trimmed reply
    async fn transmit(&self, command: &str) -> GatewayResult<String> {
        let endpoint = self.endpoint();
        match timeout(self.timeout, self.exchange(command)).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::TransportTimeout(format!(
                "{endpoint} did not answer within {:?}",
                self.timeout
            ))),
        }
    }

    async fn exchange(&self, command: &str) -> GatewayResult<String> {
        let endpoint = self.endpoint();
        let mut transport = TcpTransport::new(TcpTransportConfig {
            host: self.host.clone(),
            port: self.port,
            connect_timeout: self.timeout,
            read_timeout: self.timeout,
            no_delay: true,
        })
        .map_err(|e| e.into_gateway_error(&endpoint))?;

        transport
            .connect()
            .await
            .map_err(|e| e.into_gateway_error(&endpoint))?;

        let result = self.converse(&mut transport, command).await;
        if let Err(e) = transport.disconnect().await {
            debug!("Ignoring close error on {endpoint}: {e}");
        }
        result
    }

    async fn converse(&self, transport: &mut TcpTransport, command: &str) -> GatewayResult<String> {
        let endpoint = self.endpoint();

        if self.protocol.expects_banner {
            let banner = read_reply(transport)
                .await
                .map_err(|e| e.into_gateway_error(&endpoint))?;
            check_pjlink_banner(&banner)?;
            debug!("Projector {endpoint} banner {banner:?}");
        }

        transport
            .send(command.as_bytes())
            .await
            .map_err(|e| e.into_gateway_error(&endpoint))?;

        match read_reply(transport).await {
            Ok(reply) => Ok(reply),
            // Closing without a word counts as no response
            Err(TransportError::ConnectionLost(_)) => Ok(String::new()),
            Err(e) => Err(e.into_gateway_error(&endpoint)),
        }
    }
}

async fn read_reply(transport: &mut TcpTransport) -> Result<String, TransportError> {
    let mut buf = [0u8; MAX_REPLY];
    let n = transport.receive(&mut buf, None).await?;
    Ok(trim_reply(&buf[..n]))
}

fn trim_reply(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_matches(|c| c == '\0' || c == '\r' || c == '\n')
        .to_string()
}

/// Validate the PJLink greeting; authenticated sessions are not supported
pub fn check_pjlink_banner(banner: &str) -> GatewayResult<()> {
    if !banner.starts_with("PJLINK") {
        return Err(GatewayError::mismatch(
            "pjlink",
            "Unexpected handshake",
            Some(banner.to_string()),
        ));
    }
    if banner.starts_with("PJLINK 1") {
        return Err(GatewayError::mismatch(
            "pjlink",
            "Projector requires PJLink authentication",
            Some(banner.to_string()),
        ));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// One-shot fake projector: optional banner, then one canned reply
    async fn fake_projector(banner: Option<&'static [u8]>, reply: &'static [u8]) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            if let Some(banner) = banner {
                socket.write_all(banner).await.unwrap();
            }
            let mut buf = [0u8; 64];
            let _ = socket.read(&mut buf).await;
            let _ = socket.write_all(reply).await;
        });
        port
    }

    fn control(kind: ProjectorProtocolType, port: u16) -> ProjectorControl {
        ProjectorControl::new("127.0.0.1", kind, Duration::from_secs(2)).with_port(port)
    }

    #[test]
    fn test_banner_validation() {
        assert!(check_pjlink_banner("PJLINK 0").is_ok());
        let err = check_pjlink_banner("PJLINK 1 498e4a67").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolMismatch);
        assert!(check_pjlink_banner("HELLO").is_err());
    }

    #[test]
    fn test_trim_reply() {
        assert_eq!(trim_reply(b"%1POWR=1\r\0"), "%1POWR=1");
        assert_eq!(trim_reply(b"\r\n"), "");
    }

    #[tokio::test]
    async fn test_pjlink_status_with_banner() {
        let port = fake_projector(Some(b"PJLINK 0\r"), b"%1POWR=2\r").await;
        let result = control(ProjectorProtocolType::PjLink, port).status().await;
        assert!(result.success);
        assert_eq!(result.status, ProjectorStatus::WarmingUp);
        assert_eq!(result.raw_response.as_deref(), Some("%1POWR=2"));
    }

    #[tokio::test]
    async fn test_pjlink_auth_banner_fails_fast() {
        let port = fake_projector(Some(b"PJLINK 1 0123abcd\r"), b"").await;
        let result = control(ProjectorProtocolType::PjLink, port).on().await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::ProtocolMismatch));
        assert!(result.raw_response.unwrap().starts_with("PJLINK 1"));
    }

    #[tokio::test]
    async fn test_pjtalk_on_requires_ack() {
        let port = fake_projector(None, b"POWR=OK\r").await;
        let result = control(ProjectorProtocolType::PjTalk, port).on().await;
        assert!(result.success);
        assert_eq!(result.status, ProjectorStatus::On);

        // A status-shaped reply is not an acknowledgement
        let port = fake_projector(None, b"POWR=1\r").await;
        let result = control(ProjectorProtocolType::PjTalk, port).on().await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::ProtocolMismatch));
    }

    #[tokio::test]
    async fn test_status_answered_with_ack() {
        let port = fake_projector(None, b"POWR=OK\r").await;
        let result = control(ProjectorProtocolType::PjTalk, port).status().await;
        assert!(!result.success);
        assert_eq!(result.status, ProjectorStatus::AckOnly);
    }

    #[tokio::test]
    async fn test_silent_close_is_no_response() {
        let port = fake_projector(None, b"").await;
        let result = control(ProjectorProtocolType::Rs232, port).status().await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::TransportTimeout));
    }

    #[tokio::test]
    async fn test_connect_refused_is_fault() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = control(ProjectorProtocolType::PjTalk, port).off().await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::TransportFault));
        assert_eq!(result.status, ProjectorStatus::Failure);
    }

    #[tokio::test]
    async fn test_hung_projector_hits_deadline() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
            drop(socket);
        });

        let control = ProjectorControl::new("127.0.0.1", ProjectorProtocolType::PjLink, Duration::from_millis(200))
            .with_port(port);
        let result = control.status().await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::TransportTimeout));
        server.abort();
    }
}
