//! Relay command transport
//!
//! Drives one command/response exchange on a relay board:
//!
//! 1. resolve the on/off bytes from the command table (before touching the port)
//! 2. acquire the port gate
//! 3. discard stale input, write the bytes
//! 4. wait the settle delay
//! 5. read until a line terminator arrives or the read window closes
//! 6. classify the reply
//!
//! Faults during the exchange evict the cached handle, and so does a silent
//! window unless silence is treated as success. The gate is released
//! when the [`PortGuard`](super::port_registry::PortGuard) drops, on every path.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use errors::{ErrorKind, GatewayError, GatewayResult};

use super::commands::CommandTable;
use super::port_registry::{PortGuard, PortRegistry};
use super::transport::TransportError;

const READ_CHUNK: usize = 256;

/// Settle delay, read window and the silence policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayTiming {
    /// Wait after the write before reading
    pub response_delay: Duration,
    /// Read window, measured from the end of the settle delay
    pub max_window: Duration,
    /// Treat an empty reply as success
    pub assume_success_on_silence: bool,
}

impl Default for RelayTiming {
    fn default() -> Self {
        Self {
            response_delay: Duration::from_millis(200),
            max_window: Duration::from_millis(2000),
            assume_success_on_silence: true,
        }
    }
}

/// Outcome of a relay command, never an exception
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SerialCommandResult {
    pub success: bool,
    /// Trimmed raw reply, absent when the board stayed silent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl SerialCommandResult {
    fn ok(response: Option<String>, message: Option<&str>) -> Self {
        Self {
            success: true,
            response,
            message: message.map(str::to_string),
            error_kind: None,
        }
    }

    /// Failure carrying the error's kind and raw response
    pub fn from_error(err: &GatewayError) -> Self {
        Self {
            success: false,
            response: err.raw_response().map(str::to_string),
            message: Some(err.to_string()),
            error_kind: Some(err.kind()),
        }
    }
}

/// Classify a relay reply.
///
/// Rules apply in order: silence, error markers, echo or acknowledgement
/// words, then anything else.
pub fn classify_response(
    sent: &[u8],
    response: &str,
    assume_success_on_silence: bool,
) -> SerialCommandResult {
    let normalized = response.trim();

    if normalized.is_empty() {
        return if assume_success_on_silence {
            SerialCommandResult::ok(None, Some("No response (assumed success)"))
        } else {
            SerialCommandResult {
                success: false,
                response: None,
                message: Some("No response".to_string()),
                error_kind: Some(ErrorKind::TransportTimeout),
            }
        };
    }

    let upper = normalized.to_ascii_uppercase();
    if upper.contains("ERR") || upper.contains("FAIL") {
        return SerialCommandResult {
            success: false,
            response: Some(normalized.to_string()),
            message: Some("Relay reported failure".to_string()),
            error_kind: Some(ErrorKind::ProtocolMismatch),
        };
    }

    let sent = String::from_utf8_lossy(sent);
    let echoed = normalized.eq_ignore_ascii_case(sent.trim());
    if echoed || upper.contains("OK") || upper.contains("ON") || upper.contains("OFF") {
        return SerialCommandResult::ok(Some(normalized.to_string()), None);
    }

    SerialCommandResult::ok(
        Some(normalized.to_string()),
        Some("Unexpected response, assumed success"),
    )
}

/// Sends relay commands through the shared port registry
#[derive(Debug, Clone)]
pub struct RelayCommander {
    registry: Arc<PortRegistry>,
    commands: Arc<CommandTable>,
    timing: RelayTiming,
}

impl RelayCommander {
    pub fn new(registry: Arc<PortRegistry>, commands: Arc<CommandTable>, timing: RelayTiming) -> Self {
        Self {
            registry,
            commands,
            timing,
        }
    }

    /// Switch one channel. `Err` only when no command is configured for it.
    pub async fn send(
        &self,
        port: &str,
        channel: u16,
        is_unlock: bool,
    ) -> GatewayResult<SerialCommandResult> {
        let command = self.commands.channel(channel)?;
        let payload = non_empty(command.payload(is_unlock), || format!("channel_{channel}"))?;
        let action = if is_unlock { "on" } else { "off" };
        debug!("Relay {port} channel {channel} -> {action}");
        Ok(self.command(port, payload).await)
    }

    /// Switch every channel on a board at once
    pub async fn send_all_channels(&self, port: &str, on: bool) -> GatewayResult<SerialCommandResult> {
        let command = self.commands.all_channels()?;
        let payload = non_empty(command.payload(on), || "all_channels".to_string())?;
        Ok(self.command(port, payload).await)
    }

    /// Send the board status query and return the trimmed reply
    pub async fn query_status(&self, port: &str) -> GatewayResult<String> {
        let command = self.commands.status()?;
        let payload = non_empty(command.payload(true), || "status".to_string())?;
        let (response, mut guard) = self.exchange(port, payload).await?;
        if response.is_empty() {
            guard.evict().await;
            return Err(GatewayError::TransportTimeout(format!(
                "No status reply from {port}"
            )));
        }
        Ok(response)
    }

    async fn command(&self, port: &str, payload: &[u8]) -> SerialCommandResult {
        let result = match self.exchange(port, payload).await {
            Ok((response, mut guard)) => {
                let result =
                    classify_response(payload, &response, self.timing.assume_success_on_silence);
                // A silent window that counts as failure is a missed deadline
                if result.error_kind == Some(ErrorKind::TransportTimeout) {
                    guard.evict().await;
                }
                result
            },
            Err(e) => SerialCommandResult::from_error(&e),
        };

        if result.success {
            info!(
                "Relay command on {port} ok: {}",
                result
                    .message
                    .as_deref()
                    .or(result.response.as_deref())
                    .unwrap_or("")
            );
        } else {
            warn!(
                "Relay command on {port} failed: {}",
                result.message.as_deref().unwrap_or("unknown error")
            );
        }
        result
    }

    /// One gated write/settle/read cycle; empty string means silence.
    ///
    /// The gate stays held through the returned guard so the caller can
    /// evict the handle after judging the reply.
    async fn exchange(&self, port: &str, payload: &[u8]) -> GatewayResult<(String, PortGuard)> {
        let mut guard = self
            .registry
            .acquire(port)
            .await
            .map_err(|e| e.into_gateway_error(port))?;

        match self.drive(&mut guard, payload).await {
            Ok(bytes) => Ok((String::from_utf8_lossy(&bytes).trim().to_string(), guard)),
            Err(e) => {
                guard.evict().await;
                Err(e.into_gateway_error(port))
            },
        }
    }

    async fn drive(&self, guard: &mut PortGuard, payload: &[u8]) -> Result<Vec<u8>, TransportError> {
        let transport = guard.transport()?;

        transport.clear_input().await?;
        transport.send(payload).await?;

        tokio::time::sleep(self.timing.response_delay).await;

        let deadline = Instant::now() + self.timing.max_window;
        let mut response = Vec::new();
        let mut buf = [0u8; READ_CHUNK];

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            match transport.receive(&mut buf, Some(remaining)).await {
                Ok(0) => tokio::time::sleep(Duration::from_millis(10)).await,
                Ok(n) => {
                    response.extend_from_slice(&buf[..n]);
                    if buf[..n].iter().any(|b| *b == b'\n' || *b == b'\r') {
                        break;
                    }
                },
                Err(e) if e.is_timeout() => break,
                Err(e) => return Err(e),
            }
        }

        Ok(response)
    }
}

fn non_empty(payload: &[u8], key: impl FnOnce() -> String) -> GatewayResult<&[u8]> {
    if payload.is_empty() {
        return Err(GatewayError::MissingCommand(key()));
    }
    Ok(payload)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::core::commands::Command;
    use crate::core::transport::mock::{MockConnector, MockEventKind, MockReply};

    const PORT: &str = "/dev/ttyMOCK0";

    fn commander(connector: &MockConnector, timing: RelayTiming) -> RelayCommander {
        let registry = Arc::new(PortRegistry::new(Arc::new(connector.clone())));
        let commands = CommandTable::from_entries([
            ("channel_1", Command::new("ON1\\r\\n", "OFF1\\r\\n")),
            ("channel_2", Command::new("ON2\\r\\n", "")),
            ("status", Command::new("STAT\\r\\n", "")),
        ]);
        RelayCommander::new(registry, Arc::new(commands), timing)
    }

    #[test]
    fn test_classification_order() {
        let sent = b"ON1\r\n";
        let r = classify_response(sent, "", true);
        assert!(r.success);
        assert_eq!(r.message.as_deref(), Some("No response (assumed success)"));

        let r = classify_response(sent, "  \r\n", false);
        assert!(!r.success);
        assert_eq!(r.error_kind, Some(ErrorKind::TransportTimeout));

        // Error markers win over acknowledgement words
        let r = classify_response(sent, "ERR: ON failed", true);
        assert!(!r.success);
        assert_eq!(r.message.as_deref(), Some("Relay reported failure"));
        assert!(!classify_response(sent, "relay fail", true).success);

        let r = classify_response(sent, "on1", true);
        assert!(r.success);
        assert_eq!(r.message, None);
        assert!(classify_response(sent, "OK\r\n", true).success);
        assert!(classify_response(sent, "Relay OFF", true).success);

        let r = classify_response(sent, ":FE05", true);
        assert!(r.success);
        assert_eq!(r.message.as_deref(), Some("Unexpected response, assumed success"));
        assert_eq!(r.response.as_deref(), Some(":FE05"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_writes_configured_bytes_and_classifies() {
        let connector = MockConnector::new();
        connector.queue_reply(PORT, MockReply::Data(b"OK\r\n".to_vec()));
        let commander = commander(&connector, RelayTiming::default());

        let result = commander.send(PORT, 1, true).await.unwrap();
        assert!(result.success);
        assert_eq!(result.response.as_deref(), Some("OK"));
        assert_eq!(connector.writes(PORT), vec![b"ON1\r\n".to_vec()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_starts_after_settle_delay() {
        let connector = MockConnector::new();
        connector.queue_reply(PORT, MockReply::Data(b"OK\r\n".to_vec()));
        let commander = commander(&connector, RelayTiming::default());

        commander.send(PORT, 1, false).await.unwrap();

        let events = connector.events();
        let write = events.iter().find(|e| e.kind == MockEventKind::Write).unwrap();
        let read = events.iter().find(|e| e.kind == MockEventKind::Read).unwrap();
        assert!(read.at.duration_since(write.at) >= Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_waits_out_window() {
        let connector = MockConnector::new();
        let timing = RelayTiming::default();
        let commander = commander(&connector, timing);

        let start = Instant::now();
        let result = commander.send(PORT, 1, true).await.unwrap();
        assert!(result.success);
        assert_eq!(result.response, None);
        assert!(start.elapsed() >= timing.response_delay + timing.max_window);

        // Silence does not evict the handle
        commander.send(PORT, 1, false).await.unwrap();
        assert_eq!(connector.open_count(PORT), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_as_failure_evicts_handle() {
        let connector = MockConnector::new();
        let timing = RelayTiming {
            assume_success_on_silence: false,
            ..RelayTiming::default()
        };
        let commander = commander(&connector, timing);

        let result = commander.send(PORT, 1, true).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::TransportTimeout));

        connector.queue_reply(PORT, MockReply::Data(b"OK\r\n".to_vec()));
        assert!(commander.send(PORT, 1, true).await.unwrap().success);
        assert_eq!(connector.open_count(PORT), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fault_evicts_and_reports_failure() {
        let connector = MockConnector::new();
        connector.queue_reply(PORT, MockReply::Fault);
        let commander = commander(&connector, RelayTiming::default());

        let result = commander.send(PORT, 1, true).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::TransportFault));

        connector.queue_reply(PORT, MockReply::Data(b"OK\r\n".to_vec()));
        assert!(commander.send(PORT, 1, true).await.unwrap().success);
        assert_eq!(connector.open_count(PORT), 2);
    }

    #[tokio::test]
    async fn test_open_failure_is_structured_result() {
        let connector = MockConnector::new();
        connector.fail_next_opens(PORT, 1);
        let commander = commander(&connector, RelayTiming::default());

        let result = commander.send(PORT, 1, true).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::TransportFault));
    }

    #[tokio::test]
    async fn test_missing_command_rejected_before_io() {
        let connector = MockConnector::new();
        let commander = commander(&connector, RelayTiming::default());

        let err = commander.send(PORT, 9, true).await.unwrap_err();
        assert!(matches!(err, GatewayError::MissingCommand(_)));

        // channel_2 has no off string
        assert!(commander.send(PORT, 2, false).await.is_err());
        assert!(commander.send_all_channels(PORT, true).await.is_err());
        assert_eq!(connector.open_count(PORT), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_status() {
        let connector = MockConnector::new();
        connector.queue_reply(PORT, MockReply::Data(b":FE0102FF00\r\n".to_vec()));
        let commander = commander(&connector, RelayTiming::default());

        let reply = commander.query_status(PORT).await.unwrap();
        assert_eq!(reply, ":FE0102FF00");

        let err = commander.query_status(PORT).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransportTimeout);

        // The silent status query dropped the handle
        connector.queue_reply(PORT, MockReply::Data(b":FE01020000\r\n".to_vec()));
        commander.query_status(PORT).await.unwrap();
        assert_eq!(connector.open_count(PORT), 2);
    }
}
