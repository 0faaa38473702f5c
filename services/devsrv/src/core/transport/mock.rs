//! Mock Transport for Testing
//!
//! Scriptable serial ports for exercising the registry, the relay commander
//! and the gateway without hardware. Every mock port opened by the same
//! [`MockConnector`] shares one event log, so tests can check ordering across
//! ports and across reopen cycles.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use super::factory::PortConnector;
use super::traits::{Transport, TransportError, TransportStats};

/// What the mock device does after a write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockReply {
    /// Answer with these bytes
    Data(Vec<u8>),
    /// Say nothing; the read runs into its deadline
    Silence,
    /// The read fails with an I/O error and the port goes dead
    Fault,
}

/// Kind of recorded event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockEventKind {
    Open,
    Write,
    Read,
    Close,
}

/// One recorded interaction
#[derive(Debug, Clone)]
pub struct MockEvent {
    pub kind: MockEventKind,
    pub path: String,
    pub data: Vec<u8>,
    pub at: Instant,
}

#[derive(Debug, Default)]
struct MockBus {
    events: Vec<MockEvent>,
    replies: HashMap<String, VecDeque<MockReply>>,
    default_reply: Option<Vec<u8>>,
    open_failures: HashMap<String, usize>,
    send_failures: HashMap<String, usize>,
    opens: HashMap<String, usize>,
}

impl MockBus {
    fn record(&mut self, kind: MockEventKind, path: &str, data: &[u8]) {
        self.events.push(MockEvent {
            kind,
            path: path.to_string(),
            data: data.to_vec(),
            at: Instant::now(),
        });
    }

    fn take_counter(map: &mut HashMap<String, usize>, path: &str) -> bool {
        match map.get_mut(path) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            },
            _ => false,
        }
    }
}

/// Connector handing out scriptable mock ports
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    bus: Arc<Mutex<MockBus>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the device reply for the next write on `path`
    pub fn queue_reply(&self, path: &str, reply: MockReply) {
        self.bus
            .lock()
            .replies
            .entry(path.to_string())
            .or_default()
            .push_back(reply);
    }

    /// Reply used when nothing is queued; `None` means silence
    pub fn set_default_reply(&self, reply: Option<&[u8]>) {
        self.bus.lock().default_reply = reply.map(<[u8]>::to_vec);
    }

    /// Make the next `count` open attempts on `path` fail
    pub fn fail_next_opens(&self, path: &str, count: usize) {
        self.bus.lock().open_failures.insert(path.to_string(), count);
    }

    /// Make the next `count` writes on `path` fail with an I/O error
    pub fn fail_next_sends(&self, path: &str, count: usize) {
        self.bus.lock().send_failures.insert(path.to_string(), count);
    }

    /// Number of open attempts on `path`, failed ones included
    pub fn open_count(&self, path: &str) -> usize {
        self.bus.lock().opens.get(path).copied().unwrap_or(0)
    }

    /// Snapshot of every recorded event
    pub fn events(&self) -> Vec<MockEvent> {
        self.bus.lock().events.clone()
    }

    /// Payloads written to `path`, in order
    pub fn writes(&self, path: &str) -> Vec<Vec<u8>> {
        self.bus
            .lock()
            .events
            .iter()
            .filter(|e| e.kind == MockEventKind::Write && e.path == path)
            .map(|e| e.data.clone())
            .collect()
    }
}

#[async_trait]
impl PortConnector for MockConnector {
    async fn open(&self, path: &str) -> Result<Box<dyn Transport>, TransportError> {
        let mut bus = self.bus.lock();
        *bus.opens.entry(path.to_string()).or_default() += 1;

        if MockBus::take_counter(&mut bus.open_failures, path) {
            return Err(TransportError::ConnectionFailed(format!(
                "Mock open failure on {path}"
            )));
        }

        bus.record(MockEventKind::Open, path, &[]);
        drop(bus);

        let mut stats = TransportStats::new();
        stats.record_connection_attempt();
        stats.record_successful_connection();

        Ok(Box::new(MockTransport {
            path: path.to_string(),
            bus: self.bus.clone(),
            connected: true,
            pending: None,
            stats,
        }))
    }
}

/// Mock transport implementation
#[derive(Debug)]
pub struct MockTransport {
    path: String,
    bus: Arc<Mutex<MockBus>>,
    connected: bool,
    pending: Option<MockReply>,
    stats: TransportStats,
}

#[async_trait]
impl Transport for MockTransport {
    fn transport_type(&self) -> &str {
        "mock"
    }

    fn endpoint(&self) -> &str {
        &self.path
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        if self.connected {
            self.connected = false;
            self.stats.record_disconnection();
            self.bus.lock().record(MockEventKind::Close, &self.path, &[]);
        }
        Ok(())
    }

    async fn send(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        if !self.connected {
            return Err(TransportError::SendFailed("Mock port closed".to_string()));
        }

        let mut bus = self.bus.lock();
        bus.record(MockEventKind::Write, &self.path, data);

        if MockBus::take_counter(&mut bus.send_failures, &self.path) {
            self.connected = false;
            return Err(TransportError::SendFailed(format!(
                "Mock write failure on {}",
                self.path
            )));
        }

        let queued = bus.replies.get_mut(&self.path).and_then(VecDeque::pop_front);
        self.pending = queued.or_else(|| bus.default_reply.clone().map(MockReply::Data));
        drop(bus);

        self.stats.record_bytes_sent(data.len());
        debug!("Mock {} wrote {} bytes", self.path, data.len());
        Ok(data.len())
    }

    async fn receive(
        &mut self,
        buffer: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<usize, TransportError> {
        if !self.connected {
            return Err(TransportError::ReceiveFailed("Mock port closed".to_string()));
        }

        match self.pending.take() {
            Some(MockReply::Data(data)) => {
                let n = data.len().min(buffer.len());
                buffer[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    self.pending = Some(MockReply::Data(data[n..].to_vec()));
                }
                self.bus
                    .lock()
                    .record(MockEventKind::Read, &self.path, &data[..n]);
                self.stats.record_bytes_received(n);
                Ok(n)
            },
            Some(MockReply::Fault) => {
                self.connected = false;
                Err(TransportError::ReceiveFailed(format!(
                    "Mock read failure on {}",
                    self.path
                )))
            },
            Some(MockReply::Silence) | None => {
                let wait = timeout.unwrap_or(Duration::from_secs(1));
                tokio::time::sleep(wait).await;
                Err(TransportError::Timeout(format!(
                    "No data on {} within {wait:?}",
                    self.path
                )))
            },
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_mock_scripted_exchange() {
        let connector = MockConnector::new();
        connector.queue_reply("/dev/mock0", MockReply::Data(b"OK\r\n".to_vec()));

        let mut port = connector.open("/dev/mock0").await.unwrap();
        port.send(b"on 1\r").await.unwrap();

        let mut buf = [0u8; 16];
        let n = port.receive(&mut buf, None).await.unwrap();
        assert_eq!(&buf[..n], b"OK\r\n");

        // Nothing queued for the second read
        let err = port
            .receive(&mut buf, Some(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert!(err.is_timeout());

        assert_eq!(connector.writes("/dev/mock0"), vec![b"on 1\r".to_vec()]);
        assert_eq!(connector.open_count("/dev/mock0"), 1);
    }

    #[tokio::test]
    async fn test_mock_open_failure_is_counted() {
        let connector = MockConnector::new();
        connector.fail_next_opens("/dev/mock1", 1);

        assert!(connector.open("/dev/mock1").await.is_err());
        assert!(connector.open("/dev/mock1").await.is_ok());
        assert_eq!(connector.open_count("/dev/mock1"), 2);
    }

    #[tokio::test]
    async fn test_mock_fault_kills_port() {
        let connector = MockConnector::new();
        connector.queue_reply("/dev/mock2", MockReply::Fault);

        let mut port = connector.open("/dev/mock2").await.unwrap();
        port.send(b"x").await.unwrap();
        let mut buf = [0u8; 4];
        assert!(port.receive(&mut buf, None).await.is_err());
        assert!(!port.is_connected());
    }
}
