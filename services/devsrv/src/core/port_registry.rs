//! Serial port registry
//!
//! One persistent connection per physical port, opened lazily on first use
//! and kept across commands. Each path has a FIFO async mutex that doubles
//! as the port's single-permit gate: holding a [`PortGuard`] is the only way
//! to touch the handle, so at most one command is in flight per port and
//! waiters are served in arrival order.
//!
//! A handle that faults is evicted (closed and dropped); the next
//! [`PortRegistry::acquire`] for that path reopens it.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use super::transport::{PortConnector, Transport, TransportError, TransportStats};

type Slot = Arc<Mutex<Option<Box<dyn Transport>>>>;

#[derive(Debug, Default)]
struct PortCounters {
    opens: AtomicU64,
    failed_opens: AtomicU64,
    evictions: AtomicU64,
}

/// Diagnostic view of one registered port
#[derive(Debug, Clone, Serialize)]
pub struct PortSnapshot {
    pub path: String,
    /// `None` while a command holds the gate
    pub open: Option<bool>,
    pub opens: u64,
    pub failed_opens: u64,
    pub evictions: u64,
    pub stats: Option<TransportStats>,
}

/// Exclusive access to one port for the duration of a command
pub struct PortGuard {
    path: String,
    slot: OwnedMutexGuard<Option<Box<dyn Transport>>>,
    counters: Arc<PortCounters>,
}

impl PortGuard {
    /// The open handle; `ConnectionLost` once evicted
    pub fn transport(&mut self) -> Result<&mut Box<dyn Transport>, TransportError> {
        self.slot
            .as_mut()
            .ok_or_else(|| TransportError::ConnectionLost(format!("{} was evicted", self.path)))
    }

    /// Close and drop the handle so the next acquire reopens the port
    pub async fn evict(&mut self) {
        if let Some(mut transport) = self.slot.take() {
            if let Err(e) = transport.disconnect().await {
                debug!("Ignoring close error on {}: {e}", self.path);
            }
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            warn!("Evicted port handle {}", self.path);
        }
    }
}

impl std::fmt::Debug for PortGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortGuard")
            .field("path", &self.path)
            .field("open", &self.slot.is_some())
            .finish()
    }
}

/// Owns every serial port handle and its gate
#[derive(Debug)]
pub struct PortRegistry {
    connector: Arc<dyn PortConnector>,
    slots: DashMap<String, Slot>,
    counters: DashMap<String, Arc<PortCounters>>,
}

impl PortRegistry {
    pub fn new(connector: Arc<dyn PortConnector>) -> Self {
        Self {
            connector,
            slots: DashMap::new(),
            counters: DashMap::new(),
        }
    }

    /// Wait for the port gate, opening the port if no live handle is cached.
    ///
    /// Open failures are returned as-is and not retried; the gate is
    /// released so the next caller tries again.
    pub async fn acquire(&self, path: &str) -> Result<PortGuard, TransportError> {
        // Clone the Arc out so no map shard lock is held across the await
        let slot = self
            .slots
            .entry(path.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone();
        let counters = self.counters(path);

        let mut guard = slot.lock_owned().await;

        if guard.as_ref().is_some_and(|t| !t.is_connected()) {
            debug!("Dropping dead handle for {path}");
            *guard = None;
            counters.evictions.fetch_add(1, Ordering::Relaxed);
        }

        if guard.is_none() {
            match self.connector.open(path).await {
                Ok(transport) => {
                    counters.opens.fetch_add(1, Ordering::Relaxed);
                    info!("Port {path} opened");
                    *guard = Some(transport);
                },
                Err(e) => {
                    counters.failed_opens.fetch_add(1, Ordering::Relaxed);
                    warn!("Port {path} failed to open: {e}");
                    return Err(e);
                },
            }
        }

        Ok(PortGuard {
            path: path.to_string(),
            slot: guard,
            counters,
        })
    }

    /// Number of `paths` with a live handle; ports busy with a command count as open
    pub fn open_count<'a>(&self, paths: impl IntoIterator<Item = &'a String>) -> usize {
        paths
            .into_iter()
            .filter(|path| self.is_open(path).unwrap_or(true))
            .count()
    }

    /// `Some(open)` when idle, `None` while a command holds the gate
    pub fn is_open(&self, path: &str) -> Option<bool> {
        let Some(slot) = self.slots.get(path).map(|s| s.value().clone()) else {
            return Some(false);
        };
        let guard = slot.try_lock().ok()?;
        Some(guard.as_ref().is_some_and(|t| t.is_connected()))
    }

    /// Diagnostics for every port the registry has seen
    pub fn snapshot(&self) -> Vec<PortSnapshot> {
        let mut ports: Vec<PortSnapshot> = self
            .slots
            .iter()
            .map(|entry| {
                let path = entry.key().clone();
                let counters = self.counters(&path);
                let (open, stats) = match entry.value().try_lock() {
                    Ok(guard) => (
                        Some(guard.as_ref().is_some_and(|t| t.is_connected())),
                        guard.as_ref().map(|t| t.stats()),
                    ),
                    Err(_) => (None, None),
                };
                PortSnapshot {
                    path,
                    open,
                    opens: counters.opens.load(Ordering::Relaxed),
                    failed_opens: counters.failed_opens.load(Ordering::Relaxed),
                    evictions: counters.evictions.load(Ordering::Relaxed),
                    stats,
                }
            })
            .collect();
        ports.sort_by(|a, b| a.path.cmp(&b.path));
        ports
    }

    /// Close every cached handle, waiting for in-flight commands to finish
    pub async fn close_all(&self) {
        let slots: Vec<(String, Slot)> = self
            .slots
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        for (path, slot) in slots {
            let mut guard = slot.lock().await;
            if let Some(mut transport) = guard.take() {
                if let Err(e) = transport.disconnect().await {
                    warn!("Error closing {path}: {e}");
                }
                info!("Port {path} closed");
            }
        }
    }

    fn counters(&self, path: &str) -> Arc<PortCounters> {
        self.counters
            .entry(path.to_string())
            .or_default()
            .clone()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::core::transport::mock::{MockConnector, MockEventKind, MockReply};
    use std::time::Duration;

    const PORT: &str = "/dev/ttyMOCK0";

    fn registry() -> (MockConnector, Arc<PortRegistry>) {
        let connector = MockConnector::new();
        let registry = Arc::new(PortRegistry::new(Arc::new(connector.clone())));
        (connector, registry)
    }

    #[tokio::test]
    async fn test_handle_is_reused_across_commands() {
        let (connector, registry) = registry();

        for _ in 0..3 {
            let mut guard = registry.acquire(PORT).await.unwrap();
            guard.transport().unwrap().send(b"x").await.unwrap();
        }

        assert_eq!(connector.open_count(PORT), 1);
        assert_eq!(registry.is_open(PORT), Some(true));
    }

    #[tokio::test]
    async fn test_failed_open_is_surfaced_then_retried() {
        let (connector, registry) = registry();
        connector.fail_next_opens(PORT, 1);

        let err = registry.acquire(PORT).await.unwrap_err();
        assert!(matches!(err, TransportError::ConnectionFailed(_)));

        // The gate was released and the next call reopens
        assert!(registry.acquire(PORT).await.is_ok());
        assert_eq!(connector.open_count(PORT), 2);

        let snap = registry.snapshot();
        assert_eq!(snap[0].failed_opens, 1);
        assert_eq!(snap[0].opens, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fault_evicts_and_next_acquire_reopens() {
        let (connector, registry) = registry();
        connector.queue_reply(PORT, MockReply::Fault);

        {
            let mut guard = registry.acquire(PORT).await.unwrap();
            let transport = guard.transport().unwrap();
            transport.send(b"on").await.unwrap();
            let mut buf = [0u8; 8];
            assert!(transport.receive(&mut buf, None).await.is_err());
            guard.evict().await;
            assert!(guard.transport().is_err());
        }

        registry.acquire(PORT).await.unwrap();
        assert_eq!(connector.open_count(PORT), 2);
    }

    #[tokio::test]
    async fn test_dead_handle_is_replaced_without_explicit_evict() {
        let (connector, registry) = registry();
        connector.fail_next_sends(PORT, 1);

        {
            let mut guard = registry.acquire(PORT).await.unwrap();
            assert!(guard.transport().unwrap().send(b"x").await.is_err());
        }

        registry.acquire(PORT).await.unwrap();
        assert_eq!(connector.open_count(PORT), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gate_serializes_same_port() {
        let (connector, registry) = registry();
        connector.set_default_reply(Some(b"OK\r\n"));

        let mut tasks = Vec::new();
        for i in 0..4u8 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                let mut guard = registry.acquire(PORT).await.unwrap();
                let transport = guard.transport().unwrap();
                transport.send(&[i]).await.unwrap();
                tokio::time::sleep(Duration::from_millis(200)).await;
                let mut buf = [0u8; 8];
                transport.receive(&mut buf, None).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let kinds: Vec<MockEventKind> = connector
            .events()
            .into_iter()
            .filter(|e| e.kind != MockEventKind::Open)
            .map(|e| e.kind)
            .collect();
        assert_eq!(kinds.len(), 8);
        for pair in kinds.chunks(2) {
            assert_eq!(pair, [MockEventKind::Write, MockEventKind::Read]);
        }
    }

    #[tokio::test]
    async fn test_close_all() {
        let (connector, registry) = registry();
        registry.acquire(PORT).await.unwrap();
        registry.acquire("/dev/ttyMOCK1").await.unwrap();

        let ports = vec![PORT.to_string(), "/dev/ttyMOCK1".to_string()];
        assert_eq!(registry.open_count(&ports), 2);

        registry.close_all().await;
        assert_eq!(registry.open_count(&ports), 0);
        let closes = connector
            .events()
            .iter()
            .filter(|e| e.kind == MockEventKind::Close)
            .count();
        assert_eq!(closes, 2);
    }
}
