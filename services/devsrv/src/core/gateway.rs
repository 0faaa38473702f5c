//! Device gateway
//!
//! The single entry point the HTTP layer calls. Lockers are resolved to a
//! port and channel, driven through the relay commander and latched in the
//! state cache; unlocks schedule a relock. Projector calls build a fresh
//! control per request.
//!
//! Operations return `Err` only when the request is rejected before any
//! hardware I/O. Every hardware outcome, faults included, comes back as a
//! structured result.

use common::system_metrics::{MetricsSampler, SystemMetrics};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use errors::{GatewayError, GatewayResult};

use super::board_status::{parse_status_frame, BoardStatus, ChannelReading};
use super::commands::CommandTable;
use super::config::GatewayConfig;
use super::mapper::{map_channel, ChannelMapper, RelayAddress};
use super::port_registry::{PortRegistry, PortSnapshot};
use super::projector::{
    ProjectorCommandResult, ProjectorControl, ProjectorControlFactory, ProjectorProtocolType,
};
use super::relay::{RelayCommander, SerialCommandResult};
use super::relock::RelockScheduler;
use super::state_cache::{LockerState, LockerStateCache};
use super::transport::{PortConnector, SerialPortConnector};

/// Result of a lock or unlock request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockerCommandResult {
    pub locker_number: i32,
    pub port: String,
    pub channel: u16,
    #[serde(flatten)]
    pub outcome: SerialCommandResult,
    /// Set when an unlock scheduled its relock
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relock_after_ms: Option<u64>,
}

impl LockerCommandResult {
    pub fn success(&self) -> bool {
        self.outcome.success
    }
}

/// Port health as seen by the watchdog
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayHealth {
    pub configured_ports: usize,
    pub open_ports: usize,
    pub pending_relocks: usize,
    pub unlocked_lockers: usize,
    pub shutting_down: bool,
    pub ports: Vec<PortSnapshot>,
    /// Last resource sample, absent until the monitor has run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemMetrics>,
}

impl GatewayHealth {
    /// Nothing configured, or at least one port open
    pub fn is_healthy(&self) -> bool {
        !self.shutting_down && (self.configured_ports == 0 || self.open_ports > 0)
    }
}

#[derive(Debug)]
struct GatewayInner {
    config: GatewayConfig,
    mapper: ChannelMapper,
    registry: Arc<PortRegistry>,
    relay: RelayCommander,
    cache: LockerStateCache,
    relocks: RelockScheduler,
    projectors: ProjectorControlFactory,
    shutting_down: AtomicBool,
    last_metrics: Mutex<Option<SystemMetrics>>,
}

/// Cheap-to-clone handle to the gateway
#[derive(Debug, Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

impl Gateway {
    /// Build a gateway with an explicit command table and port connector
    pub fn new(config: GatewayConfig, commands: CommandTable, connector: Arc<dyn PortConnector>) -> Self {
        let registry = Arc::new(PortRegistry::new(connector));
        let mapper = ChannelMapper::new(
            config.lockers.serial_ports.clone(),
            config.lockers.channels_per_board,
            config.lockers.max,
        );
        let relay = RelayCommander::new(registry.clone(), Arc::new(commands), config.serial.timing());
        let projectors = ProjectorControlFactory::new(config.projectors.timeout());

        info!(
            "Gateway ready: {} boards, {} channels per board, {} lockers, {} projectors",
            mapper.ports().len(),
            mapper.channels_per_board(),
            mapper.capacity(),
            config.projectors.registered.len()
        );

        Self {
            inner: Arc::new(GatewayInner {
                config,
                mapper,
                registry,
                relay,
                cache: LockerStateCache::new(),
                relocks: RelockScheduler::new(CancellationToken::new()),
                projectors,
                shutting_down: AtomicBool::new(false),
                last_metrics: Mutex::new(None),
            }),
        }
    }

    /// Load the command table named in `config` and drive real serial ports
    pub fn from_config(config: GatewayConfig) -> GatewayResult<Self> {
        let commands = CommandTable::load(&config.lockers.commands_file)?;
        let connector = SerialPortConnector::new(
            config.serial.read_timeout(),
            config.serial.write_timeout(),
        );
        Ok(Self::new(config, commands, Arc::new(connector)))
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    /// Number of addressable lockers
    pub fn capacity(&self) -> i32 {
        self.inner.mapper.capacity()
    }

    // ------------------------------------------------------------------
    // Lockers
    // ------------------------------------------------------------------

    /// Release a locker and schedule its relock.
    ///
    /// The latch is set only when the board confirmed the command. The
    /// relock is scheduled whenever the command reached the port layer.
    pub async fn unlock(&self, locker: i32, duration: Option<Duration>) -> GatewayResult<LockerCommandResult> {
        self.ensure_running()?;
        let address = self.inner.mapper.resolve(locker)?;
        let duration = duration.unwrap_or_else(|| {
            Duration::from_secs(self.inner.config.lockers.default_unlock_seconds)
        });

        let outcome = self
            .inner
            .relay
            .send(&address.port, address.channel, true)
            .await?;

        if outcome.success {
            self.inner.cache.mark_unlocked(locker);
            info!("Unlocked locker {locker} on {} channel {}", address.port, address.channel);
        } else {
            warn!("Unlock of locker {locker} not confirmed");
        }

        let gateway = self.clone();
        let scheduled = self.inner.relocks.schedule(locker, duration, move || async move {
            gateway.relock(locker).await;
        });

        Ok(LockerCommandResult {
            locker_number: locker,
            port: address.port,
            channel: address.channel,
            outcome,
            relock_after_ms: scheduled.then(|| duration.as_millis() as u64),
        })
    }

    /// Lock a locker now
    pub async fn lock(&self, locker: i32) -> GatewayResult<LockerCommandResult> {
        self.ensure_running()?;
        let address = self.inner.mapper.resolve(locker)?;
        self.lock_address(address).await
    }

    /// Soft latch of every addressable locker
    pub fn get_statuses(&self) -> Vec<LockerState> {
        self.inner.cache.snapshot(1..=self.capacity())
    }

    /// Soft latch of one locker
    pub fn get_status(&self, locker: i32) -> GatewayResult<LockerState> {
        self.inner.mapper.resolve(locker)?;
        Ok(self.inner.cache.state(locker))
    }

    /// Switch every channel of a board and latch its lockers on success
    pub async fn set_all_channels(&self, board_index: usize, on: bool) -> GatewayResult<SerialCommandResult> {
        self.ensure_running()?;
        let port = self.inner.mapper.port(board_index)?.to_string();
        let outcome = self.inner.relay.send_all_channels(&port, on).await?;

        if outcome.success {
            for locker in self.inner.mapper.board_lockers(board_index) {
                if on {
                    self.inner.cache.mark_unlocked(locker);
                } else {
                    self.inner.cache.mark_locked(locker);
                }
            }
            info!(
                "All channels on board {board_index} switched {}",
                if on { "on" } else { "off" }
            );
        }
        Ok(outcome)
    }

    // ------------------------------------------------------------------
    // Hardware readback
    // ------------------------------------------------------------------

    /// Ask one board for its channel bitfield
    pub async fn read_board_status(&self, board_index: usize) -> GatewayResult<BoardStatus> {
        self.ensure_running()?;
        let port = self.inner.mapper.port(board_index)?.to_string();
        let raw = self.inner.relay.query_status(&port).await?;
        let bits = parse_status_frame(&raw)?;

        let cpb = self.inner.mapper.channels_per_board();
        let channels = self
            .inner
            .mapper
            .board_lockers(board_index)
            .map(|locker| {
                let (_, channel) = map_channel(locker, cpb);
                ChannelReading {
                    locker,
                    channel,
                    energized: bits.is_energized(channel),
                }
            })
            .collect();

        Ok(BoardStatus {
            board_index,
            port,
            raw,
            channels,
        })
    }

    /// Read every board, skipping the ones that fail
    pub async fn read_hardware_statuses(&self) -> GatewayResult<Vec<BoardStatus>> {
        self.ensure_running()?;
        let boards = self.inner.mapper.ports().len();
        if boards == 0 {
            return Err(GatewayError::Configuration(
                "No serial ports configured".to_string(),
            ));
        }

        let mut statuses = Vec::with_capacity(boards);
        for board_index in 0..boards {
            match self.read_board_status(board_index).await {
                Ok(status) => statuses.push(status),
                Err(e) => warn!("Skipping board {board_index}: {e}"),
            }
        }
        Ok(statuses)
    }

    // ------------------------------------------------------------------
    // Projectors
    // ------------------------------------------------------------------

    pub async fn projector_on(&self, address: &str, protocol: ProjectorProtocolType) -> GatewayResult<ProjectorCommandResult> {
        Ok(self.projector(address, protocol, None)?.on().await)
    }

    pub async fn projector_off(&self, address: &str, protocol: ProjectorProtocolType) -> GatewayResult<ProjectorCommandResult> {
        Ok(self.projector(address, protocol, None)?.off().await)
    }

    pub async fn projector_status(&self, address: &str, protocol: ProjectorProtocolType) -> GatewayResult<ProjectorCommandResult> {
        Ok(self.projector(address, protocol, None)?.status().await)
    }

    pub async fn projector_on_by_id(&self, id: u32) -> GatewayResult<ProjectorCommandResult> {
        Ok(self.registered_projector(id)?.on().await)
    }

    pub async fn projector_off_by_id(&self, id: u32) -> GatewayResult<ProjectorCommandResult> {
        Ok(self.registered_projector(id)?.off().await)
    }

    pub async fn projector_status_by_id(&self, id: u32) -> GatewayResult<ProjectorCommandResult> {
        Ok(self.registered_projector(id)?.status().await)
    }

    fn projector(
        &self,
        address: &str,
        protocol: ProjectorProtocolType,
        port: Option<u16>,
    ) -> GatewayResult<ProjectorControl> {
        self.ensure_running()?;
        self.inner.projectors.create_with_port(address, protocol, port)
    }

    fn registered_projector(&self, id: u32) -> GatewayResult<ProjectorControl> {
        let projector = self.inner.config.projectors.find(id).ok_or_else(|| {
            GatewayError::invalid_address(format!("projector {id}"), "no projector registered with this id")
        })?;
        debug!("Projector {id} ({}) at {}", projector.name, projector.address);
        self.projector(&projector.address, projector.protocol, projector.port)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Open every configured port now; returns how many opened
    pub async fn warm_up(&self) -> usize {
        let mut opened = 0;
        for path in self.inner.mapper.ports() {
            match self.inner.registry.acquire(path).await {
                Ok(_guard) => opened += 1,
                Err(e) => warn!("Warm-up of {path} failed: {e}"),
            }
        }
        info!("Warm-up opened {opened}/{} ports", self.inner.mapper.ports().len());
        opened
    }

    pub fn health(&self) -> GatewayHealth {
        let ports = self.inner.mapper.ports();
        GatewayHealth {
            configured_ports: ports.len(),
            open_ports: self.inner.registry.open_count(ports),
            pending_relocks: self.inner.relocks.pending(),
            unlocked_lockers: self.inner.cache.unlocked_count(),
            shutting_down: self.is_shutting_down(),
            ports: self.inner.registry.snapshot(),
            system: self.inner.last_metrics.lock().clone(),
        }
    }

    /// Check port health every `interval` and re-open ports when none is open
    pub async fn run_watchdog(&self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let health = self.health();
                    if health.is_healthy() {
                        debug!("Watchdog: {}/{} ports open", health.open_ports, health.configured_ports);
                    } else if !health.shutting_down {
                        warn!("Watchdog: no serial port open, re-opening");
                        self.warm_up().await;
                    }
                },
            }
        }
        debug!("Watchdog stopped");
    }

    /// Log process CPU, memory and runtime load every `interval`
    pub async fn run_resource_monitor(&self, interval: Duration, cancel: CancellationToken) {
        let mut sampler = MetricsSampler::new();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // Baseline for the CPU delta
        ticker.tick().await;
        sampler.sample();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let metrics = sampler.sample();
                    info!("Resources: {}", metrics.summary());
                    *self.inner.last_metrics.lock() = Some(metrics);
                },
            }
        }
        debug!("Resource monitor stopped");
    }

    /// Wait until every relock scheduled so far has run
    pub async fn wait_for_relocks(&self) {
        self.inner.relocks.wait_idle().await;
    }

    /// Cancel pending relocks, wait for running ones, close every port
    pub async fn shutdown(&self) {
        if self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Gateway shutting down");
        self.inner.relocks.shutdown().await;
        self.inner.registry.close_all().await;
        info!("Gateway stopped");
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }

    async fn relock(&self, locker: i32) {
        let address = match self.inner.mapper.resolve(locker) {
            Ok(address) => address,
            Err(e) => {
                warn!("Relock of locker {locker} skipped: {e}");
                return;
            },
        };

        match self.lock_address(address).await {
            Ok(result) if result.success() => info!("Relocked locker {locker}"),
            Ok(result) => warn!(
                "Failed to relock locker {locker}: {}",
                result.outcome.message.as_deref().unwrap_or("no detail")
            ),
            Err(e) => warn!("Failed to relock locker {locker}: {e}"),
        }
    }

    async fn lock_address(&self, address: RelayAddress) -> GatewayResult<LockerCommandResult> {
        let outcome = self
            .inner
            .relay
            .send(&address.port, address.channel, false)
            .await?;

        if outcome.success {
            self.inner.cache.mark_locked(address.locker);
        }

        Ok(LockerCommandResult {
            locker_number: address.locker,
            port: address.port,
            channel: address.channel,
            outcome,
            relock_after_ms: None,
        })
    }

    fn ensure_running(&self) -> GatewayResult<()> {
        if self.is_shutting_down() {
            return Err(GatewayError::ShuttingDown);
        }
        Ok(())
    }
}
