//! Gateway configuration
//!
//! Layered with figment: built-in defaults, then the config file (YAML,
//! TOML or JSON by extension), then `DEVSRV_*` environment variables with
//! `__` separating nested keys, e.g.
//! `DEVSRV_LOCKERS__CHANNELS_PER_BOARD=8`.

use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use errors::{GatewayError, GatewayResult};

use super::mapper::DEFAULT_CHANNELS_PER_BOARD;
use super::projector::ProjectorProtocolType;
use super::relay::RelayTiming;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "DEVSRV_";

/// Default config file location
pub const DEFAULT_CONFIG_PATH: &str = "config/devsrv.yaml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "devsrv".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Daily-rolling log files go here when set
    pub dir: Option<PathBuf>,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
            json: false,
        }
    }
}

/// Relay boards and the lockers wired to them
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockersConfig {
    /// One port per board, in board order
    pub serial_ports: Vec<String>,
    pub channels_per_board: u16,
    /// Cap on addressable lockers below the physical channel count
    pub max: Option<i32>,
    pub commands_file: PathBuf,
    pub default_unlock_seconds: u64,
}

impl Default for LockersConfig {
    fn default() -> Self {
        Self {
            serial_ports: Vec::new(),
            channels_per_board: DEFAULT_CHANNELS_PER_BOARD,
            max: None,
            commands_file: PathBuf::from("commands.json"),
            default_unlock_seconds: 10,
        }
    }
}

/// Serial line timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub response_delay_ms: u64,
    pub max_window_ms: u64,
    /// Silence after a command counts as success
    pub assume_success_on_silence: bool,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: 1000,
            write_timeout_ms: 1000,
            response_delay_ms: 200,
            max_window_ms: 2000,
            assume_success_on_silence: true,
        }
    }
}

impl SerialConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn timing(&self) -> RelayTiming {
        RelayTiming {
            response_delay: Duration::from_millis(self.response_delay_ms),
            max_window: Duration::from_millis(self.max_window_ms),
            assume_success_on_silence: self.assume_success_on_silence,
        }
    }
}

/// A projector known by id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredProjector {
    pub id: u32,
    #[serde(default)]
    pub name: String,
    pub address: String,
    pub protocol: ProjectorProtocolType,
    /// Overrides the protocol's standard TCP port
    #[serde(default)]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectorsConfig {
    pub timeout_ms: u64,
    pub registered: Vec<RegisteredProjector>,
}

impl Default for ProjectorsConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5000,
            registered: Vec::new(),
        }
    }
}

impl ProjectorsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn find(&self, id: u32) -> Option<&RegisteredProjector> {
        self.registered.iter().find(|p| p.id == id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub interval_secs: u64,
    /// Period of the CPU/RAM/runtime resource log
    pub metrics_interval_secs: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            metrics_interval_secs: 60,
        }
    }
}

/// Complete gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub service: ServiceConfig,
    pub logging: LoggingConfig,
    pub lockers: LockersConfig,
    pub serial: SerialConfig,
    pub projectors: ProjectorsConfig,
    pub watchdog: WatchdogConfig,
}

impl GatewayConfig {
    /// Load defaults, then `path` if it exists, then the environment
    pub fn load(path: impl AsRef<Path>) -> GatewayResult<Self> {
        let path = path.as_ref();
        let mut figment = Figment::from(Serialized::defaults(GatewayConfig::default()));

        if path.exists() {
            let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("yaml");
            figment = match extension {
                "yaml" | "yml" => figment.merge(Yaml::file(path)),
                "toml" => figment.merge(Toml::file(path)),
                "json" => figment.merge(Json::file(path)),
                other => {
                    return Err(GatewayError::Configuration(format!(
                        "Unsupported config format: {other}"
                    )))
                },
            };
            debug!("Merging config file {}", path.display());
        } else {
            debug!("Config file {} not found, using defaults", path.display());
        }

        Self::extract(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Extract and validate from a prepared figment
    pub fn extract(figment: Figment) -> GatewayResult<Self> {
        let config: GatewayConfig = figment
            .extract()
            .map_err(|e| GatewayError::Configuration(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject structurally impossible settings.
    ///
    /// An empty port list is allowed here; requests fail individually.
    pub fn validate(&self) -> GatewayResult<()> {
        let invalid = |field: &str, reason: &str| {
            Err(GatewayError::InvalidConfig {
                field: field.to_string(),
                reason: reason.to_string(),
            })
        };

        if self.lockers.channels_per_board == 0 {
            return invalid("lockers.channels_per_board", "must be at least 1");
        }
        if self.lockers.max.is_some_and(|m| m < 0) {
            return invalid("lockers.max", "must not be negative");
        }
        if self.lockers.serial_ports.iter().any(|p| p.trim().is_empty()) {
            return invalid("lockers.serial_ports", "port paths must not be empty");
        }
        if self.serial.read_timeout_ms == 0 || self.serial.write_timeout_ms == 0 {
            return invalid("serial", "read and write timeouts must be greater than zero");
        }
        if self.serial.max_window_ms == 0 {
            return invalid("serial.max_window_ms", "must be greater than zero");
        }
        if self.serial.response_delay_ms >= self.serial.max_window_ms {
            return invalid(
                "serial.response_delay_ms",
                "must be shorter than serial.max_window_ms",
            );
        }
        if self.projectors.timeout_ms == 0 {
            return invalid("projectors.timeout_ms", "must be greater than zero");
        }
        if self.watchdog.interval_secs == 0 {
            return invalid("watchdog.interval_secs", "must be greater than zero");
        }
        if self.watchdog.metrics_interval_secs == 0 {
            return invalid("watchdog.metrics_interval_secs", "must be greater than zero");
        }

        let mut ids = HashSet::new();
        for projector in &self.projectors.registered {
            if !ids.insert(projector.id) {
                return invalid("projectors.registered", &format!("duplicate id {}", projector.id));
            }
            if projector.address.parse::<IpAddr>().is_err() {
                return invalid(
                    "projectors.registered",
                    &format!("projector {} address {:?} is not an IP", projector.id, projector.address),
                );
            }
        }

        Ok(())
    }

    /// Effective configuration as YAML
    pub fn to_yaml(&self) -> GatewayResult<String> {
        serde_yaml::to_string(self).map_err(|e| GatewayError::Serialization(e.to_string()))
    }
}
