//! Service Bootstrap and Initialization
//!
//! Command-line parsing, configuration loading with CLI overrides, and
//! logging setup for the `devsrv` binary.

use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use errors::{GatewayError, GatewayResult};

use super::config::{GatewayConfig, LoggingConfig, DEFAULT_CONFIG_PATH};
use super::projector::ProjectorProtocolType;

/// Command-line arguments for devsrv
#[derive(Parser, Debug, Clone)]
#[command(
    name = "devsrv",
    version = env!("CARGO_PKG_VERSION"),
    about = "Device gateway for serial relay boards and network projectors",
    long_about = None
)]
pub struct Args {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short = 'c', long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short = 'l', long, global = true)]
    pub log_level: Option<String>,

    /// Directory for daily-rolling log files; overrides the config file
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Open every port and run until SIGINT/SIGTERM
    Serve,
    /// Unlock a locker and wait for its relock
    Unlock {
        locker: i32,
        /// Seconds before the relock; defaults to lockers.default_unlock_seconds
        #[arg(short, long)]
        duration: Option<u64>,
    },
    /// Lock a locker now
    Lock { locker: i32 },
    /// Print locker states
    Status {
        /// Read the channel bitfield from every board instead of the soft latch
        #[arg(long)]
        hardware: bool,
    },
    /// Switch every channel of one board
    AllChannels {
        board: usize,
        #[arg(value_enum)]
        state: SwitchState,
    },
    /// Control a projector
    Projector {
        #[arg(value_enum)]
        action: ProjectorAction,
        #[command(flatten)]
        target: ProjectorTarget,
    },
    /// Print the effective configuration
    Config,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchState {
    On,
    Off,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectorAction {
    On,
    Off,
    Status,
}

/// Either a registered projector id or an ad-hoc address and protocol
#[derive(ClapArgs, Debug, Clone)]
#[group(required = true, multiple = true)]
pub struct ProjectorTarget {
    /// Registered projector id
    #[arg(long, conflicts_with_all = ["address", "protocol"])]
    pub id: Option<u32>,

    /// Projector IP address
    #[arg(long, requires = "protocol")]
    pub address: Option<String>,

    /// rs232, pjlink or pjtalk
    #[arg(long, requires = "address")]
    pub protocol: Option<ProjectorProtocolType>,
}

/// Load the configuration and apply CLI overrides.
///
/// A relative `lockers.commands_file` resolves against the config file's
/// directory when the config file exists.
pub fn load_config(args: &Args) -> GatewayResult<GatewayConfig> {
    let mut config = GatewayConfig::load(&args.config)?;

    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if let Some(dir) = &args.log_dir {
        config.logging.dir = Some(dir.clone());
    }

    if args.config.exists() {
        config.lockers.commands_file =
            resolve_relative(&args.config, &config.lockers.commands_file);
    }
    debug!("Command table: {}", config.lockers.commands_file.display());

    Ok(config)
}

fn resolve_relative(config_path: &Path, file: &Path) -> PathBuf {
    if file.is_absolute() {
        return file.to_path_buf();
    }
    match config_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.join(file),
        _ => file.to_path_buf(),
    }
}

/// Initialize logging from the `logging` section
pub fn initialize_logging(
    service_name: &str,
    logging: &LoggingConfig,
    no_color: bool,
) -> GatewayResult<()> {
    let log_config = common::logging::LogConfig {
        service_name: service_name.to_string(),
        log_dir: logging.dir.clone(),
        console_level: common::logging::parse_level(&logging.level),
        enable_json: logging.json,
        ansi: !no_color,
    };

    common::logging::init_with_config(log_config)
        .map_err(|e| GatewayError::Configuration(format!("Failed to init logging: {e}")))?;

    info!("{service_name} {} starting", env!("CARGO_PKG_VERSION"));
    Ok(())
}
