//! Device Gateway (`devsrv`)
//!
//! Drives relay-board lockers and network projectors from the command line,
//! or serves as a long-running process keeping the serial ports warm.

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::time::Duration;
use tracing::{error, info};

use devsrv::core::bootstrap::{self, Args, Command, ProjectorAction, ProjectorTarget, SwitchState};
use devsrv::{Gateway, GatewayConfig, GatewayError, ProjectorCommandResult};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = bootstrap::load_config(&args).context("Failed to load configuration")?;
    bootstrap::initialize_logging(&config.service.name, &config.logging, args.no_color)?;

    if let Command::Config = args.command {
        print!("{}", config.to_yaml()?);
        return Ok(());
    }

    let gateway = Gateway::from_config(config.clone()).context("Failed to build gateway")?;
    let outcome = run(&gateway, &config, args.command).await;
    gateway.shutdown().await;

    if let Err(e) = &outcome {
        if let Some(err) = e.downcast_ref::<GatewayError>() {
            eprintln!("{}", serde_json::to_string_pretty(&err.to_error_info())?);
        }
    }
    outcome
}

async fn run(gateway: &Gateway, config: &GatewayConfig, command: Command) -> Result<()> {
    match command {
        Command::Serve => serve(gateway, config).await,
        Command::Unlock { locker, duration } => {
            let result = gateway
                .unlock(locker, duration.map(Duration::from_secs))
                .await?;
            print_json(&result)?;
            if result.relock_after_ms.is_some() {
                info!("Waiting for locker {locker} to relock");
                gateway.wait_for_relocks().await;
            }
            Ok(())
        },
        Command::Lock { locker } => print_json(&gateway.lock(locker).await?),
        Command::Status { hardware: false } => print_json(&gateway.get_statuses()),
        Command::Status { hardware: true } => print_json(&gateway.read_hardware_statuses().await?),
        Command::AllChannels { board, state } => {
            print_json(&gateway.set_all_channels(board, state == SwitchState::On).await?)
        },
        Command::Projector { action, target } => {
            print_json(&projector(gateway, action, target).await?)
        },
        Command::Config => Ok(()),
    }
}

async fn serve(gateway: &Gateway, config: &GatewayConfig) -> Result<()> {
    let opened = gateway.warm_up().await;
    let configured = config.lockers.serial_ports.len();
    if configured > 0 && opened == 0 {
        error!("No serial port could be opened; the watchdog will keep retrying");
    }

    let cancel = common::shutdown::shutdown_token();
    let watchdog = tokio::spawn({
        let gateway = gateway.clone();
        let cancel = cancel.clone();
        let interval = Duration::from_secs(config.watchdog.interval_secs);
        async move { gateway.run_watchdog(interval, cancel).await }
    });
    let monitor = tokio::spawn({
        let gateway = gateway.clone();
        let cancel = cancel.clone();
        let interval = Duration::from_secs(config.watchdog.metrics_interval_secs);
        async move { gateway.run_resource_monitor(interval, cancel).await }
    });

    info!("devsrv running: {configured} ports, {} lockers", gateway.capacity());
    cancel.cancelled().await;

    if let Err(e) = watchdog.await {
        error!("Watchdog task failed: {e}");
    }
    if let Err(e) = monitor.await {
        error!("Resource monitor task failed: {e}");
    }
    Ok(())
}

async fn projector(
    gateway: &Gateway,
    action: ProjectorAction,
    target: ProjectorTarget,
) -> Result<ProjectorCommandResult> {
    let result = match (target.id, target.address, target.protocol) {
        (Some(id), _, _) => match action {
            ProjectorAction::On => gateway.projector_on_by_id(id).await?,
            ProjectorAction::Off => gateway.projector_off_by_id(id).await?,
            ProjectorAction::Status => gateway.projector_status_by_id(id).await?,
        },
        (None, Some(address), Some(protocol)) => match action {
            ProjectorAction::On => gateway.projector_on(&address, protocol).await?,
            ProjectorAction::Off => gateway.projector_off(&address, protocol).await?,
            ProjectorAction::Status => gateway.projector_status(&address, protocol).await?,
        },
        _ => anyhow::bail!("Either --id or --address with --protocol is required"),
    };
    Ok(result)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
