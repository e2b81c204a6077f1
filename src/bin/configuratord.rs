/*
 * topology-metricsd - asset-topology sensor assignment and composite-metric daemon
 * Copyright (c) 2026  Topology Metrics Daemon contributors
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! Configurator daemon entry point: parses CLI flags, synthesizes the
//! control-channel commands the flags imply, and drives the
//! [`Configurator`] actor to completion on a single-threaded runtime.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, LevelFilter};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use topology_metricsd::asset_store::resolve_port_aliases;
use topology_metricsd::bus::nats::NatsBusClient;
use topology_metricsd::configurator::Configurator;
use topology_metricsd::fsutil;
use topology_metricsd::logging;
use topology_metricsd::service_management::Manager;

/// The control channel's fixed asset-topology stream and matching pattern;
/// neither is exposed as a CLI flag (the control-channel vocabulary itself
/// is internal wiring, not operator-facing configuration).
const ASSET_STREAM: &str = "assets";
const ASSET_PATTERN: &str = ".*";
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Asset-topology composite-metrics configurator.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Directory the generated `.cfg` files are written to.
    #[arg(long)]
    output_dir: PathBuf,

    /// Path the asset-store snapshot is saved to and loaded from.
    #[arg(long)]
    state_file: PathBuf,

    /// Log level; overridden by BIOS_LOG_LEVEL if set.
    #[arg(long, env = "BIOS_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Message bus endpoint to connect to.
    #[arg(long)]
    bus_endpoint: String,

    /// Name this agent identifies itself as on the bus.
    #[arg(long)]
    agent_name: String,

    /// Propagate sensor assignments up the physical hierarchy.
    #[arg(long, default_value_t = true)]
    propagate: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = LevelFilter::from_str(&cli.log_level).unwrap_or(LevelFilter::Info);
    logging::setup_logging(level)?;

    if let Err(err) = fsutil::runtime(run(cli)) {
        error!("configurator exited with error: {err:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let bus = NatsBusClient::new();
    let service = Manager::detect();
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();

    let configurator = Configurator::new(
        bus,
        service,
        command_rx,
        cli.agent_name.clone(),
        resolve_port_aliases(),
        IDLE_TIMEOUT,
        cancel.clone(),
    );

    let startup_commands: Vec<Vec<String>> = vec![
        vec!["CONNECT".into(), cli.bus_endpoint.clone(), cli.agent_name.clone()],
        vec!["PRODUCER".into(), ASSET_STREAM.into()],
        vec!["CONSUMER".into(), ASSET_STREAM.into(), ASSET_PATTERN.into()],
        vec!["STATE_FILE".into(), cli.state_file.display().to_string()],
        vec!["CFG_DIRECTORY".into(), cli.output_dir.display().to_string()],
        vec!["LOAD".into()],
        vec!["IS_PROPAGATION_NEEDED".into(), cli.propagate.to_string()],
    ];
    for command in startup_commands {
        command_tx.send(command).context("queuing startup control command")?;
    }

    let shutdown_cancel = cancel.clone();
    tokio::task::spawn_local(async move {
        if let Err(err) = wait_for_shutdown_signal().await {
            error!("signal handling failed: {err:#}");
        }
        info!("shutdown signal received, terminating configurator");
        shutdown_cancel.cancel();
    });

    info!("configurator starting, agent={}", cli.agent_name);
    configurator.run().await
}

async fn wait_for_shutdown_signal() -> Result<()> {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = tokio::signal::ctrl_c() => {}
    }
    Ok(())
}
