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

//! Compute-worker daemon entry point: one process per composite-metric
//! definition, spawned as a templated service instance by the
//! configurator's `ServiceController`.

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, LevelFilter};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use topology_metricsd::bus::nats::NatsBusClient;
use topology_metricsd::compute_worker::ComputeWorker;
use topology_metricsd::evaluator::ArithmeticDsl;
use topology_metricsd::fsutil;
use topology_metricsd::logging;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Name this agent identifies itself as on the bus.
    #[arg(long)]
    agent_name: String,

    /// Message bus endpoint to connect to.
    #[arg(long)]
    bus_endpoint: String,

    /// Path to the `.cfg` JSON definition emitted by the configurator.
    #[arg(long)]
    config: PathBuf,

    /// Log level; overridden by BIOS_LOG_LEVEL if set.
    #[arg(long, env = "BIOS_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = LevelFilter::from_str(&cli.log_level).unwrap_or(LevelFilter::Info);
    logging::setup_logging(level)?;

    if let Err(err) = fsutil::runtime(run(cli)) {
        error!("compute worker exited with error: {err:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let bus = NatsBusClient::new();
    let (_command_tx, command_rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();

    let mut worker = ComputeWorker::new(bus, ArithmeticDsl, command_rx, cancel.clone());
    worker
        .connect(&cli.bus_endpoint, &cli.agent_name)
        .await
        .with_context(|| format!("connecting to bus at {}", cli.bus_endpoint))?;
    worker
        .load(&cli.config)
        .await
        .with_context(|| format!("loading config {}", cli.config.display()))?;

    tokio::task::spawn_local(async move {
        if let Err(err) = wait_for_shutdown_signal().await {
            error!("signal handling failed: {err:#}");
        }
        info!("shutdown signal received, terminating compute worker");
        cancel.cancel();
    });

    info!("compute worker starting, agent={}, config={}", cli.agent_name, cli.config.display());
    worker.run().await
}

async fn wait_for_shutdown_signal() -> Result<()> {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = tokio::signal::ctrl_c() => {}
    }
    Ok(())
}
