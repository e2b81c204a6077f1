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

//! Logging backend selection shared by both binaries.
//!
//! The same dual-backend selection used by systemd-aware daemons: a
//! human-readable `env_logger` backend by default, switched to the
//! structured `systemd-journal-logger` backend automatically when the
//! process is running under a service manager that connects stdout/stderr
//! to the journal. There is no log buffer or broadcast channel here — this
//! daemon has no API layer to serve recent log lines to.

use anyhow::Result;
use log::LevelFilter;
use systemd_journal_logger::{connected_to_journal, JournalLog};

/// Crates that are noisy at `debug`/`trace` and are capped at `info` even
/// when the daemon's own log level is turned up.
const DAMPED_DEPENDENCIES: &[&str] = &["mio", "tokio_util"];

/// Initializes the global logger. Must be called once, as early as possible
/// in each binary's `main`.
pub fn setup_logging(level: LevelFilter) -> Result<()> {
    if connected_to_journal() {
        JournalLog::new()?
            .with_extra_fields(vec![("VERSION", env!("CARGO_PKG_VERSION"))])
            .install()?;
        log::set_max_level(level);
    } else {
        let mut builder = env_logger::Builder::new();
        builder.filter_level(level).format_timestamp_millis();
        for dependency in DAMPED_DEPENDENCIES {
            if level > LevelFilter::Info {
                builder.filter_module(dependency, LevelFilter::Info);
            }
        }
        builder.init();
    }
    log::info!(
        "topology-metricsd {} starting, log level {level}",
        env!("CARGO_PKG_VERSION")
    );
    Ok(())
}
