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

//! Thin async filesystem helpers used by the snapshot, config-emission and
//! regeneration paths. All of it is a straightforward wrapper over
//! `tokio::fs` / `std::fs`; kept as its own module so call sites read as
//! domain operations ("save the snapshot") rather than raw IO calls.

mod metadata;
pub use self::metadata::*;
mod read;
pub use self::read::*;
mod write;
pub use self::write::*;

use std::future::Future;
use std::time::Duration;
use tokio::runtime::Builder;
use tokio::task::LocalSet;

/// Builds and drives the single-threaded runtime each actor runs on.
///
/// Every actor (the Configurator, each `ComputeWorker`) is a non-`Send`
/// cooperative task: no state is shared, so no multi-threaded scheduler or
/// locking is needed. `LocalSet` lets the actor body use `spawn_local` for
/// any incidental fan-out (e.g. regenerate's per-definition emission).
pub fn runtime<F: Future>(future: F) -> F::Output {
    let rt = Builder::new_current_thread()
        .enable_io()
        .enable_time()
        .max_blocking_threads(2)
        .thread_keep_alive(Duration::from_secs(5))
        .thread_name("topology-metricsd-wrk")
        .build();
    rt.unwrap().block_on(LocalSet::new().run_until(future))
}
