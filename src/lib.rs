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

//! Shared library behind the two `topology-metricsd` binaries
//! (`configuratord`, `compute-workerd`): the asset-topology model, the
//! per-definition configuration renderer, the service-manager abstraction,
//! and the two actor runtimes built on top of them.

pub mod asset;
pub mod asset_store;
pub mod bus;
pub mod compute_worker;
pub mod config_emitter;
pub mod configurator;
pub mod error;
pub mod evaluator;
pub mod fsutil;
pub mod logging;
pub mod notifier;
pub mod service_management;
