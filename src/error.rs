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

//! Caller-visible error taxonomy. Everything that does not cross a component
//! boundary propagates as `anyhow::Result` instead; these variants exist only
//! for conditions a caller needs to branch on (CLI validation, control-channel
//! rejection, snapshot corruption).

use derive_more::{Display, Error};

#[derive(Debug, Display, Error)]
pub enum ControlError {
    #[display("{path}: expected a path creatable as a regular file")]
    InvalidStateFilePath { path: String },

    #[display("{path}: expected an existing directory")]
    InvalidConfigDirectory { path: String },

    #[display("control message missing required frame {index}")]
    MissingFrame { index: usize },
}

#[derive(Debug, Display, Error)]
pub enum SnapshotError {
    #[display("snapshot at {path} is not valid TOML: {source}")]
    Malformed {
        path: String,
        source: toml_edit::TomlError,
    },
}
