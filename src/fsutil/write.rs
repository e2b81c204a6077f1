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

use anyhow::Result;
use std::path::Path;

/// Writes the given string to a file at `path`, replacing it entirely.
pub async fn write_string(path: impl AsRef<Path>, txt: String) -> Result<()> {
    tokio::fs::write(path, txt.into_bytes()).await?;
    Ok(())
}

/// Writes `txt` to `path` atomically: the full content is written to a
/// sibling `.tmp` file first, then renamed over `path`. Used for the
/// AssetStore snapshot, which must never be observed half-written by a
/// concurrent reader.
pub async fn write_string_atomic(path: impl AsRef<Path>, txt: String) -> Result<()> {
    let path = path.as_ref();
    let tmp_path = path.with_extension("tmp");
    tokio::fs::write(&tmp_path, txt.into_bytes()).await?;
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

/// Recursively creates a directory and all missing parent components.
pub fn create_dir_all(path: impl AsRef<Path>) -> Result<()> {
    Ok(std::fs::create_dir_all(path)?)
}

/// Removes a single file from the filesystem.
pub fn remove_file(path: impl AsRef<Path>) -> Result<()> {
    Ok(std::fs::remove_file(path)?)
}
