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

//! Authoritative model of the monitored infrastructure: the asset map,
//! the derived sensor-to-container assignment index, the reconfig-pending
//! flag, and the snapshot persistence layer.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result};
use log::{error, warn};
use toml_edit::{value, Array, ArrayOfTables, DocumentMut, Item, Value};

use crate::asset::{AssetOperation, AssetRecord, AssetType};
use crate::fsutil;

/// A symbolic port like `TH1`..`TH4` resolves through this table into a
/// real device path. Built once at startup from the host environment;
/// resolution that fails (key absent) fails open — the original port
/// string passes through unchanged (§9 design notes).
pub type PortAliases = HashMap<String, String>;

/// `true` for exactly the symbolic port names the normalization pass
/// substitutes: the literal prefix `TH` followed by a single ASCII digit
/// 1..4. Anything else — an already-resolved `/dev/...` path, `TH5`, `THX`
/// — is left untouched by the caller.
fn is_symbolic_th_port(port: &str) -> bool {
    matches!(port.as_bytes(), [b'T', b'H', d] if (b'1'..=b'4').contains(d))
}

/// Resolves the `TH1`..`TH4` symbolic port names against the host's serial
/// devices, probing `/dev/ttyS0`..`/dev/ttyS3` (source's naming: `TH{n}`
/// maps to `ttyS{n-1}`). Run once at daemon startup; a probe that finds
/// nothing for a given index simply omits that key, so lookups against it
/// fail open per `normalize_sensor_port`'s contract.
pub fn resolve_port_aliases() -> PortAliases {
    let mut aliases = PortAliases::new();
    for index in 1..=4u8 {
        let device = format!("/dev/ttyS{}", index - 1);
        if Path::new(&device).exists() {
            aliases.insert(format!("TH{index}"), device);
        }
    }
    aliases
}

pub struct AssetStore {
    assets: HashMap<String, AssetRecord>,
    assignments: HashMap<String, Vec<String>>,
    reconfig_pending: bool,
    produced_metrics: HashSet<String>,
    port_aliases: PortAliases,
    ipc_name: String,
}

impl AssetStore {
    pub fn new(ipc_name: impl Into<String>, port_aliases: PortAliases) -> Self {
        Self {
            assets: HashMap::new(),
            assignments: HashMap::new(),
            reconfig_pending: false,
            produced_metrics: HashSet::new(),
            port_aliases,
            ipc_name: ipc_name.into(),
        }
    }

    pub fn reconfig_pending(&self) -> bool {
        self.reconfig_pending
    }

    pub fn asset(&self, name: &str) -> Option<&AssetRecord> {
        self.assets.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.assets.keys().cloned().collect()
    }

    pub fn produced_metrics(&self) -> &HashSet<String> {
        &self.produced_metrics
    }

    pub fn set_produced_metrics(&mut self, metrics: HashSet<String>) {
        self.produced_metrics = metrics;
    }

    /// Returns the sensors assigned to `container`, in discovery order,
    /// optionally filtered by `sensor_function`. `Some("")` matches
    /// sensors with no `sensor_function` attribute at all; `None` returns
    /// every sensor assigned to the container regardless of function.
    pub fn sensors_for(&self, container: &str, function_filter: Option<&str>) -> Vec<&AssetRecord> {
        let Some(names) = self.assignments.get(container) else {
            return Vec::new();
        };
        names
            .iter()
            .filter_map(|name| self.assets.get(name))
            .filter(|sensor| match function_filter {
                None => true,
                Some("") => sensor.sensor_function().is_none(),
                Some(f) => sensor.sensor_function() == Some(f),
            })
            .collect()
    }

    /// Applies one asset-change event. Returns `true` when the event
    /// changed `assets`, `false` when it was a no-op (a delete/retire of
    /// an asset that was never known).
    pub fn apply(&mut self, record: AssetRecord) -> bool {
        match record.operation {
            AssetOperation::Create => {
                if record.is_container() {
                    self.reconfig_pending = true;
                }
                if record.is_sensor() {
                    self.log_missing_sensor_attributes(&record);
                    self.reconfig_pending = true;
                }
                self.assets.insert(record.name.clone(), record);
                true
            }
            AssetOperation::Update => {
                let previous = self.assets.get(&record.name);
                let newly_known = previous.is_none();
                if record.is_container() {
                    if newly_known || previous.is_some_and(|p| p.container_fields_differ(&record)) {
                        self.reconfig_pending = true;
                    }
                } else if record.is_sensor() {
                    if newly_known || previous.is_some_and(|p| p.sensor_fields_differ(&record)) {
                        self.reconfig_pending = true;
                    }
                }
                self.assets.insert(record.name.clone(), record);
                true
            }
            AssetOperation::Delete | AssetOperation::Retire => {
                let existed = self.assets.remove(&record.name).is_some();
                if existed {
                    self.reconfig_pending = true;
                }
                existed
            }
        }
    }

    fn log_missing_sensor_attributes(&self, record: &AssetRecord) {
        if record.port().is_none() {
            warn!("sensor {}: missing required attribute port", record.name);
        }
        if record.logical_asset().is_none() {
            warn!("sensor {}: missing required attribute logical_asset", record.name);
        }
        if record.parent_name(1).is_none() {
            warn!("sensor {}: missing required attribute parent_name.1", record.name);
        }
    }

    /// Rebuilds `assignments` from scratch. Starts from "not pending" and
    /// only re-raises `reconfig_pending` for a genuinely unresolved
    /// `logical_asset` lookup encountered during this same pass, so the
    /// flag always ends up "pending iff still inconsistent" rather than
    /// latching on a sensor that has since resolved.
    pub fn reassign(&mut self, propagate: bool) {
        self.assignments.clear();
        self.reconfig_pending = false;

        let sensor_names: Vec<String> = self
            .assets
            .values()
            .filter(|a| a.is_sensor())
            .map(|a| a.name.clone())
            .collect();

        for sensor_name in sensor_names {
            let Some(logical) = self
                .assets
                .get(&sensor_name)
                .and_then(|s| s.logical_asset())
                .map(str::to_string)
            else {
                warn!("sensor {sensor_name}: no logical_asset, skipping assignment");
                continue;
            };

            let Some((logical_type, parents)) = self.assets.get(&logical).map(|l| {
                (
                    l.asset_type,
                    [
                        l.parent_name(1).map(str::to_string),
                        l.parent_name(2).map(str::to_string),
                        l.parent_name(3).map(str::to_string),
                    ],
                )
            }) else {
                self.reconfig_pending = true;
                continue;
            };

            if matches!(logical_type, AssetType::Device | AssetType::Group) {
                error!("sensor {sensor_name}: logical_asset {logical} is a {logical_type}, not a container; dropping assignment");
                continue;
            }
            if propagate && logical_type != AssetType::Rack {
                continue;
            }

            self.normalize_sensor_port(&sensor_name);

            self.assignments
                .entry(logical.clone())
                .or_default()
                .push(sensor_name.clone());

            if propagate {
                for parent in parents.into_iter().flatten() {
                    self.assignments.entry(parent).or_default().push(sensor_name.clone());
                }
            }
        }
    }

    /// Substitutes a symbolic port (e.g. `TH1`) for its resolved device
    /// path via `port_aliases`, mutating the stored record in place.
    /// Unresolvable aliases fail open: the original port string is left
    /// untouched and a warning is logged. A port already naming a real
    /// device path (no entry in `port_aliases`) is left alone silently.
    fn normalize_sensor_port(&mut self, sensor_name: &str) {
        let Some(port) = self.assets.get(sensor_name).and_then(|s| s.port()) else {
            return;
        };
        if !is_symbolic_th_port(port) {
            return;
        }
        match self.port_aliases.get(port).cloned() {
            Some(resolved) => {
                if let Some(sensor) = self.assets.get_mut(sensor_name) {
                    sensor.ext.insert("port".to_string(), resolved);
                }
            }
            None => {
                warn!("sensor {sensor_name}: no port alias for {port}; leaving port unresolved");
            }
        }
    }

    /// Overwrites `path` atomically with a TOML snapshot of `assets` and
    /// `produced_metrics`. `assignments` is never persisted; the next
    /// `reassign` rebuilds it.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut doc = DocumentMut::new();

        let mut names: Vec<&String> = self.assets.keys().collect();
        names.sort();
        let mut assets_array = ArrayOfTables::new();
        for name in names {
            assets_array.push(self.assets[name].to_table());
        }
        doc.insert("assets", Item::ArrayOfTables(assets_array));

        let mut sorted_metrics: Vec<&String> = self.produced_metrics.iter().collect();
        sorted_metrics.sort();
        let mut metrics = Array::new();
        for metric in sorted_metrics {
            metrics.push(metric.as_str());
        }
        doc.insert("produced_metrics", Item::Value(Value::Array(metrics)));

        if self.reconfig_pending {
            doc.insert("is_reconfig_needed", value(true));
        }
        doc.insert("ipc_name", value(self.ipc_name.as_str()));

        fsutil::write_string_atomic(path, doc.to_string())
            .await
            .context("writing asset store snapshot")
    }

    /// Reconstructs an `AssetStore` from a snapshot written by `save`.
    /// `assignments` starts empty and `reconfig_pending` is always raised:
    /// the assignment index is stale the instant it's loaded and must be
    /// rebuilt by the next `reassign` before anything reads it.
    pub async fn load(path: impl AsRef<Path>, port_aliases: PortAliases) -> Result<Self> {
        let text = fsutil::read_txt(&path).await.context("reading asset store snapshot")?;
        let doc: DocumentMut = text.parse().map_err(|source| crate::error::SnapshotError::Malformed {
            path: path.as_ref().display().to_string(),
            source,
        })?;

        let mut assets = HashMap::new();
        if let Some(array) = doc.get("assets").and_then(Item::as_array_of_tables) {
            for table in array.iter() {
                let record = AssetRecord::from_table(table)?;
                assets.insert(record.name.clone(), record);
            }
        }

        let mut produced_metrics = HashSet::new();
        if let Some(array) = doc.get("produced_metrics").and_then(Item::as_array) {
            for item in array.iter() {
                if let Some(topic) = item.as_str() {
                    produced_metrics.insert(topic.to_string());
                }
            }
        }

        let ipc_name = doc
            .get("ipc_name")
            .and_then(Item::as_str)
            .unwrap_or_default()
            .to_string();

        Ok(Self {
            assets,
            assignments: HashMap::new(),
            reconfig_pending: true,
            produced_metrics,
            port_aliases,
            ipc_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::SENSOR_SUBTYPE;
    use std::collections::HashMap as Map;

    fn container(name: &str, asset_type: AssetType, operation: AssetOperation, parent: Option<&str>) -> AssetRecord {
        let mut aux = Map::new();
        if let Some(p) = parent {
            aux.insert("parent_name.1".to_string(), p.to_string());
        }
        AssetRecord {
            name: name.to_string(),
            operation,
            asset_type,
            subtype: "container".to_string(),
            aux,
            ext: Map::new(),
        }
    }

    fn sensor(name: &str, logical_asset: &str, port: &str, calibration_t: &str) -> AssetRecord {
        let mut ext = Map::new();
        ext.insert("logical_asset".to_string(), logical_asset.to_string());
        ext.insert("port".to_string(), port.to_string());
        ext.insert("calibration_offset_t".to_string(), calibration_t.to_string());
        AssetRecord {
            name: name.to_string(),
            operation: AssetOperation::Create,
            asset_type: AssetType::Device,
            subtype: SENSOR_SUBTYPE.to_string(),
            aux: Map::new(),
            ext,
        }
    }

    /// S1 — basic rack propagation, with and without propagation enabled.
    #[test]
    fn s1_basic_rack_propagation() {
        let mut store = AssetStore::new("test", PortAliases::new());
        store.apply(container("D", AssetType::Datacenter, AssetOperation::Create, None));
        store.apply(container("R", AssetType::Rack, AssetOperation::Create, Some("D")));
        store.apply(sensor("S", "R", "TH1", "1"));

        store.reassign(true);
        assert_eq!(store.sensors_for("R", None).iter().map(|s| s.name.as_str()).collect::<Vec<_>>(), vec!["S"]);
        assert_eq!(store.sensors_for("D", None).iter().map(|s| s.name.as_str()).collect::<Vec<_>>(), vec!["S"]);

        store.reassign(false);
        assert_eq!(store.sensors_for("R", None).len(), 1);
        assert!(store.sensors_for("D", None).is_empty());
    }

    /// S2 — sensor arrives before its logical asset is known.
    #[test]
    fn s2_sensor_before_container() {
        let mut store = AssetStore::new("test", PortAliases::new());
        store.apply(sensor("S", "R", "TH1", "1"));
        store.reassign(true);
        assert!(store.reconfig_pending());
        assert!(store.sensors_for("R", None).is_empty());

        store.apply(container("R", AssetType::Rack, AssetOperation::Create, None));
        store.reassign(true);
        assert_eq!(store.sensors_for("R", None).iter().map(|s| s.name.as_str()).collect::<Vec<_>>(), vec!["S"]);
    }

    /// S3 — an update that only touches parent_name leaves reconfig_pending false.
    #[test]
    fn s3_irrelevant_update_does_not_flag() {
        let mut store = AssetStore::new("test", PortAliases::new());
        store.apply(sensor("S", "R", "TH1", "1"));
        store.reassign(true);
        assert!(!store.reconfig_pending());

        let mut updated = sensor("S", "R", "TH1", "1");
        updated.operation = AssetOperation::Update;
        updated.aux.insert("parent_name.1".to_string(), "R2".to_string());
        store.apply(updated);
        assert!(!store.reconfig_pending());
    }

    #[test]
    fn th_port_recognition_is_limited_to_th1_through_th4() {
        assert!(is_symbolic_th_port("TH1"));
        assert!(is_symbolic_th_port("TH4"));
        assert!(!is_symbolic_th_port("TH5"));
        assert!(!is_symbolic_th_port("THX"));
        assert!(!is_symbolic_th_port("/dev/ttyS0"));
    }

    #[test]
    fn unresolvable_port_alias_fails_open() {
        let mut store = AssetStore::new("test", PortAliases::new());
        store.apply(container("R", AssetType::Rack, AssetOperation::Create, None));
        store.apply(sensor("S", "R", "TH2", "0"));
        store.reassign(false);
        assert_eq!(store.asset("S").unwrap().port(), Some("TH2"));
    }

    #[test]
    fn sensor_attached_to_device_is_never_assigned() {
        let mut store = AssetStore::new("test", PortAliases::new());
        store.apply(container("DEV1", AssetType::Device, AssetOperation::Create, None));
        store.apply(sensor("S", "DEV1", "TH1", "0"));
        store.reassign(false);
        assert!(store.sensors_for("DEV1", None).is_empty());
    }

    #[test]
    fn update_changing_significant_sensor_field_flags_reconfig() {
        let mut store = AssetStore::new("test", PortAliases::new());
        store.apply(sensor("S", "R", "TH1", "1"));
        store.reassign(true);

        let mut updated = sensor("S", "R2", "TH1", "1");
        updated.operation = AssetOperation::Update;
        store.apply(updated);
        assert!(store.reconfig_pending());
    }

    #[test]
    fn delete_of_unknown_asset_is_a_no_op() {
        let mut store = AssetStore::new("test", PortAliases::new());
        let mut gone = container("Ghost", AssetType::Rack, AssetOperation::Delete, None);
        gone.operation = AssetOperation::Delete;
        let stored = store.apply(gone);
        assert!(!stored);
        assert!(!store.reconfig_pending());
    }

    #[tokio::test]
    async fn snapshot_round_trips_modulo_assignments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.toml");

        let mut store = AssetStore::new("agent-1", PortAliases::new());
        store.apply(container("D", AssetType::Datacenter, AssetOperation::Create, None));
        store.apply(container("R", AssetType::Rack, AssetOperation::Create, Some("D")));
        store.apply(sensor("S", "R", "TH1", "1"));
        store.reassign(true);
        store.set_produced_metrics(["average.temperature@R".to_string()].into_iter().collect());
        store.save(&path).await.unwrap();

        let loaded = AssetStore::load(&path, PortAliases::new()).await.unwrap();
        assert_eq!(loaded.assets, store.assets);
        assert_eq!(loaded.produced_metrics, store.produced_metrics);
        assert!(loaded.assignments.is_empty());
    }
}
