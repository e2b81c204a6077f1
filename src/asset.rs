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

//! Asset records: the unit of state the [`crate::asset_store::AssetStore`]
//! tracks. Modeled as a flat record with a type tag rather than a sum type
//! per kind — containers and sensors share enough of the `aux`/`ext` shape
//! that a tagged variant pulls its weight more than a full enum-of-structs
//! would.

use std::collections::HashMap;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use toml_edit::{value, Item, Table};

pub const SENSOR_SUBTYPE: &str = "sensor";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    Datacenter,
    Room,
    Row,
    Rack,
    Device,
    Group,
}

impl AssetType {
    /// Container types may host assigned sensors; `Device`/`Group` may not
    /// (see `AssetStore::reassign`).
    pub fn is_container(self) -> bool {
        matches!(
            self,
            AssetType::Datacenter | AssetType::Room | AssetType::Row | AssetType::Rack
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AssetOperation {
    Create,
    Update,
    Delete,
    Retire,
}

/// The two quantities a composite metric is ever computed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Quantity {
    Temperature,
    Humidity,
}

impl Quantity {
    pub fn unit(self) -> &'static str {
        match self {
            Quantity::Temperature => "C",
            Quantity::Humidity => "%",
        }
    }

    pub fn calibration_field(self) -> &'static str {
        match self {
            Quantity::Temperature => "calibration_offset_t",
            Quantity::Humidity => "calibration_offset_h",
        }
    }

    pub fn all() -> [Quantity; 2] {
        [Quantity::Temperature, Quantity::Humidity]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRecord {
    pub name: String,
    pub operation: AssetOperation,
    pub asset_type: AssetType,
    pub subtype: String,
    pub aux: HashMap<String, String>,
    pub ext: HashMap<String, String>,
}

impl AssetRecord {
    pub fn is_sensor(&self) -> bool {
        self.subtype == SENSOR_SUBTYPE
    }

    pub fn is_container(&self) -> bool {
        self.asset_type.is_container()
    }

    pub fn parent_name(&self, level: u8) -> Option<&str> {
        self.aux
            .get(&format!("parent_name.{level}"))
            .map(String::as_str)
    }

    pub fn port(&self) -> Option<&str> {
        self.ext.get("port").map(String::as_str)
    }

    pub fn logical_asset(&self) -> Option<&str> {
        self.ext.get("logical_asset").map(String::as_str)
    }

    pub fn sensor_function(&self) -> Option<&str> {
        self.ext.get("sensor_function").map(String::as_str)
    }

    /// Parses the calibration offset for `quantity`, defaulting to 0 (and
    /// logging) when the attribute is absent or not a valid real number.
    pub fn calibration_offset(&self, quantity: Quantity) -> f64 {
        match self.ext.get(quantity.calibration_field()) {
            None => 0.0,
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                log::warn!(
                    "asset {}: non-numeric {} ({raw:?}); treating as 0",
                    self.name,
                    quantity.calibration_field()
                );
                0.0
            }),
        }
    }

    /// The three significant `ext` fields whose change on `update` flags a
    /// sensor record as reconfig-worthy, plus `logical_asset`/`port` already
    /// covered by their own accessors above.
    pub fn sensor_fields_differ(&self, other: &AssetRecord) -> bool {
        self.logical_asset() != other.logical_asset()
            || self.port() != other.port()
            || self.ext.get("calibration_offset_t") != other.ext.get("calibration_offset_t")
            || self.ext.get("calibration_offset_h") != other.ext.get("calibration_offset_h")
            || self.sensor_function() != other.sensor_function()
    }

    pub fn container_fields_differ(&self, other: &AssetRecord) -> bool {
        (1..=3).any(|level| self.parent_name(level) != other.parent_name(level))
    }

    pub fn to_table(&self) -> Table {
        let mut table = Table::new();
        table["name"] = value(self.name.as_str());
        table["operation"] = value(self.operation.to_string());
        table["asset_type"] = value(self.asset_type.to_string());
        table["subtype"] = value(self.subtype.as_str());
        table.insert("aux", Item::Table(map_to_table(&self.aux)));
        table.insert("ext", Item::Table(map_to_table(&self.ext)));
        table
    }

    pub fn from_table(table: &Table) -> Result<Self> {
        let name = required_str(table, "name")?.to_string();
        let operation = AssetOperation::from_str(required_str(table, "operation")?)
            .map_err(|_| anyhow!("asset {name}: invalid operation"))?;
        let asset_type = AssetType::from_str(required_str(table, "asset_type")?)
            .map_err(|_| anyhow!("asset {name}: invalid asset_type"))?;
        let subtype = table
            .get("subtype")
            .and_then(Item::as_str)
            .unwrap_or_default()
            .to_string();
        let aux = table
            .get("aux")
            .and_then(Item::as_table)
            .map(table_to_map)
            .unwrap_or_default();
        let ext = table
            .get("ext")
            .and_then(Item::as_table)
            .map(table_to_map)
            .unwrap_or_default();
        Ok(Self {
            name,
            operation,
            asset_type,
            subtype,
            aux,
            ext,
        })
    }
}

/// The JSON shape an asset-change event arrives in on the bus. Distinct
/// from [`AssetRecord`] because the wire encoding names the type field
/// `type` (a Rust keyword) and never carries the `subtype` default the
/// snapshot format relies on.
#[derive(Debug, Deserialize)]
pub struct AssetWireMessage {
    pub name: String,
    pub operation: AssetOperation,
    #[serde(rename = "type")]
    pub asset_type: AssetType,
    #[serde(default)]
    pub subtype: String,
    #[serde(default)]
    pub aux: HashMap<String, String>,
    #[serde(default)]
    pub ext: HashMap<String, String>,
}

impl From<AssetWireMessage> for AssetRecord {
    fn from(msg: AssetWireMessage) -> Self {
        AssetRecord {
            name: msg.name,
            operation: msg.operation,
            asset_type: msg.asset_type,
            subtype: msg.subtype,
            aux: msg.aux,
            ext: msg.ext,
        }
    }
}

fn required_str<'a>(table: &'a Table, key: &'static str) -> Result<&'a str> {
    table
        .get(key)
        .and_then(Item::as_str)
        .ok_or_else(|| anyhow!("asset record missing required field {key}"))
}

fn map_to_table(map: &HashMap<String, String>) -> Table {
    let mut table = Table::new();
    for (key, val) in map {
        table[key.as_str()] = value(val.as_str());
    }
    table
}

fn table_to_map(table: &Table) -> HashMap<String, String> {
    table
        .iter()
        .filter_map(|(k, v)| v.as_str().map(|s| (k.to_string(), s.to_string())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sensor(name: &str) -> AssetRecord {
        let mut ext = HashMap::new();
        ext.insert("logical_asset".to_string(), "R1".to_string());
        ext.insert("port".to_string(), "TH1".to_string());
        AssetRecord {
            name: name.to_string(),
            operation: AssetOperation::Create,
            asset_type: AssetType::Device,
            subtype: SENSOR_SUBTYPE.to_string(),
            aux: HashMap::new(),
            ext,
        }
    }

    #[test]
    fn calibration_offset_defaults_to_zero_on_garbage() {
        let mut s = sensor("S1");
        s.ext.insert("calibration_offset_t".to_string(), "oops".to_string());
        assert_eq!(s.calibration_offset(Quantity::Temperature), 0.0);
    }

    #[test]
    fn table_round_trips() {
        let s = sensor("S1");
        let table = s.to_table();
        let back = AssetRecord::from_table(&table).unwrap();
        assert_eq!(s, back);
    }

    #[test]
    fn sensor_fields_differ_ignores_parent_name() {
        let mut a = sensor("S1");
        a.aux.insert("parent_name.1".to_string(), "R1".to_string());
        let mut b = a.clone();
        b.aux.insert("parent_name.1".to_string(), "R2".to_string());
        assert!(!a.sensor_fields_differ(&b));
    }
}
