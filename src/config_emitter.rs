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

//! Renders a composite metric definition to an on-disk `.cfg` file plus the
//! service instance name a [`crate::service_management::ServiceController`]
//! can start. One definition exists per (container, function tag, quantity)
//! triple; a rack emits both an "input" and an "output" definition, every
//! other container type emits one definition with no function tag.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::error;
use serde::Serialize;

use crate::asset::{AssetRecord, Quantity};
use crate::asset_store::AssetStore;
use crate::evaluator::render_mean_expression;
use crate::fsutil;

/// One definition successfully written to disk: the `.cfg` file path, the
/// templated service instance name, and the topic it will eventually
/// publish on — everything `Configurator::regenerate` needs to start the
/// service and to track `produced_metrics`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmittedDefinition {
    pub file_path: PathBuf,
    pub service_name: String,
    pub output_topic: String,
}

#[derive(Serialize)]
struct CfgFile<'a> {
    #[serde(rename = "in")]
    inputs: Vec<String>,
    evaluation: &'a str,
}

/// Writes the `.cfg` file(s) for `container`/`function`, one per quantity
/// the assigned sensors support. Returns one [`EmittedDefinition`] per
/// quantity that wrote successfully; a failed write for one quantity does
/// not prevent the other from being emitted.
pub async fn emit(
    store: &AssetStore,
    dir: &Path,
    container: &str,
    function: Option<&str>,
) -> Vec<EmittedDefinition> {
    let sensors = store.sensors_for(container, function);
    if sensors.is_empty() {
        return Vec::new();
    }

    let mut emitted = Vec::new();
    for quantity in Quantity::all() {
        match emit_one(dir, container, function, quantity, &sensors).await {
            Ok(definition) => emitted.push(definition),
            Err(err) => error!("emitting {container}/{function:?}/{quantity}: {err:#}"),
        }
    }
    emitted
}

async fn emit_one(
    dir: &Path,
    container: &str,
    function: Option<&str>,
    quantity: Quantity,
    sensors: &[&AssetRecord],
) -> Result<EmittedDefinition> {
    let inputs: Vec<String> = sensors
        .iter()
        .map(|sensor| {
            let port = sensor.port().unwrap_or("(unknown)");
            let parent = sensor.parent_name(1).unwrap_or("(unknown)");
            format!("{quantity}.{port}@{parent}")
        })
        .collect();

    let offset = mean_calibration_offset(quantity, sensors);
    let suffix = function.map(|f| format!("-{f}")).unwrap_or_default();
    let output_topic = format!("average.{quantity}{suffix}@{container}");
    let evaluation = render_mean_expression(&output_topic, offset, quantity.unit());

    let cfg = CfgFile {
        inputs,
        evaluation: &evaluation,
    };
    let json = serde_json::to_string_pretty(&cfg).context("serializing config file")?;

    let instance = format!("{container}{suffix}-{quantity}");
    let file_path = dir.join(format!("{instance}.cfg"));
    fsutil::write_string(&file_path, json)
        .await
        .with_context(|| format!("writing {}", file_path.display()))?;

    Ok(EmittedDefinition {
        file_path,
        service_name: format!("composite-metrics@{instance}"),
        output_topic,
    })
}

fn mean_calibration_offset(quantity: Quantity, sensors: &[&AssetRecord]) -> f64 {
    if sensors.is_empty() {
        return 0.0;
    }
    let sum: f64 = sensors.iter().map(|s| s.calibration_offset(quantity)).sum();
    sum / sensors.len() as f64
}
