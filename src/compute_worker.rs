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

//! The ComputeWorker actor: one instance per composite-metric definition.
//! Subscribes to its configured input topics, keeps a TTL-stamped cache of
//! the last reading on each, and on every new reading re-evaluates its
//! expression and republishes the derived metric.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::{error, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

use crate::bus::{BusClient, BusMessage};
use crate::evaluator::{EvalValue, Evaluator};
use crate::fsutil;

/// Stream a ComputeWorker subscribes to for raw sensor readings.
pub const SENSOR_METRIC_STREAM: &str = "sensor_metrics";
/// Stream a ComputeWorker publishes derived metrics on.
pub const DERIVED_METRIC_STREAM: &str = "derived_metrics";
/// TTL stamped on every derived metric a worker emits.
pub const DERIVED_METRIC_TTL_SECS: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq)]
struct CachedReading {
    value: f64,
    valid_until: DateTime<Utc>,
}

/// The `.cfg` file a [`crate::config_emitter`] writes and a worker loads.
#[derive(Debug, Deserialize)]
struct WorkerConfig {
    #[serde(rename = "in")]
    inputs: Vec<String>,
    evaluation: String,
}

/// The payload shape a sensor-metric bus message carries. `timestamp`
/// defaults to the moment the message is processed when the sender omits
/// it; `ttl` defaults to the worker's own output TTL when omitted.
#[derive(Debug, Deserialize)]
struct SensorMetric {
    value: f64,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    ttl: Option<i64>,
}

#[derive(Debug, Serialize)]
struct DerivedMetric {
    #[serde(rename = "type")]
    kind: String,
    element_src: String,
    value: String,
    unit: String,
    ttl: u64,
}

pub struct ComputeWorker<B: BusClient, E: Evaluator> {
    bus: B,
    evaluator: E,
    commands: UnboundedReceiver<Vec<String>>,
    cache: HashMap<String, CachedReading>,
    evaluation: String,
    cancel: CancellationToken,
}

impl<B: BusClient, E: Evaluator> ComputeWorker<B, E> {
    pub fn new(bus: B, evaluator: E, commands: UnboundedReceiver<Vec<String>>, cancel: CancellationToken) -> Self {
        Self {
            bus,
            evaluator,
            commands,
            cache: HashMap::new(),
            evaluation: String::new(),
            cancel,
        }
    }

    /// Connects to the bus and becomes a producer on the derived-metrics
    /// stream.
    pub async fn connect(&mut self, endpoint: &str, agent_name: &str) -> Result<()> {
        self.bus
            .connect(endpoint, agent_name)
            .await
            .with_context(|| format!("connecting to bus at {endpoint}"))?;
        self.bus
            .set_producer(DERIVED_METRIC_STREAM)
            .await
            .context("becoming producer on derived-metrics stream")
    }

    /// Parses the definition file at `cfg_path`, pre-seeds an already
    /// expired cache entry for each input topic, and subscribes to each
    /// with a pattern anchored exactly to that topic.
    pub async fn load(&mut self, cfg_path: impl AsRef<Path>) -> Result<()> {
        let text = fsutil::read_txt(&cfg_path)
            .await
            .context("reading compute worker config")?;
        let config: WorkerConfig = serde_json::from_str(&text).context("parsing compute worker config")?;
        self.evaluation = config.evaluation;

        let already_expired = Utc::now() - ChronoDuration::seconds(1);
        for topic in config.inputs {
            self.cache.insert(
                topic.clone(),
                CachedReading {
                    value: 0.0,
                    valid_until: already_expired,
                },
            );
            let pattern = format!("^{}$", regex::escape(&topic));
            self.bus
                .set_consumer(SENSOR_METRIC_STREAM, &pattern)
                .await
                .with_context(|| format!("subscribing to input topic {topic}"))?;
        }
        Ok(())
    }

    /// Drives the actor until `$TERM` (via the command channel or the
    /// cancellation token) or the command channel closes.
    pub async fn run(mut self) -> Result<()> {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                received = self.commands.recv() => {
                    let Some(frames) = received else { break };
                    if frames.first().map(String::as_str) == Some("$TERM") {
                        break;
                    }
                }
                message = self.bus.recv() => {
                    match message {
                        Ok(message) => self.on_metric(message).await,
                        Err(err) => error!("bus recv error: {err:#}"),
                    }
                }
            }
        }
        Ok(())
    }

    async fn on_metric(&mut self, message: BusMessage) {
        let Some(payload) = message.frames.first() else {
            warn!("sensor metric message carried no payload frame; dropping");
            return;
        };
        let reading: SensorMetric = match serde_json::from_str(payload) {
            Ok(reading) => reading,
            Err(err) => {
                warn!("dropping malformed sensor metric on {}: {err}", message.subject);
                return;
            }
        };
        let ttl = reading.ttl.unwrap_or(DERIVED_METRIC_TTL_SECS as i64);
        let observed_at = reading.timestamp.unwrap_or_else(Utc::now);
        let valid_until = observed_at + ChronoDuration::seconds(ttl);
        self.cache.insert(
            message.subject,
            CachedReading {
                value: reading.value,
                valid_until,
            },
        );
        self.evaluate_and_publish().await;
    }

    async fn evaluate_and_publish(&mut self) {
        let now = Utc::now();
        let env: HashMap<String, f64> = self
            .cache
            .iter()
            .filter(|(_, reading)| reading.valid_until > now)
            .map(|(topic, reading)| (topic.clone(), reading.value))
            .collect();

        let result = match self.evaluator.evaluate(&self.evaluation, &env) {
            Ok(result) => result,
            Err(err) => {
                warn!("evaluator error: {err:#}");
                return;
            }
        };

        if result.len() < 3 {
            warn!("evaluator returned {} values, expected at least 3", result.len());
            return;
        }
        let (EvalValue::Text(topic), EvalValue::Number(value), EvalValue::Text(unit)) =
            (&result[0], &result[1], &result[2])
        else {
            warn!("evaluator result did not have the shape (topic, value, unit, ..)");
            return;
        };

        let Some(at) = topic.rfind('@') else {
            warn!("output topic {topic:?} has no '@'; dropping");
            return;
        };
        let kind = topic[..at].to_string();
        let element_src = topic[at + 1..].to_string();

        let derived = DerivedMetric {
            kind,
            element_src,
            value: format!("{value:.2}"),
            unit: unit.clone(),
            ttl: DERIVED_METRIC_TTL_SECS,
        };
        let payload = match serde_json::to_string(&derived) {
            Ok(payload) => payload,
            Err(err) => {
                error!("serializing derived metric: {err:#}");
                return;
            }
        };
        if let Err(err) = self.bus.send(topic, vec![payload]).await {
            error!("publishing derived metric on {topic}: {err:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::loopback::{LoopbackBus, Wire};
    use crate::evaluator::{render_mean_expression, ArithmeticDsl};
    use serde_json::json;
    use tokio::sync::mpsc::unbounded_channel;

    fn worker(bus: LoopbackBus) -> ComputeWorker<LoopbackBus, ArithmeticDsl> {
        let (_tx, rx) = unbounded_channel();
        ComputeWorker::new(bus, ArithmeticDsl, rx, CancellationToken::new())
    }

    /// S5 — worker averaging: successive readings update the running mean.
    #[tokio::test]
    async fn s5_worker_averaging() {
        let wire = Wire::new();
        let bus = LoopbackBus::new(&wire);
        let mut listener = LoopbackBus::new(&wire);
        listener.set_consumer("derived", "^average\\.temperature@R1$").await.unwrap();

        let mut w = worker(bus);
        w.evaluation = render_mean_expression("average.temperature@R1", 0.0, "C");

        w.on_metric(BusMessage::new("temperature@TH1", vec![json!({"value": 40.0}).to_string()]))
            .await;
        let m1 = listener.recv().await.unwrap();
        assert!(m1.frames[0].contains("\"value\":\"40.00\""));

        w.on_metric(BusMessage::new("temperature@TH2", vec![json!({"value": 100.0}).to_string()]))
            .await;
        let m2 = listener.recv().await.unwrap();
        assert!(m2.frames[0].contains("\"value\":\"70.00\""));

        w.on_metric(BusMessage::new("temperature@TH1", vec![json!({"value": 70.0}).to_string()]))
            .await;
        let m3 = listener.recv().await.unwrap();
        assert!(m3.frames[0].contains("\"value\":\"85.00\""));
    }

    /// S6 — an expired cache entry is excluded from the averaging environment.
    #[tokio::test]
    async fn s6_ttl_expiry_excludes_stale_reading() {
        let wire = Wire::new();
        let bus = LoopbackBus::new(&wire);
        let mut listener = LoopbackBus::new(&wire);
        listener.set_consumer("derived", "^average\\.temperature@R1$").await.unwrap();

        let mut w = worker(bus);
        w.evaluation = render_mean_expression("average.temperature@R1", 0.0, "C");
        w.cache.insert(
            "temperature@TH1".to_string(),
            CachedReading {
                value: 999.0,
                valid_until: Utc::now() - ChronoDuration::seconds(1),
            },
        );

        w.on_metric(BusMessage::new("temperature@TH2", vec![json!({"value": 50.0, "ttl": 60}).to_string()]))
            .await;

        let message = listener.recv().await.unwrap();
        assert!(message.frames[0].contains("\"value\":\"50.00\""));
    }

    #[tokio::test]
    async fn load_pre_seeds_expired_entries_and_subscribes() {
        let wire = Wire::new();
        let bus = LoopbackBus::new(&wire);
        let mut w = worker(bus);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("R1-temperature.cfg");
        let cfg = json!({
            "in": ["temperature.TH1@R1", "temperature.TH2@R1"],
            "evaluation": render_mean_expression("average.temperature@R1", 0.0, "C"),
        });
        fsutil::write_string(&path, cfg.to_string()).await.unwrap();

        w.load(&path).await.unwrap();
        assert_eq!(w.cache.len(), 2);
        assert!(w.cache.values().all(|r| r.valid_until < Utc::now()));
        assert_eq!(w.evaluation, render_mean_expression("average.temperature@R1", 0.0, "C"));
    }
}
