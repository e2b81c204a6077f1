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

//! Publishes "metric went away" notifications when a regeneration's set of
//! produced topics shrinks. Modeled as a free function over `&mut impl
//! BusClient` rather than a struct: it carries no state of its own, only
//! the fixed subject and frame layout the control channel promises.

use anyhow::{Context, Result};

use crate::bus::BusClient;

const SUBJECT: &str = "metric_topic";
const FRAME_UNAVAILABLE: &str = "METRICUNAVAILABLE";

/// Publishes a best-effort, two-frame unavailability notice for `topic` on
/// the configured producer stream. No acknowledgement is expected; a send
/// failure is logged by the caller (see the error-handling taxonomy) and
/// does not block the rest of regeneration.
pub async fn notify(bus: &mut impl BusClient, topic: &str) -> Result<()> {
    bus.send(SUBJECT, vec![FRAME_UNAVAILABLE.to_string(), topic.to_string()])
        .await
        .with_context(|| format!("publishing unavailability notice for {topic}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::loopback::{LoopbackBus, Wire};

    #[tokio::test]
    async fn publishes_two_frames_on_the_fixed_subject() {
        let wire = Wire::new();
        let mut producer = LoopbackBus::new(&wire);
        producer.set_producer("metrics").await.unwrap();
        let mut listener = LoopbackBus::new(&wire);
        listener.set_consumer("metrics", ".*").await.unwrap();

        notify(&mut producer, "average.temperature@R1").await.unwrap();

        let message = listener.recv().await.unwrap();
        assert_eq!(message.subject, SUBJECT);
        assert_eq!(message.frames, vec!["METRICUNAVAILABLE".to_string(), "average.temperature@R1".to_string()]);
    }
}
