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

//! Abstraction over the external message-bus client library. The bus
//! itself — its wire encoding, broker, and transport security — is out of
//! scope: the only thing the rest of the crate depends on is this small
//! trait. Every actor owns exactly one concrete implementation
//! ([`nats::NatsBusClient`] in production, [`loopback::LoopbackBus`] in
//! tests); no `dyn BusClient` boundary is needed since the concrete type is
//! always statically known at the call site, so a native `async fn` trait
//! is enough.

pub mod nats;

#[cfg(test)]
pub mod loopback;

/// One message observed on the bus: a logical subject (already stripped of
/// any stream/namespace prefix the transport used to route it) and its
/// frames, mirroring the multi-frame messages the control channel and the
/// unavailability notifier both use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub subject: String,
    pub frames: Vec<String>,
}

impl BusMessage {
    pub fn new(subject: impl Into<String>, frames: Vec<String>) -> Self {
        Self {
            subject: subject.into(),
            frames,
        }
    }
}

pub trait BusClient {
    /// Connects to `endpoint`, identifying this client as `agent_name`.
    async fn connect(&mut self, endpoint: &str, agent_name: &str) -> anyhow::Result<()>;

    /// Declares this client a producer on `stream`: subsequent `send` calls
    /// are published under that stream's namespace.
    async fn set_producer(&mut self, stream: &str) -> anyhow::Result<()>;

    /// Declares this client a consumer on `stream`, filtered by `pattern`
    /// (a regex matched against the logical subject). Multiple calls with
    /// the same `stream` accumulate patterns rather than replacing the
    /// subscription — `ComputeWorker::load` relies on this to subscribe to
    /// many input topics on the one sensor-metric stream.
    async fn set_consumer(&mut self, stream: &str, pattern: &str) -> anyhow::Result<()>;

    /// Publishes `frames` on `subject`, under the current producer stream.
    async fn send(&mut self, subject: &str, frames: Vec<String>) -> anyhow::Result<()>;

    /// Waits for the next message matching any registered consumer
    /// pattern. Blocks indefinitely; callers race it against a command
    /// channel and/or idle timer with `tokio::select!`.
    async fn recv(&mut self) -> anyhow::Result<BusMessage>;

    /// Unsubscribes everything and drops the underlying connection.
    async fn close(&mut self) -> anyhow::Result<()>;
}
