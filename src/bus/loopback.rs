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

//! In-memory [`BusClient`] for tests. A [`Wire`] is the shared medium: every
//! [`LoopbackBus`] created on the same `Wire` sees every message any other
//! client on that `Wire` sends, filtered by its own registered patterns —
//! the same observable behavior as the real NATS-backed client, without a
//! broker.

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::{anyhow, Result};
use regex::Regex;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use super::{BusClient, BusMessage};

type WireMessage = (String, Vec<String>);

#[derive(Clone, Default)]
pub struct Wire(Rc<RefCell<Vec<UnboundedSender<WireMessage>>>>);

impl Wire {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, tx: UnboundedSender<WireMessage>) {
        self.0.borrow_mut().push(tx);
    }

    fn broadcast(&self, subject: String, frames: Vec<String>) {
        self.0
            .borrow_mut()
            .retain(|tx| tx.send((subject.clone(), frames.clone())).is_ok());
    }
}

pub struct LoopbackBus {
    wire: Wire,
    producer_stream: Option<String>,
    patterns: Vec<Regex>,
    rx: Option<UnboundedReceiver<WireMessage>>,
}

impl LoopbackBus {
    pub fn new(wire: &Wire) -> Self {
        let (tx, rx) = unbounded_channel();
        wire.register(tx);
        Self {
            wire: wire.clone(),
            producer_stream: None,
            patterns: Vec::new(),
            rx: Some(rx),
        }
    }
}

impl BusClient for LoopbackBus {
    async fn connect(&mut self, _endpoint: &str, _agent_name: &str) -> Result<()> {
        Ok(())
    }

    async fn set_producer(&mut self, stream: &str) -> Result<()> {
        self.producer_stream = Some(stream.to_string());
        Ok(())
    }

    async fn set_consumer(&mut self, _stream: &str, pattern: &str) -> Result<()> {
        self.patterns.push(Regex::new(pattern)?);
        Ok(())
    }

    async fn send(&mut self, subject: &str, frames: Vec<String>) -> Result<()> {
        self.wire.broadcast(subject.to_string(), frames);
        Ok(())
    }

    async fn recv(&mut self) -> Result<BusMessage> {
        loop {
            let rx = self.rx.as_mut().ok_or_else(|| anyhow!("bus closed"))?;
            let (subject, frames) = rx.recv().await.ok_or_else(|| anyhow!("wire closed"))?;
            if self.patterns.iter().any(|re| re.is_match(&subject)) {
                return Ok(BusMessage::new(subject, frames));
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.rx = None;
        Ok(())
    }
}
