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

//! Production [`BusClient`] backed by `async-nats`. A "stream" in the
//! control-channel vocabulary (§6) becomes a NATS subject namespace: a
//! consumer's regex `pattern` is not translated into a NATS subject filter
//! (NATS wildcards and POSIX-style regexes don't compose cleanly), so this
//! client instead subscribes once to `{stream}.>` and filters client-side,
//! matching the pattern semantics the control channel actually promises.

use std::collections::HashMap;
use std::pin::Pin;

use anyhow::{anyhow, Context, Result};
use async_nats::{Client, Message, Subscriber};
use futures_util::future::select_all;
use futures_util::StreamExt;
use regex::Regex;

use super::{BusClient, BusMessage};

/// Frames within a single bus message are joined with this separator on
/// the wire; it cannot appear in a topic, endpoint, or JSON payload we
/// produce, so round-tripping is unambiguous.
const FRAME_SEPARATOR: char = '\u{1f}';

struct ConsumerStream {
    subscriber: Subscriber,
    patterns: Vec<Regex>,
}

#[derive(Default)]
pub struct NatsBusClient {
    client: Option<Client>,
    producer_stream: Option<String>,
    consumers: HashMap<String, ConsumerStream>,
}

impl NatsBusClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn client(&self) -> Result<&Client> {
        self.client.as_ref().ok_or_else(|| anyhow!("bus not connected"))
    }

    fn logical_subject<'a>(stream: &str, message: &'a Message) -> &'a str {
        message
            .subject
            .as_str()
            .strip_prefix(stream)
            .and_then(|rest| rest.strip_prefix('.'))
            .unwrap_or(message.subject.as_str())
    }
}

impl BusClient for NatsBusClient {
    async fn connect(&mut self, endpoint: &str, agent_name: &str) -> Result<()> {
        let client = async_nats::ConnectOptions::new()
            .name(agent_name.to_string())
            .connect(endpoint)
            .await
            .with_context(|| format!("connecting to bus at {endpoint}"))?;
        self.client = Some(client);
        Ok(())
    }

    async fn set_producer(&mut self, stream: &str) -> Result<()> {
        self.producer_stream = Some(stream.to_string());
        Ok(())
    }

    async fn set_consumer(&mut self, stream: &str, pattern: &str) -> Result<()> {
        let regex =
            Regex::new(pattern).with_context(|| format!("compiling consumer pattern {pattern:?}"))?;
        if let Some(existing) = self.consumers.get_mut(stream) {
            existing.patterns.push(regex);
            return Ok(());
        }
        let wildcard = format!("{stream}.>");
        let subscriber = self
            .client()?
            .subscribe(wildcard.clone())
            .await
            .with_context(|| format!("subscribing to {wildcard}"))?;
        self.consumers.insert(
            stream.to_string(),
            ConsumerStream {
                subscriber,
                patterns: vec![regex],
            },
        );
        Ok(())
    }

    async fn send(&mut self, subject: &str, frames: Vec<String>) -> Result<()> {
        let stream = self.producer_stream.clone().unwrap_or_default();
        let full_subject = if stream.is_empty() {
            subject.to_string()
        } else {
            format!("{stream}.{subject}")
        };
        let payload = frames.join(&FRAME_SEPARATOR.to_string());
        self.client()?
            .publish(full_subject, payload.into_bytes().into())
            .await
            .context("publishing bus message")?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<BusMessage> {
        loop {
            if self.consumers.is_empty() {
                return Err(anyhow!("no consumer registered"));
            }
            let streams: Vec<String> = self.consumers.keys().cloned().collect();
            let mut polls: Vec<Pin<Box<dyn std::future::Future<Output = Option<Message>>>>> =
                Vec::with_capacity(streams.len());
            for stream in &streams {
                let consumer = self
                    .consumers
                    .get_mut(stream)
                    .expect("stream key was just read from self.consumers");
                polls.push(Box::pin(consumer.subscriber.next()));
            }
            let (next, index, _rest) = select_all(polls).await;
            let stream = streams[index].clone();
            let Some(message) = next else {
                self.consumers.remove(&stream);
                continue;
            };
            let logical_subject = Self::logical_subject(&stream, &message).to_string();
            let matched = self
                .consumers
                .get(&stream)
                .is_some_and(|c| c.patterns.iter().any(|re| re.is_match(&logical_subject)));
            if !matched {
                continue;
            }
            let payload = String::from_utf8_lossy(&message.payload).into_owned();
            let frames = payload.split(FRAME_SEPARATOR).map(str::to_string).collect();
            return Ok(BusMessage::new(logical_subject, frames));
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.consumers.clear();
        self.client = None;
        Ok(())
    }
}
