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

//! The Configurator actor: consumes asset-change events from the bus,
//! maintains the [`AssetStore`], and on an idle tick regenerates every
//! composite-metric definition's config file and service instance,
//! notifying on any topic that disappears in the process.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use log::{error, warn};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

use crate::asset::AssetType;
use crate::asset_store::{AssetStore, PortAliases};
use crate::bus::{BusClient, BusMessage};
use crate::config_emitter;
use crate::error::ControlError;
use crate::fsutil;
use crate::notifier;
use crate::service_management::ServiceController;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initial,
    Connected,
    Running,
}

/// A parsed control-channel command. `Unknown` carries the unrecognized
/// verb so the handler can log it without rejecting the message — the
/// control channel's contract is "unknown commands succeed with a warning"
/// (§6), not outright rejection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Connect { endpoint: String, agent_name: String },
    Producer { stream: String },
    Consumer { stream: String, pattern: String },
    StateFile { path: String },
    CfgDirectory { path: String },
    Load,
    Term,
    IsPropagationNeeded(bool),
    Unknown(String),
}

impl Command {
    pub fn parse(frames: &[String]) -> Result<Command, ControlError> {
        let verb = frames.first().map(String::as_str).unwrap_or_default();
        let frame = |index: usize| frames.get(index).cloned().ok_or(ControlError::MissingFrame { index });
        match verb {
            "$TERM" => Ok(Command::Term),
            "CONNECT" => Ok(Command::Connect {
                endpoint: frame(1)?,
                agent_name: frame(2)?,
            }),
            "PRODUCER" => Ok(Command::Producer { stream: frame(1)? }),
            "CONSUMER" => Ok(Command::Consumer {
                stream: frame(1)?,
                pattern: frame(2)?,
            }),
            "STATE_FILE" => Ok(Command::StateFile { path: frame(1)? }),
            "CFG_DIRECTORY" => Ok(Command::CfgDirectory { path: frame(1)? }),
            "LOAD" => Ok(Command::Load),
            "IS_PROPAGATION_NEEDED" => Ok(Command::IsPropagationNeeded(frame(1)? == "true")),
            other => Ok(Command::Unknown(other.to_string())),
        }
    }
}

/// True when `path`'s parent names an existing directory, so a file at
/// `path` could actually be created there. A path with no parent component
/// (a bare file name) is resolved against the current directory.
fn parent_dir_exists(path: &Path) -> bool {
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
    fsutil::metadata(parent).is_ok_and(|meta| meta.is_dir())
}

pub struct Configurator<B: BusClient, S: ServiceController> {
    bus: B,
    service: S,
    commands: UnboundedReceiver<Vec<String>>,
    state: State,
    store: AssetStore,
    cfg_dir: Option<PathBuf>,
    state_file: Option<PathBuf>,
    port_aliases: PortAliases,
    propagate: bool,
    dirty: bool,
    idle_timeout: Duration,
    cancel: CancellationToken,
}

impl<B: BusClient, S: ServiceController> Configurator<B, S> {
    pub fn new(
        bus: B,
        service: S,
        commands: UnboundedReceiver<Vec<String>>,
        agent_name: impl Into<String>,
        port_aliases: PortAliases,
        idle_timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let agent_name = agent_name.into();
        Self {
            store: AssetStore::new(agent_name, port_aliases.clone()),
            bus,
            service,
            commands,
            state: State::Initial,
            cfg_dir: None,
            state_file: None,
            port_aliases,
            propagate: true,
            dirty: false,
            idle_timeout,
            cancel,
        }
    }

    /// Drives the actor until `$TERM` (via the command channel or the
    /// cancellation token) or the command channel closes.
    pub async fn run(mut self) -> Result<()> {
        loop {
            let idle = tokio::time::sleep(self.idle_timeout);
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.handle_command(Command::Term).await;
                    break;
                }
                received = self.commands.recv() => {
                    let Some(frames) = received else { break };
                    match Command::parse(&frames) {
                        Ok(command) => {
                            let terminating = matches!(command, Command::Term);
                            self.handle_command(command).await;
                            if terminating {
                                break;
                            }
                        }
                        Err(err) => warn!("malformed control message: {err}"),
                    }
                }
                message = self.bus.recv(), if self.state == State::Running => {
                    match message {
                        Ok(message) => self.on_bus_message(message),
                        Err(err) => error!("bus recv error: {err:#}"),
                    }
                }
                _ = idle => {
                    if self.dirty {
                        self.regenerate().await;
                        self.dirty = false;
                    }
                }
            }
        }
        Ok(())
    }

    fn on_bus_message(&mut self, message: BusMessage) {
        let Some(payload) = message.frames.first() else {
            warn!("asset message carried no payload frame; dropping");
            return;
        };
        let wire: crate::asset::AssetWireMessage = match serde_json::from_str(payload) {
            Ok(wire) => wire,
            Err(err) => {
                warn!("dropping malformed asset message: {err}");
                return;
            }
        };
        self.store.apply(wire.into());
        if self.store.reconfig_pending() {
            self.dirty = true;
        }
    }

    async fn handle_command(&mut self, command: Command) -> i32 {
        match command {
            Command::Term => {
                if let Some(path) = self.state_file.clone() {
                    if let Err(err) = self.store.save(&path).await {
                        error!("saving snapshot on shutdown: {err:#}");
                    }
                }
                if let Err(err) = self.bus.close().await {
                    error!("closing bus: {err:#}");
                }
                1
            }
            Command::Connect { endpoint, agent_name } => {
                match self.bus.connect(&endpoint, &agent_name).await {
                    Ok(()) => self.state = State::Connected,
                    Err(err) => error!("connecting to bus at {endpoint}: {err:#}"),
                }
                0
            }
            Command::Producer { stream } => {
                if let Err(err) = self.bus.set_producer(&stream).await {
                    error!("becoming producer on {stream}: {err:#}");
                }
                0
            }
            Command::Consumer { stream, pattern } => {
                match self.bus.set_consumer(&stream, &pattern).await {
                    Ok(()) => {
                        if self.state == State::Connected {
                            self.state = State::Running;
                        }
                    }
                    Err(err) => error!("subscribing to {stream} ({pattern}): {err:#}"),
                }
                0
            }
            Command::StateFile { path } => {
                let creatable = match fsutil::metadata(&path) {
                    Ok(meta) => !meta.is_dir(),
                    Err(_) => parent_dir_exists(Path::new(&path)),
                };
                if creatable {
                    self.state_file = Some(PathBuf::from(path));
                } else {
                    error!("{}", ControlError::InvalidStateFilePath { path });
                }
                0
            }
            Command::CfgDirectory { path } => {
                match fsutil::metadata(&path) {
                    Ok(meta) if meta.is_dir() => self.cfg_dir = Some(PathBuf::from(path)),
                    _ => error!("{}", ControlError::InvalidConfigDirectory { path }),
                }
                0
            }
            Command::Load => {
                let Some(path) = self.state_file.clone() else {
                    warn!("LOAD requested with no STATE_FILE configured; ignoring");
                    return 0;
                };
                match AssetStore::load(&path, self.port_aliases.clone()).await {
                    Ok(store) => self.store = store,
                    Err(err) => error!("loading snapshot from {}: {err:#}", path.display()),
                }
                0
            }
            Command::IsPropagationNeeded(flag) => {
                self.propagate = flag;
                0
            }
            Command::Unknown(verb) => {
                warn!("ignoring unknown control command {verb:?}");
                0
            }
        }
    }

    /// Rebuilds every config file and service instance from the current
    /// `AssetStore`, then notifies on any topic that existed before this
    /// pass but not after. See §4.4 for the full five-step algorithm.
    async fn regenerate(&mut self) {
        let prev = self.store.produced_metrics().clone();

        let Some(dir) = self.cfg_dir.clone() else {
            warn!("regenerate requested with no CFG_DIRECTORY configured; skipping");
            return;
        };

        if let Err(err) = self.clean_cfg_dir(&dir).await {
            error!("aborting regeneration, cfg directory cleanup failed: {err:#}");
            return;
        }

        self.store.reassign(self.propagate);

        let containers: Vec<(String, AssetType)> = self
            .store
            .names()
            .into_iter()
            .filter_map(|name| self.store.asset(&name).filter(|a| a.is_container()).map(|a| (name, a.asset_type)))
            .collect();

        let mut curr = HashSet::new();
        for (name, asset_type) in containers {
            let functions: &[Option<&str>] = if asset_type == AssetType::Rack {
                &[Some("input"), Some("output")]
            } else {
                &[None]
            };
            for function in functions {
                let definitions = config_emitter::emit(&self.store, &dir, &name, *function).await;
                for definition in definitions {
                    self.service.enable(&definition.service_name).await;
                    self.service.start(&definition.service_name).await;
                    curr.insert(definition.output_topic);
                }
            }
        }

        for topic in prev.difference(&curr) {
            if let Err(err) = notifier::notify(&mut self.bus, topic).await {
                error!("notifying unavailability of {topic}: {err:#}");
            }
        }
        self.store.set_produced_metrics(curr);
    }

    /// Stops, disables, and removes every top-level `*.cfg` file in `dir`,
    /// deriving each service instance name from the file's basename.
    async fn clean_cfg_dir(&self, dir: &PathBuf) -> Result<()> {
        for entry in fsutil::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("cfg") {
                continue;
            }
            let Some(instance) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let service_name = format!("composite-metrics@{instance}");
            self.service.stop(&service_name).await;
            self.service.disable(&service_name).await;
            fsutil::remove_file(&path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::{AssetOperation, AssetRecord};
    use crate::bus::loopback::{LoopbackBus, Wire};
    use crate::service_management::ExitStatus;
    use std::collections::HashMap;

    #[derive(Default, Clone)]
    struct StubService;

    impl ServiceController for StubService {
        async fn enable(&self, _service: &str) -> ExitStatus {
            0
        }
        async fn disable(&self, _service: &str) -> ExitStatus {
            0
        }
        async fn start(&self, _service: &str) -> ExitStatus {
            0
        }
        async fn stop(&self, _service: &str) -> ExitStatus {
            0
        }
    }

    fn rack(name: &str) -> AssetRecord {
        AssetRecord {
            name: name.to_string(),
            operation: AssetOperation::Create,
            asset_type: AssetType::Rack,
            subtype: "container".to_string(),
            aux: HashMap::new(),
            ext: HashMap::new(),
        }
    }

    fn sensor(name: &str, logical_asset: &str, port: &str) -> AssetRecord {
        let mut ext = HashMap::new();
        ext.insert("logical_asset".to_string(), logical_asset.to_string());
        ext.insert("port".to_string(), port.to_string());
        ext.insert("calibration_offset_t".to_string(), "0".to_string());
        AssetRecord {
            name: name.to_string(),
            operation: AssetOperation::Create,
            asset_type: AssetType::Device,
            subtype: crate::asset::SENSOR_SUBTYPE.to_string(),
            aux: HashMap::new(),
            ext,
        }
    }

    fn new_configurator(bus: LoopbackBus, dir: PathBuf) -> Configurator<LoopbackBus, StubService> {
        let (_tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let mut configurator = Configurator::new(
            bus,
            StubService,
            rx,
            "test-agent",
            PortAliases::new(),
            Duration::from_secs(30),
            CancellationToken::new(),
        );
        configurator.cfg_dir = Some(dir);
        configurator
    }

    #[test]
    fn parses_every_known_verb() {
        let f = |parts: &[&str]| parts.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert_eq!(Command::parse(&f(&["$TERM"])).unwrap(), Command::Term);
        assert_eq!(
            Command::parse(&f(&["CONNECT", "nats://x", "agent"])).unwrap(),
            Command::Connect { endpoint: "nats://x".into(), agent_name: "agent".into() }
        );
        assert_eq!(
            Command::parse(&f(&["IS_PROPAGATION_NEEDED", "true"])).unwrap(),
            Command::IsPropagationNeeded(true)
        );
        assert_eq!(Command::parse(&f(&["WHATEVER"])).unwrap(), Command::Unknown("WHATEVER".into()));
    }

    #[test]
    fn missing_frame_is_rejected() {
        let f = vec!["CONNECT".to_string(), "nats://x".to_string()];
        assert!(Command::parse(&f).is_err());
    }

    #[tokio::test]
    async fn state_file_accepts_a_not_yet_existing_path_in_an_existing_directory() {
        let wire = Wire::new();
        let dir = tempfile::tempdir().unwrap();
        let mut configurator = new_configurator(LoopbackBus::new(&wire), dir.path().to_path_buf());
        let path = dir.path().join("state.toml");

        configurator
            .handle_command(Command::StateFile { path: path.display().to_string() })
            .await;

        assert_eq!(configurator.state_file, Some(path));
    }

    #[tokio::test]
    async fn state_file_rejects_an_existing_directory() {
        let wire = Wire::new();
        let dir = tempfile::tempdir().unwrap();
        let mut configurator = new_configurator(LoopbackBus::new(&wire), dir.path().to_path_buf());

        configurator
            .handle_command(Command::StateFile { path: dir.path().display().to_string() })
            .await;

        assert_eq!(configurator.state_file, None);
    }

    #[tokio::test]
    async fn state_file_rejects_a_path_whose_parent_does_not_exist() {
        let wire = Wire::new();
        let dir = tempfile::tempdir().unwrap();
        let mut configurator = new_configurator(LoopbackBus::new(&wire), dir.path().to_path_buf());
        let path = dir.path().join("no-such-subdir").join("state.toml");

        configurator
            .handle_command(Command::StateFile { path: path.display().to_string() })
            .await;

        assert_eq!(configurator.state_file, None);
    }

    #[tokio::test]
    async fn state_file_rejects_a_path_whose_parent_is_not_a_directory() {
        let wire = Wire::new();
        let dir = tempfile::tempdir().unwrap();
        let mut configurator = new_configurator(LoopbackBus::new(&wire), dir.path().to_path_buf());
        let not_a_dir = dir.path().join("plain-file");
        fsutil::write_string(&not_a_dir, "x".to_string()).await.unwrap();
        let path = not_a_dir.join("state.toml");

        configurator
            .handle_command(Command::StateFile { path: path.display().to_string() })
            .await;

        assert_eq!(configurator.state_file, None);
    }

    /// S4 — regenerating after deleting a rack notifies on every topic it
    /// used to produce and leaves `produced_metrics` empty.
    #[tokio::test]
    async fn s4_regeneration_delta_notifies_vanished_topics() {
        let wire = Wire::new();
        let mut producer = LoopbackBus::new(&wire);
        producer.set_producer("metrics").await.unwrap();
        let mut listener = LoopbackBus::new(&wire);
        listener.set_consumer("metrics", ".*").await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let mut configurator = new_configurator(producer, dir.path().to_path_buf());

        configurator.store.apply(rack("R1"));
        configurator.store.apply(sensor("S1", "R1", "TH1"));
        configurator.regenerate().await;
        let before = configurator.store.produced_metrics().clone();
        assert!(!before.is_empty());

        let mut delete_rack = rack("R1");
        delete_rack.operation = AssetOperation::Delete;
        configurator.store.apply(delete_rack);
        configurator.regenerate().await;

        assert!(configurator.store.produced_metrics().is_empty());

        let mut notified = HashSet::new();
        for _ in 0..before.len() {
            let message = listener.recv().await.unwrap();
            assert_eq!(message.frames[0], "METRICUNAVAILABLE");
            notified.insert(message.frames[1].clone());
        }
        assert_eq!(notified, before);
    }

    /// Invariant 5 — regenerating twice with no intervening events is a
    /// no-op on `produced_metrics`.
    #[tokio::test]
    async fn regeneration_is_idempotent_without_intervening_events() {
        let wire = Wire::new();
        let mut producer = LoopbackBus::new(&wire);
        producer.set_producer("metrics").await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let mut configurator = new_configurator(producer, dir.path().to_path_buf());
        configurator.store.apply(rack("R1"));
        configurator.store.apply(sensor("S1", "R1", "TH1"));

        configurator.regenerate().await;
        let first = configurator.store.produced_metrics().clone();
        configurator.regenerate().await;
        let second = configurator.store.produced_metrics().clone();

        assert_eq!(first, second);
    }
}
