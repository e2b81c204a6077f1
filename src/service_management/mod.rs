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

//! Abstraction over the four lifecycle operations the Configurator needs
//! from the host's service manager: `enable`, `disable`, `start`, `stop`,
//! each applied to an already-templated service instance name such as
//! `composite-metrics@R1-temperature`. The init system's control binary is
//! detected once at startup by probing `$PATH`; no unit files are created
//! or removed here, only instances of a pre-installed template unit are
//! driven.

mod openrc;
mod systemd;

pub use openrc::OpenRcManager;
pub use systemd::SystemdManager;

use log::warn;
use std::path::PathBuf;

/// The result of invoking the service manager: the child process's exit
/// status, or a negative value if the process could not be launched at all.
/// No retries are attempted; the caller logs and moves on.
pub type ExitStatus = i32;

pub(crate) const LAUNCH_FAILURE: ExitStatus = -1;

pub trait ServiceController {
    async fn enable(&self, service: &str) -> ExitStatus;
    async fn disable(&self, service: &str) -> ExitStatus;
    async fn start(&self, service: &str) -> ExitStatus;
    async fn stop(&self, service: &str) -> ExitStatus;
}

#[derive(Clone, Debug)]
pub enum Manager {
    Systemd(SystemdManager),
    OpenRc(OpenRcManager),
}

impl Manager {
    /// Detects the host's init system by probing `$PATH` for its control
    /// binary. Systemd is preferred when both happen to be present.
    pub fn detect() -> Self {
        if SystemdManager::detected() {
            Manager::Systemd(SystemdManager::default())
        } else if OpenRcManager::detected() {
            Manager::OpenRc(OpenRcManager::default())
        } else {
            warn!("No supported service manager detected on $PATH; defaulting to systemd calling convention");
            Manager::Systemd(SystemdManager::default())
        }
    }

    pub fn is_systemd(&self) -> bool {
        matches!(self, Manager::Systemd(_))
    }
}

impl ServiceController for Manager {
    async fn enable(&self, service: &str) -> ExitStatus {
        match self {
            Manager::Systemd(m) => m.enable(service).await,
            Manager::OpenRc(m) => m.enable(service).await,
        }
    }

    async fn disable(&self, service: &str) -> ExitStatus {
        match self {
            Manager::Systemd(m) => m.disable(service).await,
            Manager::OpenRc(m) => m.disable(service).await,
        }
    }

    async fn start(&self, service: &str) -> ExitStatus {
        match self {
            Manager::Systemd(m) => m.start(service).await,
            Manager::OpenRc(m) => m.start(service).await,
        }
    }

    async fn stop(&self, service: &str) -> ExitStatus {
        match self {
            Manager::Systemd(m) => m.stop(service).await,
            Manager::OpenRc(m) => m.stop(service).await,
        }
    }
}

/// Searches `$PATH` for an executable with the given name.
pub fn find_on_path(executable: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(executable))
        .find(|candidate| candidate.is_file())
}
