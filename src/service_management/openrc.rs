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

use super::{find_on_path, ExitStatus, ServiceController, LAUNCH_FAILURE};
use log::{debug, error};
use std::process::Stdio;
use tokio::process::Command;

const RC_SERVICE: &str = "rc-service";
const RC_UPDATE: &str = "rc-update";

#[derive(Clone, Debug, Default)]
pub struct OpenRcManager {}

impl OpenRcManager {
    pub fn detected() -> bool {
        find_on_path(RC_SERVICE).is_some() && find_on_path(RC_UPDATE).is_some()
    }

    async fn run(program: &str, args: &[&str]) -> ExitStatus {
        let result = Command::new(program)
            .kill_on_drop(true)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .args(args)
            .output()
            .await;
        match result {
            Ok(output) => {
                let code = output.status.code().unwrap_or(LAUNCH_FAILURE);
                if output.status.success() {
                    debug!("{program} {} succeeded", args.join(" "));
                } else {
                    let err = String::from_utf8_lossy(&output.stderr);
                    error!(
                        "{program} {} failed with exit code {code}: {err}",
                        args.join(" ")
                    );
                }
                code
            }
            Err(err) => {
                error!("Failed to launch {program} {}: {err}", args.join(" "));
                LAUNCH_FAILURE
            }
        }
    }
}

impl ServiceController for OpenRcManager {
    async fn enable(&self, service: &str) -> ExitStatus {
        Self::run(RC_UPDATE, &["add", service, "default"]).await
    }

    async fn disable(&self, service: &str) -> ExitStatus {
        Self::run(RC_UPDATE, &["del", service, "default"]).await
    }

    async fn start(&self, service: &str) -> ExitStatus {
        Self::run(RC_SERVICE, &[service, "start"]).await
    }

    async fn stop(&self, service: &str) -> ExitStatus {
        Self::run(RC_SERVICE, &[service, "stop"]).await
    }
}
