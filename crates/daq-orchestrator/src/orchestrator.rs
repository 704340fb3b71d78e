//! Launch, discover, health-check, terminate.

use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::{debug, info, warn};

use daq_core::limits::{WARMUP_POLL_INTERVAL, WARMUP_TIMEOUT};
use daq_core::{DaqError, Result};
use daq_protocol::{ControlClient, Serializer};

use crate::host::{HostSpec, RemoteProcessHandle};
use crate::probe::{
    launch_command, launch_pattern, match_pids, parse_remote_listing, remote_kill_command,
    remote_list_command, LocalProbe,
};

/// Orchestrates service host processes across the fleet.
pub struct Orchestrator {
    pub warmup: Duration,
    pub poll: Duration,
    pub serializer: Serializer,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self {
            warmup: WARMUP_TIMEOUT,
            poll: WARMUP_POLL_INTERVAL,
            serializer: Serializer::Json,
        }
    }
}

impl Orchestrator {
    /// Launch a service host process and confirm it live.
    ///
    /// Liveness has two gates inside the warmup window: the launch
    /// command must appear in the host's process table (excluding the
    /// discovery command itself), and the control surface must answer a
    /// ping. Every failure mode (spawn error, PID never found, ping
    /// dead) is reported as an error within the window, never a hang.
    pub async fn start_server(
        &self,
        host: &HostSpec,
        service: &str,
        port: u16,
    ) -> Result<RemoteProcessHandle> {
        let command = launch_command(service, self.serializer.as_str(), port);
        let pattern = launch_pattern(service, port);
        info!(service, port, host = %host.address, "launching service process");

        self.spawn(host, &command).await?;

        let deadline = Instant::now() + self.warmup;
        let mut pids = Vec::new();
        loop {
            if Instant::now() >= deadline {
                return Err(DaqError::Orchestration(format!(
                    "service '{}' did not come up within {:?} (pids found: {:?})",
                    service, self.warmup, pids
                )));
            }
            tokio::time::sleep(self.poll).await;

            pids = match self.find_pids(host, &pattern).await {
                Ok(pids) => pids,
                Err(err) => {
                    debug!(%err, "discovery attempt failed");
                    continue;
                }
            };
            if pids.is_empty() {
                continue;
            }

            // Process is up; now the control surface has to answer.
            match ControlClient::connect(&host.control_addr(port), self.serializer).await {
                Ok(mut client) => match client.ping().await {
                    Ok(true) => {
                        info!(service, ?pids, "service is live");
                        return Ok(RemoteProcessHandle {
                            host: host.clone(),
                            service: service.to_string(),
                            port,
                            pids,
                            reachable: true,
                        });
                    }
                    _ => debug!(service, "process found but ping not answered yet"),
                },
                Err(err) => debug!(service, %err, "control connect pending"),
            }
        }
    }

    async fn spawn(&self, host: &HostSpec, command: &[String]) -> Result<()> {
        let mut cmd = if host.is_local() {
            let mut cmd = Command::new(&command[0]);
            cmd.args(&command[1..]);
            cmd
        } else {
            let mut cmd = Command::new("ssh");
            cmd.arg(host.ssh_target()).arg(command.join(" "));
            cmd
        };
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false);
        cmd.spawn()
            .map_err(|e| DaqError::Orchestration(format!("launch failed: {}", e)))?;
        Ok(())
    }

    /// Discover PIDs matching the launch pattern on a host.
    pub async fn find_pids(&self, host: &HostSpec, pattern: &str) -> Result<Vec<u32>> {
        if host.is_local() {
            let pattern = pattern.to_string();
            let own_pid = std::process::id();
            let listing = tokio::task::spawn_blocking(move || LocalProbe::new().list())
                .await
                .map_err(|e| DaqError::Orchestration(e.to_string()))?;
            Ok(match_pids(&listing, &pattern, &[own_pid]))
        } else {
            let (program, args) = remote_list_command(host, pattern);
            let output = Command::new(&program)
                .args(&args)
                .output()
                .await
                .map_err(|e| DaqError::Orchestration(format!("remote listing failed: {}", e)))?;
            let stdout = String::from_utf8_lossy(&output.stdout);
            let listing = parse_remote_listing(host.os, &stdout);
            Ok(match_pids(&listing, pattern, &[]))
        }
    }

    /// Send a termination signal to every PID of a handle. `Ok(true)`
    /// when every signal was delivered.
    pub async fn kill(&self, handle: &RemoteProcessHandle) -> Result<bool> {
        if handle.pids.is_empty() {
            return Ok(true);
        }
        if handle.host.is_local() {
            let pids = handle.pids.clone();
            tokio::task::spawn_blocking(move || {
                let mut probe = LocalProbe::new();
                pids.iter().all(|pid| probe.kill(*pid))
            })
            .await
            .map_err(|e| DaqError::Orchestration(e.to_string()))
        } else {
            let (program, args) = remote_kill_command(&handle.host, &handle.pids);
            let status = Command::new(&program)
                .args(&args)
                .status()
                .await
                .map_err(|e| DaqError::Orchestration(format!("remote kill failed: {}", e)))?;
            Ok(status.success())
        }
    }

    /// Re-query the process table for a handle's PIDs.
    pub async fn is_running(&self, handle: &RemoteProcessHandle) -> Result<bool> {
        if handle.pids.is_empty() {
            return Ok(false);
        }
        if handle.host.is_local() {
            let pids = handle.pids.clone();
            tokio::task::spawn_blocking(move || LocalProbe::new().any_running(&pids))
                .await
                .map_err(|e| DaqError::Orchestration(e.to_string()))
        } else {
            let pattern = launch_pattern(&handle.service, handle.port);
            Ok(!self.find_pids(&handle.host, &pattern).await?.is_empty())
        }
    }

    /// Ping-based liveness. Any transport failure reads as dead, never
    /// as an error.
    pub async fn heartbeat(&self, handle: &mut RemoteProcessHandle) -> bool {
        let alive = match ControlClient::connect(
            &handle.host.control_addr(handle.port),
            self.serializer,
        )
        .await
        {
            Ok(mut client) => client.ping().await.unwrap_or(false),
            Err(_) => false,
        };
        if handle.reachable && !alive {
            warn!(service = %handle.service, "service stopped answering pings");
        }
        handle.reachable = alive;
        alive
    }

    /// Ask a live service to tear down and exit, then confirm
    /// termination and invalidate the handle.
    pub async fn stop_server(&self, handle: &mut RemoteProcessHandle) -> Result<bool> {
        let addr = handle.host.control_addr(handle.port);
        match ControlClient::connect(&addr, self.serializer).await {
            Ok(mut client) => {
                if let Err(err) = client.finish(true).await {
                    warn!(service = %handle.service, %err, "graceful stop failed, killing");
                    self.kill(handle).await?;
                }
            }
            Err(_) => {
                // Control surface already gone; fall back to signals.
                self.kill(handle).await?;
            }
        }

        let deadline = Instant::now() + self.warmup;
        while Instant::now() < deadline {
            if !self.is_running(handle).await.unwrap_or(false) {
                handle.pids.clear();
                handle.reachable = false;
                return Ok(true);
            }
            tokio::time::sleep(self.poll).await;
        }
        Ok(false)
    }
}
