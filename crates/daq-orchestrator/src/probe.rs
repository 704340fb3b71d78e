//! Launch-command construction and PID discovery.

use sysinfo::{Pid, System};

use crate::host::{HostSpec, OsKind};

/// Command fragments whose presence marks a candidate as part of the
/// discovery machinery itself, not a service process.
const PROBE_MARKERS: &[&str] = &["pgrep", "tasklist", "ssh "];

/// Build the exact launch command for a service host process. The
/// orchestrator pattern-matches this same string during discovery, so
/// the two must never drift apart.
pub fn launch_command(service: &str, serializer: &str, port: u16) -> Vec<String> {
    vec![
        "daq-serviced".into(),
        "--service".into(),
        service.into(),
        "--serializer".into(),
        serializer.into(),
        "--port".into(),
        port.to_string(),
    ]
}

/// The substring used to recognize our process in a process listing.
pub fn launch_pattern(service: &str, port: u16) -> String {
    format!("daq-serviced --service {} --serializer json --port {}", service, port)
}

/// Filter a `(pid, command line)` listing down to the processes that are
/// actually ours: the command line must contain `pattern`, must not be
/// part of the discovery machinery (a `pgrep -f` listing always contains
/// its own invocation), and must not be one of `exclude` (our own PID).
pub fn match_pids(candidates: &[(u32, String)], pattern: &str, exclude: &[u32]) -> Vec<u32> {
    candidates
        .iter()
        .filter(|(pid, cmdline)| {
            cmdline.contains(pattern)
                && !PROBE_MARKERS.iter().any(|marker| cmdline.contains(marker))
                && !exclude.contains(pid)
        })
        .map(|(pid, _)| *pid)
        .collect()
}

// =============================================================================
// Local probe (sysinfo)
// =============================================================================

/// Local process-table probe.
pub struct LocalProbe {
    system: System,
}

impl Default for LocalProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalProbe {
    pub fn new() -> Self {
        Self {
            system: System::new_all(),
        }
    }

    /// Snapshot of every process as `(pid, command line)`.
    pub fn list(&mut self) -> Vec<(u32, String)> {
        self.system.refresh_processes();
        self.system
            .processes()
            .iter()
            .map(|(pid, process)| {
                let cmdline = if process.cmd().is_empty() {
                    process.name().to_string()
                } else {
                    process.cmd().join(" ")
                };
                (pid.as_u32(), cmdline)
            })
            .collect()
    }

    /// Send a termination signal to `pid`.
    pub fn kill(&mut self, pid: u32) -> bool {
        self.system.refresh_processes();
        self.system
            .process(Pid::from_u32(pid))
            .map(|p| p.kill())
            .unwrap_or(false)
    }

    /// Whether any of `pids` is still in the process table.
    pub fn any_running(&mut self, pids: &[u32]) -> bool {
        self.system.refresh_processes();
        pids.iter()
            .any(|pid| self.system.process(Pid::from_u32(*pid)).is_some())
    }
}

// =============================================================================
// Remote command builders
// =============================================================================

/// ssh invocation that lists matching processes on a remote host.
/// Output is parsed by [`parse_remote_listing`].
pub fn remote_list_command(host: &HostSpec, pattern: &str) -> (String, Vec<String>) {
    match host.os {
        OsKind::Unix => (
            "ssh".into(),
            vec![
                host.ssh_target(),
                format!("pgrep -af '{}'", pattern.replace('\'', "'\\''")),
            ],
        ),
        OsKind::Windows => (
            "ssh".into(),
            vec![host.ssh_target(), "tasklist /FO CSV /NH".into()],
        ),
    }
}

/// Parse the remote listing into `(pid, command line)` pairs.
pub fn parse_remote_listing(os: OsKind, stdout: &str) -> Vec<(u32, String)> {
    match os {
        // `pgrep -af`: one `pid cmdline` per line.
        OsKind::Unix => stdout
            .lines()
            .filter_map(|line| {
                let (pid, cmdline) = line.trim().split_once(' ')?;
                Some((pid.parse().ok()?, cmdline.to_string()))
            })
            .collect(),
        // `tasklist /FO CSV /NH`: "name","pid",…
        OsKind::Windows => stdout
            .lines()
            .filter_map(|line| {
                let mut fields = line.split("\",\"");
                let name = fields.next()?.trim_start_matches('"');
                let pid = fields.next()?.parse().ok()?;
                Some((pid, name.to_string()))
            })
            .collect(),
    }
}

/// ssh invocation that terminates the given PIDs on a remote host.
pub fn remote_kill_command(host: &HostSpec, pids: &[u32]) -> (String, Vec<String>) {
    let pid_list: Vec<String> = pids.iter().map(u32::to_string).collect();
    match host.os {
        OsKind::Unix => (
            "ssh".into(),
            vec![
                host.ssh_target(),
                format!("kill -TERM {}", pid_list.join(" ")),
            ],
        ),
        OsKind::Windows => {
            let args: String = pid_list
                .iter()
                .map(|pid| format!("/PID {}", pid))
                .collect::<Vec<_>>()
                .join(" ");
            (
                "ssh".into(),
                vec![host.ssh_target(), format!("taskkill /F {}", args)],
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launch_command_and_pattern_agree() {
        let cmd = launch_command("main-daq", "json", 9000);
        assert_eq!(cmd.join(" "), launch_pattern("main-daq", 9000));
    }

    #[test]
    fn matching_excludes_the_discovery_command_and_self() {
        let pattern = launch_pattern("main-daq", 9000);
        let listing = vec![
            (100, format!("{} --config /etc/daq.toml", pattern)),
            (101, format!("pgrep -af '{}'", pattern)),
            (102, format!("ssh rig-b {}", pattern)),
            (103, pattern.clone()),
            (104, "daq-serviced --service other --serializer json --port 9001".into()),
        ];
        // 103 is our own process (say, launched through our PID).
        let pids = match_pids(&listing, &pattern, &[103]);
        assert_eq!(pids, vec![100]);
    }

    #[test]
    fn parses_pgrep_listings() {
        let parsed = parse_remote_listing(
            OsKind::Unix,
            "812 daq-serviced --service a --serializer json --port 9000\n999 bash\n",
        );
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].0, 812);
        assert!(parsed[0].1.starts_with("daq-serviced"));
    }

    #[test]
    fn parses_tasklist_listings() {
        let parsed = parse_remote_listing(
            OsKind::Windows,
            "\"daq-serviced.exe\",\"4242\",\"Console\",\"1\",\"10,000 K\"\n",
        );
        assert_eq!(parsed, vec![(4242, "daq-serviced.exe".to_string())]);
    }

    #[test]
    fn remote_commands_name_the_right_tools() {
        let unix = HostSpec::remote("rig-b", OsKind::Unix, Some("daq".into()));
        let (prog, args) = remote_list_command(&unix, "daq-serviced");
        assert_eq!(prog, "ssh");
        assert!(args[1].contains("pgrep -af"));

        let (_, kill_args) = remote_kill_command(&unix, &[1, 2]);
        assert_eq!(kill_args[1], "kill -TERM 1 2");

        let windows = HostSpec::remote("rig-w", OsKind::Windows, None);
        let (_, wargs) = remote_kill_command(&windows, &[7]);
        assert!(wargs[1].contains("taskkill /F /PID 7"));
    }
}
