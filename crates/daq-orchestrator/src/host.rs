//! Host descriptors and process handles.

/// Operating system family of a target host; decides which discovery
/// and kill commands are issued remotely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsKind {
    Unix,
    Windows,
}

/// A machine that can host service processes.
#[derive(Debug, Clone)]
pub struct HostSpec {
    /// Empty or loopback means the head node itself.
    pub address: String,
    pub os: OsKind,
    /// ssh user for remote hosts.
    pub user: Option<String>,
}

impl HostSpec {
    pub fn local() -> Self {
        Self {
            address: String::new(),
            os: if cfg!(windows) {
                OsKind::Windows
            } else {
                OsKind::Unix
            },
            user: None,
        }
    }

    pub fn remote(address: impl Into<String>, os: OsKind, user: Option<String>) -> Self {
        Self {
            address: address.into(),
            os,
            user,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self.address.as_str(), "" | "localhost" | "127.0.0.1")
    }

    /// `user@host` target handed to ssh.
    pub fn ssh_target(&self) -> String {
        match &self.user {
            Some(user) => format!("{}@{}", user, self.address),
            None => self.address.clone(),
        }
    }

    /// Address a control client should dial for a service on `port`.
    pub fn control_addr(&self, port: u16) -> String {
        if self.is_local() {
            format!("127.0.0.1:{}", port)
        } else {
            format!("{}:{}", self.address, port)
        }
    }
}

/// Liveness record for one launched service process.
#[derive(Debug, Clone)]
pub struct RemoteProcessHandle {
    pub host: HostSpec,
    pub service: String,
    pub port: u16,
    /// PIDs discovered for the launch command; invalidated on confirmed
    /// termination.
    pub pids: Vec<u32>,
    /// Last known reachability of the control surface.
    pub reachable: bool,
}
