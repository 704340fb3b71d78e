//! `daq-orchestrator`
//!
//! Process orchestration for the service fleet: construct the launch
//! command for a service host process, spawn it locally or over ssh,
//! confirm liveness by PID discovery plus a control-surface ping, and
//! terminate it on demand.
//!
//! Every operation here reports failure as a result; a flaky host must
//! never crash the head node's orchestrator.

pub mod host;
pub mod orchestrator;
pub mod probe;

pub use host::{HostSpec, OsKind, RemoteProcessHandle};
pub use orchestrator::Orchestrator;
pub use probe::{launch_command, launch_pattern, match_pids};
