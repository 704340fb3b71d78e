//! `daq-task`
//!
//! The triggered I/O layer: a [`ChannelGroup`] binds one direction of a
//! hardware device's channels, a [`SampleSource`]/[`SampleSink`] pair is
//! the narrow capability seam to the vendor driver, and [`InputTask`] /
//! [`OutputTask`] run the buffer loops that connect hardware buffers to
//! playlist sequencers and consumer workers.
//!
//! Synchronization model: exactly one input task owns the master sample
//! clock. Output tasks arm against that task's start-of-acquisition
//! [`TriggerEdge`], so sample N of every output lane leaves the rack in
//! the same hardware cycle as sample N of the input lanes, bounded by one
//! buffer of latency. Without an input task an output free-runs.

pub mod group;
pub mod input;
pub mod output;
pub mod stream;
pub mod trigger;

pub use group::{ChannelGroup, PortDirection};
pub use input::InputTask;
pub use output::OutputTask;
pub use stream::{HardwareProvider, ProviderRegistry, SampleSink, SampleSource};
pub use trigger::TriggerEdge;

/// Lifecycle of a triggered I/O task.
///
/// Output tasks go Idle→Armed at setup and Armed→Running only once the
/// input task's start trigger fires (immediately when free-running);
/// input tasks go Idle→Running on start. Stopped is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Idle,
    Armed,
    Running,
    Stopped,
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskState::Idle => write!(f, "idle"),
            TaskState::Armed => write!(f, "armed"),
            TaskState::Running => write!(f, "running"),
            TaskState::Stopped => write!(f, "stopped"),
        }
    }
}
