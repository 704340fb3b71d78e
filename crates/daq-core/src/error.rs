//! Error types shared across the rig-daq crates.
//!
//! The fleet distinguishes two broad failure classes:
//!
//! - **Fatal setup failures** (bad configuration, hardware acquisition at
//!   setup time) abort initialization before any task is armed.
//! - **Recoverable teardown faults** (a driver refusing to stop a
//!   continuously-regenerating output, a handle already torn down) are
//!   logged where they occur and must never abort the remaining stop
//!   sequence. [`HardwareErrorKind::is_recoverable`] is the switch the
//!   stop path consults.

use thiserror::Error;

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, DaqError>;

// =============================================================================
// Hardware Errors
// =============================================================================

/// Category of a hardware/driver fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareErrorKind {
    /// Could not acquire or initialize the channel group. Fatal at setup.
    Acquisition,
    /// Invalid channel/rate/buffer configuration.
    Configuration,
    /// The driver refused to stop a continuously-regenerating output task.
    /// Expected during out-of-order teardown; recoverable.
    Regeneration,
    /// Operation on a handle that has already been released. Recoverable.
    TornDown,
    /// The hardware buffer did not fill/drain within the deadline.
    Timeout,
    /// Anything the driver reported that does not fit the above.
    Fault,
}

impl HardwareErrorKind {
    /// Whether the stop sequence may log this fault and keep going.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            HardwareErrorKind::Regeneration | HardwareErrorKind::TornDown
        )
    }
}

impl std::fmt::Display for HardwareErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            HardwareErrorKind::Acquisition => "acquisition",
            HardwareErrorKind::Configuration => "configuration",
            HardwareErrorKind::Regeneration => "regeneration",
            HardwareErrorKind::TornDown => "torn_down",
            HardwareErrorKind::Timeout => "timeout",
            HardwareErrorKind::Fault => "fault",
        };
        write!(f, "{}", label)
    }
}

/// Structured driver fault with a category.
#[derive(Error, Debug, Clone)]
#[error("Device '{device}' {kind} error: {message}")]
pub struct HardwareError {
    pub device: String,
    pub kind: HardwareErrorKind,
    pub message: String,
}

impl HardwareError {
    pub fn new(
        device: impl Into<String>,
        kind: HardwareErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            device: device.into(),
            kind,
            message: message.into(),
        }
    }

    /// Whether the stop sequence may log this fault and keep going.
    pub fn is_recoverable(&self) -> bool {
        self.kind.is_recoverable()
    }
}

// =============================================================================
// Workspace Error Type
// =============================================================================

/// Primary error type for the rig-daq workspace.
#[derive(Error, Debug)]
pub enum DaqError {
    /// Configuration values parsed but failed semantic validation.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Invalid channel group definition (mixed directions, empty list,
    /// non-positive rate).
    #[error("Channel group error: {0}")]
    ChannelGroup(String),

    /// Structured driver fault. Recoverability is carried on the kind.
    #[error("{0}")]
    Hardware(#[from] HardwareError),

    /// A comm channel endpoint was used after `close()`.
    #[error("Comm channel is closed")]
    ChannelClosed,

    /// A comm payload did not match the receiver's fixed shape.
    #[error("Chunk shape {got:?} does not match channel shape {want:?}")]
    ShapeMismatch {
        got: (usize, usize),
        want: (usize, usize),
    },

    /// Waveform or playlist construction failed.
    #[error("Stimulus error: {0}")]
    Stimulus(String),

    /// A lifecycle operation was invoked in a state that forbids it.
    #[error("Invalid service transition: {0}")]
    ServiceState(String),

    /// Persisting acquired data failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Wire-protocol framing or payload decoding failed.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The remote side answered with an error status.
    #[error("Remote error: {0}")]
    Remote(String),

    /// Process-orchestration failure (launch, discovery, liveness). Always
    /// reported to the caller, never allowed to crash the orchestrator.
    #[error("Orchestration error: {0}")]
    Orchestration(String),

    /// Standard I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DaqError {
    /// True when the error may be logged and skipped during teardown.
    pub fn is_recoverable(&self) -> bool {
        match self {
            DaqError::Hardware(err) => err.is_recoverable(),
            DaqError::ChannelClosed => true,
            _ => false,
        }
    }
}
