//! Typed payloads carried inside control frames.

use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use daq_comm::CommKind;
use daq_core::{DaqError, Result};
use daq_stimulus::PlayOrder;
use daq_task::PortDirection;

/// Reply body of a successful ping.
pub const PONG: &str = "pong";

/// Payload encoding, named in the launch command so both ends agree
/// without negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Serializer {
    #[default]
    Json,
}

impl Serializer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Serializer::Json => "json",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "json" => Ok(Serializer::Json),
            other => Err(DaqError::Protocol(format!("unknown serializer '{}'", other))),
        }
    }

    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            Serializer::Json => {
                serde_json::to_vec(value).map_err(|e| DaqError::Protocol(e.to_string()))
            }
        }
    }

    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        match self {
            Serializer::Json => {
                serde_json::from_slice(bytes).map_err(|e| DaqError::Protocol(e.to_string()))
            }
        }
    }
}

// =============================================================================
// Setup
// =============================================================================

/// Analog-input half of a setup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputParams {
    pub device: String,
    pub channels: Vec<String>,
    pub sample_rate: f64,
    /// Samples per buffer cycle; defaults to one second of samples.
    pub chunk_samples: Option<usize>,
}

/// Stimulus playlist for one output task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistParams {
    /// Pre-rendered waveforms, row-major samples × channels.
    pub waveforms: Vec<Vec<Vec<f64>>>,
    pub order: PlayOrder,
    /// Cycle indefinitely instead of a single pass.
    pub cycle: bool,
}

/// One output task of a setup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputParams {
    pub device: String,
    pub channels: Vec<String>,
    pub direction: PortDirection,
    pub sample_rate: f64,
    pub chunk_samples: Option<usize>,
    pub playlist: PlaylistParams,
}

/// What a consumer worker does with the frames it receives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "role")]
pub enum SinkSpec {
    /// Persist every frame (Queue-backed consumers).
    Save { directory: PathBuf, base: String },
    /// Drain and drop; stands in for display/analysis consumers that
    /// attach through their own channel endpoint.
    Discard,
}

/// Declarative consumer attached to the input task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSpec {
    pub name: String,
    pub channel: CommKind,
    pub sink: SinkSpec,
}

/// Everything a service runtime needs to construct its tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupParams {
    /// Hardware backend name, resolved through the provider registry.
    pub provider: String,
    /// Shuffle seed; pins stimulus order for reproducible runs.
    pub seed: Option<u64>,
    pub input: Option<InputParams>,
    pub outputs: Vec<OutputParams>,
    /// Consumers registered on the input task, in delivery order.
    pub workers: Vec<WorkerSpec>,
    /// Fixed run duration in seconds. `None` runs a finite playlist to
    /// exhaustion, or until `finish` for cycling playlists.
    pub duration_secs: Option<f64>,
}

// =============================================================================
// Control Replies
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinishParams {
    /// Also terminate the hosting process after teardown.
    pub stop_service: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusyReport {
    pub busy: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressReport {
    pub elapsed_secs: f64,
    pub total_secs: Option<f64>,
    /// Samples acquired since the previous progress call.
    pub delta_samples: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupReport {
    pub cleaned: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingReply {
    pub message: String,
    pub service: String,
}
