//! Channel group definitions.

use serde::{Deserialize, Serialize};

use daq_core::limits::{INPUT_BUFFER_SECONDS, OUTPUT_BUFFER_FRACTION};
use daq_core::{DaqError, Result};

/// Direction of every channel in a group. Groups are homogeneous: analog
/// in, analog out, or digital out, never mixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortDirection {
    AnalogInput,
    AnalogOutput,
    DigitalOutput,
}

impl PortDirection {
    /// Lane prefix channel identifiers must carry (`ai0`, `ao1`,
    /// `port0/line3`).
    pub fn lane_prefix(&self) -> &'static str {
        match self {
            PortDirection::AnalogInput => "ai",
            PortDirection::AnalogOutput => "ao",
            PortDirection::DigitalOutput => "port",
        }
    }

    pub fn is_output(&self) -> bool {
        !matches!(self, PortDirection::AnalogInput)
    }
}

impl std::fmt::Display for PortDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortDirection::AnalogInput => write!(f, "analog_input"),
            PortDirection::AnalogOutput => write!(f, "analog_output"),
            PortDirection::DigitalOutput => write!(f, "digital_output"),
        }
    }
}

/// One direction of a device's channels, bound once at task setup and
/// immutable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelGroup {
    pub device: String,
    pub channels: Vec<String>,
    pub direction: PortDirection,
    /// Samples per second per channel.
    pub sample_rate: f64,
    /// Samples per buffer cycle. Input groups default to one second of
    /// samples; output groups to a quarter of that for shorter refill
    /// latency.
    pub chunk_samples: usize,
}

impl ChannelGroup {
    pub fn new(
        device: impl Into<String>,
        channels: Vec<String>,
        direction: PortDirection,
        sample_rate: f64,
        chunk_samples: Option<usize>,
    ) -> Result<Self> {
        let device = device.into();
        if device.is_empty() {
            return Err(DaqError::ChannelGroup("device name is empty".into()));
        }
        if channels.is_empty() {
            return Err(DaqError::ChannelGroup(format!(
                "channel group on '{}' has no channels",
                device
            )));
        }
        let prefix = direction.lane_prefix();
        for ch in &channels {
            if !ch.starts_with(prefix) {
                return Err(DaqError::ChannelGroup(format!(
                    "channel '{}' is not a {} lane (expected '{}…'); groups must be homogeneous",
                    ch, direction, prefix
                )));
            }
        }
        if sample_rate <= 0.0 {
            return Err(DaqError::ChannelGroup(format!(
                "invalid sample rate {}",
                sample_rate
            )));
        }

        let chunk_samples = chunk_samples.unwrap_or_else(|| {
            let base = (sample_rate * INPUT_BUFFER_SECONDS) as usize;
            if direction.is_output() {
                ((base as f64 * OUTPUT_BUFFER_FRACTION) as usize).max(1)
            } else {
                base.max(1)
            }
        });
        if chunk_samples == 0 {
            return Err(DaqError::ChannelGroup("chunk size must be positive".into()));
        }

        Ok(Self {
            device,
            channels,
            direction,
            sample_rate,
            chunk_samples,
        })
    }

    /// Number of channels in the group.
    pub fn width(&self) -> usize {
        self.channels.len()
    }

    /// Duration of one buffer cycle.
    pub fn chunk_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.chunk_samples as f64 / self.sample_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lanes(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn accepts_homogeneous_groups() {
        let group = ChannelGroup::new(
            "dev1",
            lanes(&["ai0", "ai1", "ai7"]),
            PortDirection::AnalogInput,
            10_000.0,
            None,
        )
        .unwrap();
        assert_eq!(group.width(), 3);
        // Input default: one second of samples.
        assert_eq!(group.chunk_samples, 10_000);
    }

    #[test]
    fn output_buffers_default_smaller() {
        let group = ChannelGroup::new(
            "dev1",
            lanes(&["ao0"]),
            PortDirection::AnalogOutput,
            10_000.0,
            None,
        )
        .unwrap();
        assert_eq!(group.chunk_samples, 2_500);
    }

    #[test]
    fn rejects_mixed_directions() {
        let err = ChannelGroup::new(
            "dev1",
            lanes(&["ai0", "ao0"]),
            PortDirection::AnalogInput,
            1000.0,
            None,
        )
        .unwrap_err();
        assert!(err.to_string().contains("homogeneous"));
    }

    #[test]
    fn digital_lanes_use_port_naming() {
        assert!(ChannelGroup::new(
            "dev1",
            lanes(&["port0/line0", "port0/line4"]),
            PortDirection::DigitalOutput,
            1000.0,
            Some(256),
        )
        .is_ok());

        assert!(ChannelGroup::new(
            "dev1",
            lanes(&["ao0"]),
            PortDirection::DigitalOutput,
            1000.0,
            None,
        )
        .is_err());
    }

    #[test]
    fn rejects_degenerate_parameters() {
        assert!(
            ChannelGroup::new("dev1", lanes(&[]), PortDirection::AnalogInput, 1e3, None).is_err()
        );
        assert!(ChannelGroup::new(
            "dev1",
            lanes(&["ai0"]),
            PortDirection::AnalogInput,
            0.0,
            None
        )
        .is_err());
        assert!(
            ChannelGroup::new("", lanes(&["ai0"]), PortDirection::AnalogInput, 1e3, None).is_err()
        );
    }
}
