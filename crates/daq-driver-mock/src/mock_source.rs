//! Synthetic analog-input stream.

use std::f64::consts::TAU;
use std::sync::Arc;
use std::time::Duration;

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use daq_core::{DaqError, HardwareError, HardwareErrorKind, Result};
use daq_task::{ChannelGroup, PortDirection, SampleSource, TriggerEdge};

/// Carrier frequency of the synthetic signal, in Hz.
const CARRIER_HZ: f64 = 7.0;

/// Peak-to-peak noise amplitude added to the carrier.
const NOISE_AMPLITUDE: f64 = 0.05;

/// Mock analog-input stream: per-channel sine carrier plus noise.
///
/// Fires its start trigger at `start()`, the start-of-acquisition edge
/// triggered outputs arm against. With `total_samples` set the
/// acquisition is finite and `read_chunk` returns `Ok(None)` once the
/// budget is produced.
pub struct MockSampleSource {
    group: ChannelGroup,
    trigger: Arc<TriggerEdge>,
    rng: StdRng,
    pace: bool,
    total_samples: Option<u64>,
    produced: u64,
    started: bool,
    torn_down: bool,
}

impl MockSampleSource {
    pub fn new(group: ChannelGroup, total_samples: Option<u64>, pace: bool) -> Result<Self> {
        if group.direction != PortDirection::AnalogInput {
            return Err(DaqError::ChannelGroup(format!(
                "mock source requires an analog-input group, got {}",
                group.direction
            )));
        }
        Ok(Self {
            group,
            trigger: TriggerEdge::new(),
            rng: StdRng::from_entropy(),
            pace,
            total_samples,
            produced: 0,
            started: false,
            torn_down: false,
        })
    }

    fn guard(&self, op: &str) -> Result<()> {
        if self.torn_down {
            return Err(DaqError::Hardware(HardwareError::new(
                &self.group.device,
                HardwareErrorKind::TornDown,
                format!("{} on released channel group", op),
            )));
        }
        Ok(())
    }
}

impl SampleSource for MockSampleSource {
    fn start(&mut self) -> Result<()> {
        self.guard("start")?;
        self.started = true;
        self.trigger.fire();
        Ok(())
    }

    fn read_chunk(&mut self, _timeout: Duration) -> Result<Option<Array2<f64>>> {
        self.guard("read")?;
        if !self.started {
            return Err(DaqError::Hardware(HardwareError::new(
                &self.group.device,
                HardwareErrorKind::Fault,
                "read before start",
            )));
        }

        let remaining = match self.total_samples {
            Some(total) => {
                if self.produced >= total {
                    return Ok(None);
                }
                (total - self.produced).min(self.group.chunk_samples as u64) as usize
            }
            None => self.group.chunk_samples,
        };

        if self.pace {
            std::thread::sleep(Duration::from_secs_f64(
                remaining as f64 / self.group.sample_rate,
            ));
        }

        let width = self.group.width();
        let rate = self.group.sample_rate;
        let base = self.produced;
        let mut chunk = Array2::zeros((remaining, width));
        for (row, mut lane) in chunk.rows_mut().into_iter().enumerate() {
            let t = (base + row as u64) as f64 / rate;
            let carrier = (TAU * CARRIER_HZ * t).sin();
            for (ch, value) in lane.iter_mut().enumerate() {
                let noise: f64 = self.rng.gen_range(-NOISE_AMPLITUDE..NOISE_AMPLITUDE);
                *value = carrier * (1.0 + ch as f64 * 0.1) + noise;
            }
        }
        self.produced += remaining as u64;
        Ok(Some(chunk))
    }

    fn stop(&mut self) -> Result<()> {
        self.guard("stop")?;
        self.started = false;
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        // Releasing twice is the caller's bug surface, not ours: signal
        // it but keep it recoverable.
        self.guard("clear")?;
        self.torn_down = true;
        Ok(())
    }

    fn samples_acquired(&self) -> u64 {
        self.produced
    }

    fn is_done(&self) -> Result<bool> {
        self.guard("is_done")?;
        Ok(match self.total_samples {
            Some(total) => self.produced >= total,
            None => false,
        })
    }

    fn start_trigger(&self) -> Arc<TriggerEdge> {
        Arc::clone(&self.trigger)
    }
}
