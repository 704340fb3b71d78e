//! Narrow capability seam to the vendor DAQ drivers.
//!
//! Vendor SDKs are external collaborators; the engine only ever sees a
//! [`SampleSource`] (analog input) or [`SampleSink`] (analog/digital
//! output) built by a [`HardwareProvider`] looked up by backend name.
//! The buffer-ready callback of the underlying driver is rendered as a
//! blocking `read_chunk`/`write_chunk` call on the task's own thread:
//! one call, one hardware buffer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ndarray::Array2;

use daq_core::Result;
use daq_stimulus::Waveform;

use crate::group::ChannelGroup;
use crate::trigger::TriggerEdge;

/// Buffered analog-input stream.
pub trait SampleSource: Send {
    /// Start the hardware clock. The driver fires the start trigger at
    /// the start-of-acquisition edge.
    fn start(&mut self) -> Result<()>;

    /// Block until the next hardware buffer fills and return it as
    /// samples × channels. `Ok(None)` marks the end of a finite
    /// acquisition; a timeout is a hardware fault.
    fn read_chunk(&mut self, timeout: Duration) -> Result<Option<Array2<f64>>>;

    /// Stop the clock.
    fn stop(&mut self) -> Result<()>;

    /// Release the channel group.
    fn clear(&mut self) -> Result<()>;

    /// Total samples acquired per channel since start.
    fn samples_acquired(&self) -> u64;

    /// Whether the acquisition has finished. May fail once the handle is
    /// torn down; callers treat that as done.
    fn is_done(&self) -> Result<bool>;

    /// The start-of-acquisition edge output tasks arm against.
    fn start_trigger(&self) -> Arc<TriggerEdge>;
}

/// Buffered analog/digital-output stream.
pub trait SampleSink: Send {
    /// Configure the start condition and disable regeneration of stale
    /// samples. With a trigger the hardware holds until the edge fires;
    /// without one it free-runs from its own clock.
    fn arm(&mut self, start_trigger: Option<Arc<TriggerEdge>>) -> Result<()>;

    /// Block until the output buffer has room, then queue the chunk.
    fn write_chunk(&mut self, chunk: &Waveform) -> Result<()>;

    /// Stop generation. Drivers may refuse while regenerating; that
    /// fault is recoverable and must not abort the caller's teardown.
    fn stop(&mut self) -> Result<()>;

    /// Release the channel group.
    fn clear(&mut self) -> Result<()>;

    /// Total samples queued per channel since arming.
    fn samples_written(&self) -> u64;
}

/// Builds sources and sinks for one hardware backend.
pub trait HardwareProvider: Send + Sync {
    /// Backend name services select in their configuration.
    fn name(&self) -> &str;

    /// Build an input stream. `total_samples` bounds a finite
    /// acquisition (per channel); `None` runs until stopped.
    fn input(
        &self,
        group: &ChannelGroup,
        total_samples: Option<u64>,
    ) -> Result<Box<dyn SampleSource>>;

    fn output(&self, group: &ChannelGroup) -> Result<Box<dyn SampleSink>>;
}

/// Runtime registry of hardware backends, keyed by provider name.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn HardwareProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn HardwareProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn HardwareProvider>> {
        self.providers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
