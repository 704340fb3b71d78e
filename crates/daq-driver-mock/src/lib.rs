//! `daq-driver-mock`
//!
//! Software-only hardware backend. The mock source generates a sine
//! carrier with additive noise at the configured rate; the mock sink
//! records everything written to it. Both honor the trigger and
//! teardown contracts of the real drivers, which makes them the backend
//! of choice for integration tests and dry runs on machines without
//! rack hardware.

pub mod mock_camera;
pub mod mock_sink;
pub mod mock_source;

use std::sync::Arc;

use daq_core::Result;
use daq_task::{ChannelGroup, HardwareProvider, SampleSink, SampleSource};

pub use mock_camera::{register_mock_camera, MockCamera};
pub use mock_sink::{MockSampleSink, WrittenLog};
pub use mock_source::MockSampleSource;

/// Provider exposing the mock backend under the name `"mock"`.
pub struct MockProvider {
    /// Pace generation at the nominal sample rate. Tests run unpaced;
    /// dry runs pace to behave like a live rack.
    pub pace: bool,
}

impl MockProvider {
    pub fn new(pace: bool) -> Arc<Self> {
        Arc::new(Self { pace })
    }
}

impl HardwareProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn input(
        &self,
        group: &ChannelGroup,
        total_samples: Option<u64>,
    ) -> Result<Box<dyn SampleSource>> {
        Ok(Box::new(MockSampleSource::new(
            group.clone(),
            total_samples,
            self.pace,
        )?))
    }

    fn output(&self, group: &ChannelGroup) -> Result<Box<dyn SampleSink>> {
        Ok(Box::new(MockSampleSink::new(group.clone())))
    }
}
