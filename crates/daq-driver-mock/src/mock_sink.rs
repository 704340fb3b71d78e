//! Recording analog/digital-output sink.

use std::sync::Arc;

use parking_lot::Mutex;

use daq_core::{DaqError, HardwareError, HardwareErrorKind, Result};
use daq_stimulus::Waveform;
use daq_task::{ChannelGroup, SampleSink, TriggerEdge};

/// Shared record of everything written to a mock sink, for assertions.
pub type WrittenLog = Arc<Mutex<Vec<Waveform>>>;

/// Mock output sink.
///
/// Accepts writes once armed and records them. Regeneration is treated
/// as disabled: the sink never re-plays a chunk, and when configured
/// with [`MockSampleSink::fail_first_stop`] the first `stop()` reports
/// the classic "cannot stop a continuously-regenerating task" fault
/// (recoverable), for exercising teardown paths.
pub struct MockSampleSink {
    group: ChannelGroup,
    written: WrittenLog,
    samples: u64,
    armed: bool,
    start_trigger: Option<Arc<TriggerEdge>>,
    fail_first_stop: bool,
    stop_attempts: u32,
}

impl MockSampleSink {
    pub fn new(group: ChannelGroup) -> Self {
        Self {
            group,
            written: Arc::new(Mutex::new(Vec::new())),
            samples: 0,
            armed: false,
            start_trigger: None,
            fail_first_stop: false,
            stop_attempts: 0,
        }
    }

    /// Make the first `stop()` fail with a recoverable regeneration
    /// fault.
    pub fn fail_first_stop(mut self) -> Self {
        self.fail_first_stop = true;
        self
    }

    /// Handle to the chunks written so far.
    pub fn written_log(&self) -> WrittenLog {
        Arc::clone(&self.written)
    }
}

impl SampleSink for MockSampleSink {
    fn arm(&mut self, start_trigger: Option<Arc<TriggerEdge>>) -> Result<()> {
        self.start_trigger = start_trigger;
        self.armed = true;
        Ok(())
    }

    fn write_chunk(&mut self, chunk: &Waveform) -> Result<()> {
        if !self.armed {
            return Err(DaqError::Hardware(HardwareError::new(
                &self.group.device,
                HardwareErrorKind::Configuration,
                "write before arm",
            )));
        }
        if chunk.channels() != self.group.width() {
            return Err(DaqError::Hardware(HardwareError::new(
                &self.group.device,
                HardwareErrorKind::Configuration,
                format!(
                    "chunk has {} channels, group has {}",
                    chunk.channels(),
                    self.group.width()
                ),
            )));
        }
        self.samples += chunk.samples() as u64;
        self.written.lock().push(chunk.clone());
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.stop_attempts += 1;
        if self.fail_first_stop && self.stop_attempts == 1 {
            return Err(DaqError::Hardware(HardwareError::new(
                &self.group.device,
                HardwareErrorKind::Regeneration,
                "cannot stop a continuously-regenerating output task",
            )));
        }
        self.armed = false;
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.armed = false;
        Ok(())
    }

    fn samples_written(&self) -> u64 {
        self.samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daq_task::PortDirection;
    use ndarray::Array2;

    fn group() -> ChannelGroup {
        ChannelGroup::new(
            "mockdev",
            vec!["ao0".into()],
            PortDirection::AnalogOutput,
            1000.0,
            Some(16),
        )
        .unwrap()
    }

    fn wf(samples: usize) -> Waveform {
        Waveform::new(Array2::zeros((samples, 1))).unwrap()
    }

    #[test]
    fn records_written_chunks_once_armed() {
        let mut sink = MockSampleSink::new(group());
        let log = sink.written_log();

        assert!(sink.write_chunk(&wf(8)).is_err());
        sink.arm(None).unwrap();
        sink.write_chunk(&wf(8)).unwrap();
        sink.write_chunk(&wf(4)).unwrap();

        assert_eq!(sink.samples_written(), 12);
        assert_eq!(log.lock().len(), 2);
    }

    #[test]
    fn first_stop_fault_is_recoverable_and_transient() {
        let mut sink = MockSampleSink::new(group()).fail_first_stop();
        sink.arm(None).unwrap();

        let err = sink.stop().unwrap_err();
        assert!(err.is_recoverable());
        sink.stop().unwrap();
    }

    #[test]
    fn rejects_channel_width_mismatch() {
        let mut sink = MockSampleSink::new(group());
        sink.arm(None).unwrap();
        let wide = Waveform::new(Array2::zeros((8, 3))).unwrap();
        assert!(sink.write_chunk(&wide).is_err());
    }
}
