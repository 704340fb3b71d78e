//! Triggered analog/digital-output tasks.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use daq_core::limits::TRIGGER_WAIT_TIMEOUT;
use daq_core::{DaqError, Result};
use daq_stimulus::ChunkSource;

use crate::group::{ChannelGroup, PortDirection};
use crate::stream::SampleSink;
use crate::trigger::TriggerEdge;
use crate::TaskState;

/// Interval at which the feed loop re-checks the stop flag while waiting
/// for the start trigger.
const TRIGGER_POLL: Duration = Duration::from_millis(50);

/// Triggered output task.
///
/// `arm()` configures the sink's start condition, disables regeneration,
/// pre-writes the sequencer's primed first chunk (so the hardware buffer
/// is never empty during the trigger-arming window), and spawns the feed
/// loop. The loop waits for the master start trigger (or runs free when
/// none is given), then keeps the buffer fed until the sequencer is
/// exhausted or the task is stopped. Exhaustion lets the hardware
/// underrun naturally; it is not a fault.
pub struct OutputTask {
    group: ChannelGroup,
    state: Arc<Mutex<TaskState>>,
    sink: Option<Box<dyn SampleSink>>,
    source: Arc<Mutex<Box<dyn ChunkSource>>>,
    stop_flag: Arc<AtomicBool>,
    exhausted: Arc<AtomicBool>,
    samples: Arc<AtomicU64>,
    loop_handle: Option<thread::JoinHandle<Box<dyn SampleSink>>>,
}

impl OutputTask {
    pub fn new(
        group: ChannelGroup,
        sink: Box<dyn SampleSink>,
        source: Box<dyn ChunkSource>,
    ) -> Result<Self> {
        if !group.direction.is_output() {
            return Err(DaqError::ChannelGroup(format!(
                "output task requires an output group, got {}",
                group.direction
            )));
        }
        Ok(Self {
            group,
            state: Arc::new(Mutex::new(TaskState::Idle)),
            sink: Some(sink),
            source: Arc::new(Mutex::new(source)),
            stop_flag: Arc::new(AtomicBool::new(false)),
            exhausted: Arc::new(AtomicBool::new(false)),
            samples: Arc::new(AtomicU64::new(0)),
            loop_handle: None,
        })
    }

    pub fn group(&self) -> &ChannelGroup {
        &self.group
    }

    pub fn state(&self) -> TaskState {
        *self.state.lock()
    }

    /// Whether the sequencer ran dry (normal end of a finite playlist).
    pub fn exhausted(&self) -> bool {
        self.exhausted.load(Ordering::Acquire)
    }

    /// Total samples queued to the hardware per channel.
    pub fn samples_written(&self) -> u64 {
        self.samples.load(Ordering::Acquire)
    }

    /// Arm against `trigger` (or free-run when `None`) and spawn the
    /// feed loop. Idle→Armed; the loop advances to Running once the
    /// trigger fires.
    pub fn arm(&mut self, trigger: Option<Arc<TriggerEdge>>) -> Result<()> {
        {
            let state = self.state.lock();
            if *state != TaskState::Idle {
                return Err(DaqError::ServiceState(format!(
                    "output task on '{}' cannot arm from {}",
                    self.group.device, state
                )));
            }
        }
        let mut sink = self
            .sink
            .take()
            .ok_or_else(|| DaqError::ServiceState("output task already consumed".into()))?;

        sink.arm(trigger.clone())?;

        // Pre-fill during the arming window. The sequencer guarantees a
        // real first chunk even for a shuffled order.
        if let Some(first) = self.source.lock().next_chunk() {
            sink.write_chunk(&first)?;
            self.samples
                .fetch_add(first.samples() as u64, Ordering::AcqRel);
        }

        *self.state.lock() = TaskState::Armed;
        info!(device = %self.group.device, channels = self.group.width(), "output task armed");

        let state = Arc::clone(&self.state);
        let source = Arc::clone(&self.source);
        let stop_flag = Arc::clone(&self.stop_flag);
        let exhausted = Arc::clone(&self.exhausted);
        let samples = Arc::clone(&self.samples);
        let device = self.group.device.clone();
        let lane = self.group.direction.lane_prefix().to_string();

        let handle = thread::Builder::new()
            .name(format!("{}-{}", lane, device))
            .spawn(move || {
                feed_loop(sink, source, trigger, state, stop_flag, exhausted, samples, device)
            })?;
        self.loop_handle = Some(handle);
        Ok(())
    }

    /// Close the playlist sequencer without touching the hardware;
    /// step one of the service stop sequence. Any chunk already queued
    /// finishes playing.
    pub fn close_source(&self) {
        self.source.lock().close();
    }

    /// Stop generation and release the hardware. Driver refusals to stop
    /// a regenerating task are recoverable: logged, never propagated, and
    /// the clear step runs regardless. Idempotent.
    pub fn stop(&mut self) -> Result<()> {
        if *self.state.lock() == TaskState::Stopped {
            return Ok(());
        }
        self.stop_flag.store(true, Ordering::Release);

        let sink = match self.loop_handle.take() {
            Some(handle) => match handle.join() {
                Ok(sink) => Some(sink),
                Err(_) => {
                    warn!(device = %self.group.device, "output feed loop panicked");
                    None
                }
            },
            None => self.sink.take(),
        };

        if let Some(mut sink) = sink {
            for (step, result) in [("stop", sink.stop()), ("clear", sink.clear())] {
                if let Err(err) = result {
                    if err.is_recoverable() {
                        warn!(device = %self.group.device, step, %err, "recoverable fault during output teardown");
                    } else {
                        error!(device = %self.group.device, step, %err, "fault during output teardown");
                    }
                }
            }
        }

        *self.state.lock() = TaskState::Stopped;
        debug!(device = %self.group.device, "output task stopped");
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
fn feed_loop(
    mut sink: Box<dyn SampleSink>,
    source: Arc<Mutex<Box<dyn ChunkSource>>>,
    trigger: Option<Arc<TriggerEdge>>,
    state: Arc<Mutex<TaskState>>,
    stop_flag: Arc<AtomicBool>,
    exhausted: Arc<AtomicBool>,
    samples: Arc<AtomicU64>,
    device: String,
) -> Box<dyn SampleSink> {
    // Hold in Armed until the master clock starts. Poll so a stop during
    // the arming window is honored promptly.
    if let Some(edge) = &trigger {
        let mut waited = Duration::ZERO;
        loop {
            if stop_flag.load(Ordering::Acquire) {
                return sink;
            }
            if edge.wait_timeout(TRIGGER_POLL) {
                break;
            }
            waited += TRIGGER_POLL;
            if waited >= TRIGGER_WAIT_TIMEOUT {
                error!(device = %device, "start trigger never fired");
                return sink;
            }
        }
    }
    *state.lock() = TaskState::Running;
    debug!(device = %device, "output task running");

    while !stop_flag.load(Ordering::Acquire) {
        let chunk = source.lock().next_chunk();
        match chunk {
            Some(waveform) => match sink.write_chunk(&waveform) {
                Ok(()) => {
                    samples.fetch_add(waveform.samples() as u64, Ordering::AcqRel);
                }
                Err(err) => {
                    if !stop_flag.load(Ordering::Acquire) {
                        error!(device = %device, %err, "output buffer write failed");
                    }
                    break;
                }
            },
            None => {
                // No more data: let the hardware underrun naturally.
                exhausted.store(true, Ordering::Release);
                debug!(device = %device, "playlist exhausted");
                break;
            }
        }
    }
    sink
}
