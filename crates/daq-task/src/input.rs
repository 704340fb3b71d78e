//! The clock-owning analog-input task.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use daq_comm::{ChunkSender, CommWorker, DrainPolicy, TimedChunk};
use daq_core::limits::BUFFER_WAIT_TIMEOUT;
use daq_core::{DaqError, Result};
use daq_stimulus::Waveform;

use crate::group::{ChannelGroup, PortDirection};
use crate::stream::SampleSource;
use crate::trigger::TriggerEdge;
use crate::TaskState;

/// Triggered analog-input task.
///
/// Owns the master sample clock of its service. The buffer loop stamps
/// every filled hardware buffer with the wall clock at loop entry and
/// fans the `(chunk, timestamp)` pair out to every registered worker in
/// registration order; each worker's channel contract decides whether
/// the frame is ever observed.
pub struct InputTask {
    group: ChannelGroup,
    state: Arc<Mutex<TaskState>>,
    source: Option<Box<dyn SampleSource>>,
    workers: Vec<CommWorker>,
    trigger: Arc<TriggerEdge>,
    stop_flag: Arc<AtomicBool>,
    done: Arc<AtomicBool>,
    samples: Arc<AtomicU64>,
    loop_handle: Option<thread::JoinHandle<Box<dyn SampleSource>>>,
}

impl InputTask {
    pub fn new(group: ChannelGroup, source: Box<dyn SampleSource>) -> Result<Self> {
        if group.direction != PortDirection::AnalogInput {
            return Err(DaqError::ChannelGroup(format!(
                "input task requires an analog-input group, got {}",
                group.direction
            )));
        }
        let trigger = source.start_trigger();
        Ok(Self {
            group,
            state: Arc::new(Mutex::new(TaskState::Idle)),
            source: Some(source),
            workers: Vec::new(),
            trigger,
            stop_flag: Arc::new(AtomicBool::new(false)),
            done: Arc::new(AtomicBool::new(false)),
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

    /// The start-of-acquisition edge output tasks arm against.
    pub fn start_trigger(&self) -> Arc<TriggerEdge> {
        Arc::clone(&self.trigger)
    }

    /// Register a consumer. Order of registration is delivery order.
    pub fn register_worker(&mut self, worker: CommWorker) {
        self.workers.push(worker);
    }

    pub fn workers(&self) -> &[CommWorker] {
        &self.workers
    }

    /// Start every registered worker, then the hardware clock, then the
    /// buffer loop.
    pub fn start(&mut self) -> Result<()> {
        {
            let state = self.state.lock();
            if *state != TaskState::Idle {
                return Err(DaqError::ServiceState(format!(
                    "input task on '{}' cannot start from {}",
                    self.group.device, state
                )));
            }
        }
        let mut source = self
            .source
            .take()
            .ok_or_else(|| DaqError::ServiceState("input task already consumed".into()))?;

        for worker in &mut self.workers {
            worker.start()?;
        }

        source.start()?;
        *self.state.lock() = TaskState::Running;
        info!(device = %self.group.device, channels = self.group.width(), "input task started");

        let senders: Vec<(String, ChunkSender)> = self
            .workers
            .iter()
            .map(|w| (w.name().to_string(), w.sender()))
            .collect();
        let stop_flag = Arc::clone(&self.stop_flag);
        let done = Arc::clone(&self.done);
        let samples = Arc::clone(&self.samples);
        let device = self.group.device.clone();

        let handle = thread::Builder::new()
            .name(format!("ai-{}", device))
            .spawn(move || buffer_loop(source, senders, stop_flag, done, samples, device))?;
        self.loop_handle = Some(handle);
        Ok(())
    }

    /// Whether the acquisition is still producing. Degrades to `false`
    /// once the task is stopped or the hardware handle is gone.
    pub fn is_busy(&self) -> bool {
        *self.state.lock() == TaskState::Running && !self.done.load(Ordering::Acquire)
    }

    /// Total samples acquired per channel.
    pub fn samples_acquired(&self) -> u64 {
        self.samples.load(Ordering::Acquire)
    }

    /// Stop the clock and release the hardware. Recoverable driver
    /// faults are logged and skipped so the remaining teardown always
    /// runs. Idempotent.
    pub fn stop(&mut self) -> Result<()> {
        if *self.state.lock() == TaskState::Stopped {
            return Ok(());
        }
        self.stop_flag.store(true, Ordering::Release);

        let source = match self.loop_handle.take() {
            Some(handle) => match handle.join() {
                Ok(source) => Some(source),
                Err(_) => {
                    warn!(device = %self.group.device, "input buffer loop panicked");
                    None
                }
            },
            None => self.source.take(),
        };

        if let Some(mut source) = source {
            for (step, result) in [
                ("stop", source.stop()),
                ("clear", source.clear()),
            ] {
                if let Err(err) = result {
                    if err.is_recoverable() {
                        warn!(device = %self.group.device, step, %err, "recoverable fault during input teardown");
                    } else {
                        error!(device = %self.group.device, step, %err, "fault during input teardown");
                    }
                }
            }
        }

        self.done.store(true, Ordering::Release);
        *self.state.lock() = TaskState::Stopped;
        debug!(device = %self.group.device, "input task stopped");
        Ok(())
    }

    /// Drain every registered worker's backlog.
    pub fn finish_workers(&self, policy: &DrainPolicy) {
        for worker in &self.workers {
            worker.finish(policy);
        }
    }

    /// Close every registered worker (stop sentinel, grace, release).
    pub fn close_workers(&mut self) {
        for worker in &mut self.workers {
            worker.close();
        }
    }
}

fn buffer_loop(
    mut source: Box<dyn SampleSource>,
    senders: Vec<(String, ChunkSender)>,
    stop_flag: Arc<AtomicBool>,
    done: Arc<AtomicBool>,
    samples: Arc<AtomicU64>,
    device: String,
) -> Box<dyn SampleSource> {
    let mut seq: u64 = 0;
    while !stop_flag.load(Ordering::Acquire) {
        match source.read_chunk(BUFFER_WAIT_TIMEOUT) {
            Ok(Some(data)) => {
                // Stamped at callback entry: the moment the buffer became
                // ready, not when a consumer gets around to it.
                let timestamp = Utc::now();
                let rows = data.nrows() as u64;
                let waveform = match Waveform::new(data) {
                    Ok(wf) => Arc::new(wf),
                    Err(err) => {
                        error!(device = %device, %err, "driver returned an empty buffer");
                        break;
                    }
                };
                let chunk = TimedChunk::new(waveform, timestamp, seq);
                seq += 1;
                samples.fetch_add(rows, Ordering::AcqRel);

                for (name, sender) in &senders {
                    if let Err(err) = sender.send(chunk.clone()) {
                        debug!(worker = %name, %err, "worker channel rejected chunk");
                    }
                }
            }
            Ok(None) => {
                debug!(device = %device, "acquisition complete");
                break;
            }
            Err(err) => {
                if !stop_flag.load(Ordering::Acquire) {
                    error!(device = %device, %err, "input buffer wait failed");
                }
                break;
            }
        }
    }
    done.store(true, Ordering::Release);
    source
}
