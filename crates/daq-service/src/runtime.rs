//! The acquisition service runtime and its lifecycle state machine.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use daq_comm::{ChunkReceiver, CommWorker, DrainPolicy, Received};
use daq_core::{DaqError, Result};
use daq_driver_mock::MockProvider;
use daq_protocol::{ProgressReport, SetupParams, SinkSpec};
use daq_stimulus::{ChunkSource, PlaylistSequencer, Waveform};
use daq_task::{
    ChannelGroup, InputTask, OutputTask, PortDirection, ProviderRegistry, SampleSink, SampleSource,
};

/// Service lifecycle. Monotonic: transitions only move forward, and
/// `Finishing → Stopped` is the only path to process termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Initializing,
    Initialized,
    Running,
    Finishing,
    Stopped,
}

impl ServiceState {
    fn rank(&self) -> u8 {
        match self {
            ServiceState::Initializing => 0,
            ServiceState::Initialized => 1,
            ServiceState::Running => 2,
            ServiceState::Finishing => 3,
            ServiceState::Stopped => 4,
        }
    }
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceState::Initializing => write!(f, "initializing"),
            ServiceState::Initialized => write!(f, "initialized"),
            ServiceState::Running => write!(f, "running"),
            ServiceState::Finishing => write!(f, "finishing"),
            ServiceState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Fully constructed parts of one run, ready for `setup`.
///
/// Built either programmatically (tests, embedded use) or from
/// declarative [`SetupParams`] via [`build_setup`].
pub struct ServiceSetup {
    pub input: Option<(ChannelGroup, Box<dyn SampleSource>)>,
    pub outputs: Vec<(ChannelGroup, Box<dyn SampleSink>, Box<dyn ChunkSource>)>,
    /// Consumers registered on the input task, in delivery order.
    pub workers: Vec<CommWorker>,
    /// Fixed run duration; `None` for until-exhaustion / until-finish.
    pub total: Option<Duration>,
}

struct TaskSet {
    input: Option<InputTask>,
    outputs: Vec<OutputTask>,
}

/// The stateful service object behind the control surface.
///
/// All methods take `&self`: the control server shares one `Arc` across
/// client handlers and the deadline task, and internal locking plus the
/// monotonic state machine guarantee that a duration-deadline `finish`
/// racing an operator `finish` results in exactly one teardown.
pub struct AcquisitionService {
    name: String,
    state: Mutex<ServiceState>,
    tasks: Mutex<TaskSet>,
    total: Mutex<Option<Duration>>,
    started_at: Mutex<Option<Instant>>,
    last_progress_samples: AtomicU64,
    drain: DrainPolicy,
    run_id: Mutex<Option<Uuid>>,
    cancel_tx: watch::Sender<bool>,
}

impl AcquisitionService {
    pub fn new(name: impl Into<String>, drain: DrainPolicy) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self {
            name: name.into(),
            state: Mutex::new(ServiceState::Initializing),
            tasks: Mutex::new(TaskSet {
                input: None,
                outputs: Vec::new(),
            }),
            total: Mutex::new(None),
            started_at: Mutex::new(None),
            last_progress_samples: AtomicU64::new(0),
            drain,
            run_id: Mutex::new(None),
            cancel_tx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ServiceState {
        *self.state.lock()
    }

    /// Configured fixed duration, if any.
    pub fn total(&self) -> Option<Duration> {
        *self.total.lock()
    }

    /// Observers of the cancellation watch; flips to `true` when a
    /// teardown begins, which retires the deadline task.
    pub fn subscribe_cancel(&self) -> watch::Receiver<bool> {
        self.cancel_tx.subscribe()
    }

    fn advance(&self, to: ServiceState) -> Result<()> {
        let mut state = self.state.lock();
        if to.rank() < state.rank() {
            return Err(DaqError::ServiceState(format!(
                "cannot move from {} back to {}",
                state, to
            )));
        }
        *state = to;
        Ok(())
    }

    /// Construct tasks and workers from a prepared setup.
    /// `Initializing → Initialized`. Any failure leaves the service in
    /// `Initializing` with no tasks: a partially initialized service is
    /// not startable.
    pub fn setup(&self, setup: ServiceSetup) -> Result<()> {
        if self.state() != ServiceState::Initializing {
            return Err(DaqError::ServiceState(format!(
                "setup requires initializing, service is {}",
                self.state()
            )));
        }
        if setup.input.is_none() && !setup.workers.is_empty() {
            return Err(DaqError::Configuration(
                "workers require an input task to register on".into(),
            ));
        }

        let mut input = match setup.input {
            Some((group, source)) => Some(InputTask::new(group, source)?),
            None => None,
        };
        if let Some(task) = input.as_mut() {
            for worker in setup.workers {
                task.register_worker(worker);
            }
        }

        let mut outputs = Vec::with_capacity(setup.outputs.len());
        for (group, sink, source) in setup.outputs {
            outputs.push(OutputTask::new(group, sink, source)?);
        }

        {
            let mut tasks = self.tasks.lock();
            tasks.input = input;
            tasks.outputs = outputs;
        }
        *self.total.lock() = setup.total;
        self.advance(ServiceState::Initialized)?;
        info!(service = %self.name, "service initialized");
        Ok(())
    }

    /// Arm output tasks against the input task's start trigger, then
    /// start workers and the clock-owning input last.
    /// `Initialized → Running`.
    pub fn start(&self) -> Result<()> {
        if self.state() != ServiceState::Initialized {
            return Err(DaqError::ServiceState(format!(
                "start requires initialized, service is {}",
                self.state()
            )));
        }
        let mut tasks = self.tasks.lock();
        let trigger = tasks.input.as_ref().map(|t| t.start_trigger());

        for output in &mut tasks.outputs {
            output.arm(trigger.clone())?;
        }
        if let Some(input) = tasks.input.as_mut() {
            input.start()?;
        }

        let run_id = Uuid::new_v4();
        *self.run_id.lock() = Some(run_id);
        *self.started_at.lock() = Some(Instant::now());
        self.last_progress_samples.store(0, Ordering::Release);
        self.advance(ServiceState::Running)?;
        info!(service = %self.name, %run_id, "service running");
        Ok(())
    }

    /// Run the stop sequence across all owned tasks.
    ///
    /// Order matters and every step runs even if an earlier one faulted:
    /// (1) close every output's sequencer (no more data, armed writes
    /// finish); (2) stop the outputs; (3) stop and clear the clock-owning
    /// input last; (4) drain and close every worker exactly once.
    ///
    /// Idempotent and safe to call concurrently; returns whether the
    /// hosting process should exit (`stop_service`).
    pub fn finish(&self, stop_service: bool) -> Result<bool> {
        {
            let mut state = self.state.lock();
            match *state {
                ServiceState::Finishing | ServiceState::Stopped => {
                    // Another teardown already ran or is running.
                    return Ok(stop_service);
                }
                _ => *state = ServiceState::Finishing,
            }
        }
        // Retire the deadline task.
        let _ = self.cancel_tx.send(true);
        info!(service = %self.name, "finishing");

        let mut tasks = self.tasks.lock();

        for output in &tasks.outputs {
            output.close_source();
        }
        for output in &mut tasks.outputs {
            if let Err(err) = output.stop() {
                warn!(service = %self.name, %err, "output stop fault, continuing teardown");
            }
        }
        if let Some(input) = tasks.input.as_mut() {
            if let Err(err) = input.stop() {
                warn!(service = %self.name, %err, "input stop fault, continuing teardown");
            }
            input.finish_workers(&self.drain);
            input.close_workers();
        }
        drop(tasks);

        self.advance(ServiceState::Stopped)?;
        info!(service = %self.name, "service stopped");
        Ok(stop_service)
    }

    /// Whether the clock-owning task is still acquiring. Degrades to
    /// `false` when there is no input task, the run ended, or the
    /// hardware handle is already gone.
    pub fn is_busy(&self) -> bool {
        if self.state() != ServiceState::Running {
            return false;
        }
        self.tasks
            .lock()
            .input
            .as_ref()
            .map(|t| t.is_busy())
            .unwrap_or(false)
    }

    /// Elapsed/total time plus the sample delta since the previous call.
    pub fn progress(&self) -> ProgressReport {
        let elapsed = self
            .started_at
            .lock()
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        let samples = self
            .tasks
            .lock()
            .input
            .as_ref()
            .map(|t| t.samples_acquired())
            .unwrap_or(0);
        let previous = self.last_progress_samples.swap(samples, Ordering::AcqRel);
        ProgressReport {
            elapsed_secs: elapsed,
            total_secs: self.total().map(|d| d.as_secs_f64()),
            delta_samples: samples.saturating_sub(previous),
        }
    }

    /// Drop the finished run's tasks and return to `Initializing` for
    /// reuse. Refused (`false`) while a run is live.
    pub fn cleanup(&self) -> bool {
        {
            let state = self.state.lock();
            if matches!(*state, ServiceState::Running | ServiceState::Finishing) {
                return false;
            }
        }
        {
            let mut tasks = self.tasks.lock();
            tasks.input = None;
            tasks.outputs.clear();
        }
        *self.total.lock() = None;
        *self.started_at.lock() = None;
        *self.run_id.lock() = None;
        self.last_progress_samples.store(0, Ordering::Release);
        let _ = self.cancel_tx.send(false);
        *self.state.lock() = ServiceState::Initializing;
        info!(service = %self.name, "service cleaned up");
        true
    }
}

// =============================================================================
// Declarative Setup
// =============================================================================

/// Worker body that drains its channel and drops every frame. Stands in
/// for display/analysis consumers whose real endpoint lives elsewhere.
fn discard_body(rx: ChunkReceiver) {
    loop {
        if matches!(rx.recv_timeout(Duration::from_millis(100)), Received::Stop) {
            return;
        }
    }
}

/// Resolve [`SetupParams`] into a concrete [`ServiceSetup`] using the
/// provider registry.
///
/// The fixed duration is the declared one or, for finite playlists,
/// the longest output pass; a finite run also bounds the input
/// acquisition to the matching sample count so the whole engine winds
/// down together.
pub fn build_setup(params: &SetupParams, providers: &ProviderRegistry) -> Result<ServiceSetup> {
    let provider = providers.get(&params.provider).ok_or_else(|| {
        DaqError::Configuration(format!("unknown hardware provider '{}'", params.provider))
    })?;

    let mut outputs: Vec<(ChannelGroup, Box<dyn SampleSink>, Box<dyn ChunkSource>)> = Vec::new();
    let mut playlist_total: Option<Duration> = None;

    for out in &params.outputs {
        if !out.direction.is_output() {
            return Err(DaqError::Configuration(format!(
                "output task on '{}' declared with input direction",
                out.device
            )));
        }
        let group = ChannelGroup::new(
            out.device.clone(),
            out.channels.clone(),
            out.direction,
            out.sample_rate,
            out.chunk_samples,
        )?;

        let waveforms: Vec<Waveform> = out
            .playlist
            .waveforms
            .iter()
            .map(|rows| Waveform::from_rows(rows.clone()))
            .collect::<Result<_>>()?;
        let sequencer = PlaylistSequencer::new(
            waveforms,
            out.playlist.order,
            out.playlist.cycle,
            params.seed,
        )?;
        if let Some(duration) = sequencer.total_duration(out.sample_rate) {
            playlist_total = Some(playlist_total.map_or(duration, |t| t.max(duration)));
        }

        let sink = provider.output(&group)?;
        outputs.push((group, sink, Box::new(sequencer)));
    }

    let total = params
        .duration_secs
        .map(Duration::from_secs_f64)
        .or(playlist_total);

    let input = match &params.input {
        Some(inp) => {
            let group = ChannelGroup::new(
                inp.device.clone(),
                inp.channels.clone(),
                PortDirection::AnalogInput,
                inp.sample_rate,
                inp.chunk_samples,
            )?;
            let total_samples =
                total.map(|d| (d.as_secs_f64() * inp.sample_rate).round() as u64);
            let source = provider.input(&group, total_samples)?;
            Some((group, source))
        }
        None => None,
    };

    let input_channels: Vec<String> = params
        .input
        .as_ref()
        .map(|inp| inp.channels.clone())
        .unwrap_or_default();

    let mut workers = Vec::with_capacity(params.workers.len());
    for spec in &params.workers {
        let worker = match &spec.sink {
            SinkSpec::Save { directory, base } => {
                if !directory.is_dir() {
                    std::fs::create_dir_all(directory)?;
                }
                CommWorker::new(
                    spec.name.clone(),
                    spec.channel,
                    daq_storage::save_worker(
                        directory.clone(),
                        base.clone(),
                        input_channels.clone(),
                    ),
                )
            }
            SinkSpec::Discard => CommWorker::new(spec.name.clone(), spec.channel, discard_body),
        };
        workers.push(worker);
    }

    Ok(ServiceSetup {
        input,
        outputs,
        workers,
        total,
    })
}

/// Provider registry with the backends compiled into this binary.
pub fn default_providers(mock_pacing: bool) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    registry.register(MockProvider::new(mock_pacing));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_machine_is_monotonic() {
        let service = AcquisitionService::new("t", DrainPolicy::default());
        assert_eq!(service.state(), ServiceState::Initializing);

        // Start before setup is refused.
        assert!(service.start().is_err());

        // Empty setup (no tasks) is legal and advances the state.
        service
            .setup(ServiceSetup {
                input: None,
                outputs: Vec::new(),
                workers: Vec::new(),
                total: None,
            })
            .unwrap();
        assert_eq!(service.state(), ServiceState::Initialized);

        // Second setup is refused: no backward transition.
        assert!(service
            .setup(ServiceSetup {
                input: None,
                outputs: Vec::new(),
                workers: Vec::new(),
                total: None,
            })
            .is_err());

        service.start().unwrap();
        assert_eq!(service.state(), ServiceState::Running);

        assert!(!service.finish(false).unwrap());
        assert_eq!(service.state(), ServiceState::Stopped);

        // Idempotent finish.
        assert!(service.finish(true).unwrap());
        assert_eq!(service.state(), ServiceState::Stopped);
    }

    #[test]
    fn cleanup_resets_a_stopped_service() {
        let service = AcquisitionService::new("t", DrainPolicy::default());
        service
            .setup(ServiceSetup {
                input: None,
                outputs: Vec::new(),
                workers: Vec::new(),
                total: None,
            })
            .unwrap();
        service.start().unwrap();
        assert!(!service.cleanup()); // refused while running
        service.finish(false).unwrap();
        assert!(service.cleanup());
        assert_eq!(service.state(), ServiceState::Initializing);
    }

    #[test]
    fn workers_without_input_are_rejected() {
        let service = AcquisitionService::new("t", DrainPolicy::default());
        let worker = CommWorker::new("orphan", daq_comm::CommKind::Queue, |_rx| {});
        let err = service
            .setup(ServiceSetup {
                input: None,
                outputs: Vec::new(),
                workers: vec![worker],
                total: None,
            })
            .unwrap_err();
        assert!(err.to_string().contains("input task"));
        // The failed setup left the service startable-from-scratch.
        assert_eq!(service.state(), ServiceState::Initializing);
    }
}
