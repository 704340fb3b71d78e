//! Consumer worker lifecycle.

use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use daq_core::limits::{
    DRAIN_MAX_WAIT, DRAIN_POLL_INTERVAL, DRAIN_STALL_POLLS, WORKER_CLOSE_GRACE,
};
use daq_core::{DaqError, Result};

use crate::channel::{channel, ChunkReceiver, ChunkSender, CommKind, TimedChunk};

/// Bounds on how long a drain may take.
///
/// Draining declares a worker done when its channel depth reaches zero or
/// stops decreasing for [`DrainPolicy::stall_polls`] consecutive polls,
/// capped at [`DrainPolicy::max_wait`], so shutdown stays bounded even
/// if the worker wedges.
#[derive(Debug, Clone, Copy)]
pub struct DrainPolicy {
    pub poll_interval: Duration,
    pub stall_polls: u32,
    pub max_wait: Duration,
}

impl Default for DrainPolicy {
    fn default() -> Self {
        Self {
            poll_interval: DRAIN_POLL_INTERVAL,
            stall_polls: DRAIN_STALL_POLLS,
            max_wait: DRAIN_MAX_WAIT,
        }
    }
}

type WorkerBody = Box<dyn FnOnce(ChunkReceiver) + Send + 'static>;

/// A consumer running on its own named OS thread, reachable only through
/// one comm channel.
///
/// Construction wires the channel; [`CommWorker::start`] hands the
/// receive endpoint to the body on a fresh thread. Producers push through
/// [`CommWorker::send`]; whether a given frame is ever observed is the
/// channel variant's contract, not the producer's concern.
pub struct CommWorker {
    name: String,
    kind: CommKind,
    sender: ChunkSender,
    receiver: Option<ChunkReceiver>,
    body: Option<WorkerBody>,
    handle: Option<thread::JoinHandle<()>>,
    closed: bool,
}

impl CommWorker {
    /// Wrap `body` as a worker fed through a channel of `kind`.
    pub fn new(
        name: impl Into<String>,
        kind: CommKind,
        body: impl FnOnce(ChunkReceiver) + Send + 'static,
    ) -> Self {
        let (sender, receiver) = channel(kind);
        Self {
            name: name.into(),
            kind,
            sender,
            receiver: Some(receiver),
            body: Some(Box::new(body)),
            handle: None,
            closed: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> CommKind {
        self.kind
    }

    /// Clone of the producer endpoint, for handing to the callback path.
    pub fn sender(&self) -> ChunkSender {
        self.sender.clone()
    }

    /// Push one chunk to the worker under the channel's contract.
    pub fn send(&self, chunk: TimedChunk) -> Result<()> {
        self.sender.send(chunk)
    }

    /// Launch the worker thread.
    pub fn start(&mut self) -> Result<()> {
        if self.handle.is_some() {
            return Err(DaqError::ServiceState(format!(
                "worker '{}' already started",
                self.name
            )));
        }
        let body = self.body.take().ok_or_else(|| {
            DaqError::ServiceState(format!("worker '{}' already consumed", self.name))
        })?;
        let receiver = self.receiver.take().ok_or_else(|| {
            DaqError::ServiceState(format!("worker '{}' has no receiver", self.name))
        })?;

        let handle = thread::Builder::new()
            .name(format!("worker-{}", self.name))
            .spawn(move || body(receiver))?;
        self.handle = Some(handle);
        debug!(worker = %self.name, "worker started");
        Ok(())
    }

    /// Whether the worker thread is currently running.
    pub fn is_alive(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Wait for the worker to consume its backlog.
    ///
    /// Polls the sender-side depth; returns once the channel is empty,
    /// the depth stalls, the worker dies, or `max_wait` elapses. Safe to
    /// call even if the worker has already exited.
    pub fn finish(&self, policy: &DrainPolicy) {
        let start = Instant::now();
        let mut last_depth = usize::MAX;
        let mut stalls = 0u32;

        while start.elapsed() < policy.max_wait {
            let depth = self.sender.depth();
            if depth == 0 {
                debug!(worker = %self.name, "worker drained");
                return;
            }
            if !self.is_alive() {
                warn!(worker = %self.name, depth, "worker exited with backlog");
                return;
            }
            if depth >= last_depth {
                stalls += 1;
                if stalls >= policy.stall_polls {
                    warn!(worker = %self.name, depth, "worker drain stalled");
                    return;
                }
            } else {
                stalls = 0;
            }
            last_depth = depth;
            thread::sleep(policy.poll_interval);
        }
        warn!(worker = %self.name, "worker drain hit max wait");
    }

    /// Stop the worker: send the stop sentinel, wait a grace period for
    /// the thread to exit, then abandon it and release both channel
    /// endpoints. Idempotent, and safe after the thread has already
    /// exited.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        self.sender.send_stop();

        if let Some(handle) = self.handle.take() {
            let deadline = Instant::now() + WORKER_CLOSE_GRACE;
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            if handle.is_finished() {
                if handle.join().is_err() {
                    warn!(worker = %self.name, "worker thread panicked");
                }
            } else {
                // A wedged consumer must not be allowed to block teardown;
                // the detached thread dies with the process.
                warn!(worker = %self.name, "worker unresponsive, abandoning thread");
            }
        }

        self.sender.close();
        if let Some(receiver) = self.receiver.take() {
            receiver.close();
        }
        debug!(worker = %self.name, "worker closed");
    }
}

impl Drop for CommWorker {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Received;
    use chrono::Utc;
    use daq_stimulus::Waveform;
    use ndarray::Array2;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn chunk(seq: u64) -> TimedChunk {
        let data = Array2::from_elem((4, 1), seq as f64);
        TimedChunk::new(Arc::new(Waveform::new(data).unwrap()), Utc::now(), seq)
    }

    fn drain_body(
        received: Arc<AtomicU32>,
        stops: Arc<AtomicU32>,
    ) -> impl FnOnce(ChunkReceiver) + Send + 'static {
        move |rx| loop {
            match rx.recv_timeout(Duration::from_millis(20)) {
                Received::Chunk(_) => {
                    received.fetch_add(1, Ordering::SeqCst);
                }
                Received::Stop => {
                    stops.fetch_add(1, Ordering::SeqCst);
                    return;
                }
                Received::Empty => {}
            }
        }
    }

    #[test]
    fn worker_consumes_queue_in_order_and_stops_once() {
        let received = Arc::new(AtomicU32::new(0));
        let stops = Arc::new(AtomicU32::new(0));
        let mut worker = CommWorker::new(
            "save",
            CommKind::Queue,
            drain_body(Arc::clone(&received), Arc::clone(&stops)),
        );
        worker.start().unwrap();

        for seq in 0..20 {
            worker.send(chunk(seq)).unwrap();
        }
        worker.finish(&DrainPolicy {
            poll_interval: Duration::from_millis(5),
            stall_polls: 10,
            max_wait: Duration::from_secs(5),
        });
        worker.close();

        assert_eq!(received.load(Ordering::SeqCst), 20);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn close_twice_does_not_panic() {
        let received = Arc::new(AtomicU32::new(0));
        let stops = Arc::new(AtomicU32::new(0));
        let mut worker = CommWorker::new(
            "display",
            CommKind::Pipe,
            drain_body(received, Arc::clone(&stops)),
        );
        worker.start().unwrap();
        worker.close();
        worker.close();
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn close_is_safe_after_worker_exited() {
        let mut worker = CommWorker::new("oneshot", CommKind::Queue, |_rx| {});
        worker.start().unwrap();
        // Give the body time to return on its own.
        thread::sleep(Duration::from_millis(50));
        assert!(!worker.is_alive());
        worker.finish(&DrainPolicy::default());
        worker.close();
    }

    #[test]
    fn finish_without_start_returns_immediately() {
        let worker = CommWorker::new("idle", CommKind::Queue, |_rx| {});
        worker.send(chunk(0)).unwrap();
        let start = Instant::now();
        worker.finish(&DrainPolicy {
            poll_interval: Duration::from_millis(5),
            stall_polls: 3,
            max_wait: Duration::from_secs(5),
        });
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn double_start_is_rejected() {
        let mut worker = CommWorker::new("dup", CommKind::Queue, |_rx| {});
        worker.start().unwrap();
        assert!(worker.start().is_err());
        worker.close();
    }
}
