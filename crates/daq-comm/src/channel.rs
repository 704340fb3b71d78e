//! The three channel variants and their endpoint pair.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use crossbeam_channel as cb;
use ndarray::Array2;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

use daq_core::{DaqError, Result};
use daq_stimulus::Waveform;

/// One acquired or generated chunk, stamped at the moment the hardware
/// buffer became ready.
#[derive(Debug, Clone)]
pub struct TimedChunk {
    pub data: Arc<Waveform>,
    pub timestamp: DateTime<Utc>,
    /// Producer-side sequence number; strictly increasing per task, so a
    /// consumer of a lossy channel can detect duplicates and gaps.
    pub seq: u64,
}

impl TimedChunk {
    pub fn new(data: Arc<Waveform>, timestamp: DateTime<Utc>, seq: u64) -> Self {
        Self {
            data,
            timestamp,
            seq,
        }
    }
}

/// Channel variant selector, chosen per consumer by the guarantee it
/// needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum CommKind {
    /// Lossless FIFO.
    Queue,
    /// Last value wins.
    Pipe,
    /// Fixed-shape shared buffer with a staleness flag.
    SharedArray { rows: usize, cols: usize },
}

/// Result of a receive attempt.
#[derive(Debug)]
pub enum Received {
    Chunk(TimedChunk),
    /// The producer sent the stop sentinel or closed the channel.
    Stop,
    /// Nothing arrived within the timeout.
    Empty,
}

/// Wire item carried by Queue and Pipe variants: a chunk or the
/// universal stop sentinel.
#[derive(Debug, Clone)]
pub enum Message {
    Chunk(TimedChunk),
    Stop,
}

// =============================================================================
// Pipe slot (last value wins)
// =============================================================================

#[derive(Debug)]
struct PipeState {
    value: Option<Message>,
    closed: bool,
}

/// Single-slot mailbox: `put` overwrites any unread value.
#[derive(Debug)]
pub struct PipeSlot {
    state: Mutex<PipeState>,
    ready: Condvar,
}

impl PipeSlot {
    fn new() -> Self {
        Self {
            state: Mutex::new(PipeState {
                value: None,
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    fn put(&self, msg: Message) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(DaqError::ChannelClosed);
        }
        state.value = Some(msg);
        self.ready.notify_one();
        Ok(())
    }

    fn take_timeout(&self, timeout: Duration) -> Received {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(msg) = state.value.take() {
                return match msg {
                    Message::Chunk(chunk) => Received::Chunk(chunk),
                    Message::Stop => Received::Stop,
                };
            }
            if state.closed {
                return Received::Stop;
            }
            let now = Instant::now();
            if now >= deadline {
                return Received::Empty;
            }
            if self.ready.wait_until(&mut state, deadline).timed_out() {
                // Re-check once: a put may have raced the timeout.
                continue;
            }
        }
    }

    fn unread(&self) -> usize {
        usize::from(self.state.lock().value.is_some())
    }

    fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.ready.notify_all();
    }
}

// =============================================================================
// Shared array
// =============================================================================

#[derive(Debug)]
struct SharedState {
    data: Array2<f64>,
    timestamp: DateTime<Utc>,
    seq: u64,
    /// Bumped on every `put`; lets a consumer that must never process the
    /// same frame twice tell a duplicate from a fresh frame.
    generation: u64,
    /// Set by `get`, cleared by `put`.
    stale: bool,
    written: bool,
    closed: bool,
}

/// Fixed-shape buffer shared between the producer and any number of
/// readers. `put` copies data in and clears staleness; `get` copies the
/// current contents out and sets staleness regardless of whether anything
/// new arrived: the same frame may be observed twice, and frames between
/// two `get` calls may never be observed at all. Neither side ever
/// blocks, and memory use is constant.
#[derive(Debug)]
pub struct SharedArray {
    shape: (usize, usize),
    state: Mutex<SharedState>,
}

impl SharedArray {
    pub fn new(rows: usize, cols: usize) -> Arc<Self> {
        Arc::new(Self {
            shape: (rows, cols),
            state: Mutex::new(SharedState {
                data: Array2::zeros((rows, cols)),
                timestamp: Utc::now(),
                seq: 0,
                generation: 0,
                stale: true,
                written: false,
                closed: false,
            }),
        })
    }

    pub fn shape(&self) -> (usize, usize) {
        self.shape
    }

    pub fn put(&self, chunk: &TimedChunk) -> Result<()> {
        if chunk.data.shape() != self.shape {
            return Err(DaqError::ShapeMismatch {
                got: chunk.data.shape(),
                want: self.shape,
            });
        }
        let mut state = self.state.lock();
        if state.closed {
            return Err(DaqError::ChannelClosed);
        }
        state.data.assign(chunk.data.data());
        state.timestamp = chunk.timestamp;
        state.seq = chunk.seq;
        state.generation += 1;
        state.stale = false;
        state.written = true;
        Ok(())
    }

    /// Copy out the current contents and mark them stale. Returns `None`
    /// until the first `put`.
    pub fn get(&self) -> Option<TimedChunk> {
        self.get_with_generation().map(|(chunk, _)| chunk)
    }

    /// Like [`SharedArray::get`], additionally returning the generation
    /// counter of the returned frame.
    pub fn get_with_generation(&self) -> Option<(TimedChunk, u64)> {
        let mut state = self.state.lock();
        if !state.written {
            return None;
        }
        state.stale = true;
        let data = state.data.clone();
        let chunk = TimedChunk {
            // Shape was validated on the way in, so this cannot fail.
            data: Arc::new(Waveform::new(data).ok()?),
            timestamp: state.timestamp,
            seq: state.seq,
        };
        Some((chunk, state.generation))
    }

    /// Whether the current contents have been read since the last `put`.
    pub fn is_stale(&self) -> bool {
        self.state.lock().stale
    }

    /// Current generation counter.
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn close(&self) {
        self.state.lock().closed = true;
    }
}

// =============================================================================
// Endpoint pair
// =============================================================================

/// Producer endpoint of a comm channel.
#[derive(Debug, Clone)]
pub enum ChunkSender {
    Queue {
        tx: cb::Sender<Message>,
        closed: Arc<AtomicBool>,
    },
    Pipe(Arc<PipeSlot>),
    Shared(Arc<SharedArray>),
}

impl ChunkSender {
    /// Deliver a chunk under the variant's contract.
    pub fn send(&self, chunk: TimedChunk) -> Result<()> {
        match self {
            ChunkSender::Queue { tx, closed } => {
                if closed.load(Ordering::Acquire) {
                    return Err(DaqError::ChannelClosed);
                }
                tx.send(Message::Chunk(chunk))
                    .map_err(|_| DaqError::ChannelClosed)
            }
            ChunkSender::Pipe(slot) => slot.put(Message::Chunk(chunk)),
            ChunkSender::Shared(shared) => shared.put(&chunk),
        }
    }

    /// Send the universal stop sentinel. Best effort: a closed or
    /// disconnected channel is already stopped.
    pub fn send_stop(&self) {
        match self {
            ChunkSender::Queue { tx, .. } => {
                let _ = tx.send(Message::Stop);
            }
            ChunkSender::Pipe(slot) => {
                let _ = slot.put(Message::Stop);
            }
            ChunkSender::Shared(shared) => shared.close(),
        }
    }

    /// Unconsumed items buffered on the channel. Queue depth for the FIFO
    /// variant; 0 or 1 for the others.
    pub fn depth(&self) -> usize {
        match self {
            ChunkSender::Queue { tx, .. } => tx.len(),
            ChunkSender::Pipe(slot) => slot.unread(),
            ChunkSender::Shared(shared) => usize::from(!shared.is_stale()),
        }
    }

    /// Tear down the sending side. Idempotent.
    pub fn close(&self) {
        match self {
            ChunkSender::Queue { closed, .. } => closed.store(true, Ordering::Release),
            ChunkSender::Pipe(slot) => slot.close(),
            ChunkSender::Shared(shared) => shared.close(),
        }
    }
}

/// Consumer endpoint of a comm channel.
#[derive(Debug, Clone)]
pub enum ChunkReceiver {
    Queue {
        rx: cb::Receiver<Message>,
        closed: Arc<AtomicBool>,
    },
    Pipe(Arc<PipeSlot>),
    Shared(Arc<SharedArray>),
}

impl ChunkReceiver {
    /// Wait up to `timeout` for the next delivery.
    ///
    /// The SharedArray variant never waits for *new* data: once anything
    /// has been written it returns the current frame immediately, stale
    /// or not. Before the first write it parks for the timeout instead of
    /// spinning.
    pub fn recv_timeout(&self, timeout: Duration) -> Received {
        match self {
            ChunkReceiver::Queue { rx, closed } => match rx.recv_timeout(timeout) {
                Ok(Message::Chunk(chunk)) => Received::Chunk(chunk),
                Ok(Message::Stop) => Received::Stop,
                Err(cb::RecvTimeoutError::Timeout) => {
                    if closed.load(Ordering::Acquire) && rx.is_empty() {
                        Received::Stop
                    } else {
                        Received::Empty
                    }
                }
                Err(cb::RecvTimeoutError::Disconnected) => Received::Stop,
            },
            ChunkReceiver::Pipe(slot) => slot.take_timeout(timeout),
            ChunkReceiver::Shared(shared) => match shared.get() {
                Some(chunk) => Received::Chunk(chunk),
                None if shared.is_closed() => Received::Stop,
                None => {
                    if !timeout.is_zero() {
                        std::thread::sleep(timeout);
                    }
                    match shared.get() {
                        Some(chunk) => Received::Chunk(chunk),
                        None if shared.is_closed() => Received::Stop,
                        None => Received::Empty,
                    }
                }
            },
        }
    }

    /// Tear down the receiving side. Idempotent.
    pub fn close(&self) {
        match self {
            ChunkReceiver::Queue { closed, .. } => closed.store(true, Ordering::Release),
            ChunkReceiver::Pipe(slot) => slot.close(),
            ChunkReceiver::Shared(shared) => shared.close(),
        }
    }
}

/// Create the endpoint pair for one channel of the given kind.
pub fn channel(kind: CommKind) -> (ChunkSender, ChunkReceiver) {
    match kind {
        CommKind::Queue => {
            let (tx, rx) = cb::unbounded();
            let closed = Arc::new(AtomicBool::new(false));
            (
                ChunkSender::Queue {
                    tx,
                    closed: Arc::clone(&closed),
                },
                ChunkReceiver::Queue { rx, closed },
            )
        }
        CommKind::Pipe => {
            let slot = Arc::new(PipeSlot::new());
            (
                ChunkSender::Pipe(Arc::clone(&slot)),
                ChunkReceiver::Pipe(slot),
            )
        }
        CommKind::SharedArray { rows, cols } => {
            let shared = SharedArray::new(rows, cols);
            (
                ChunkSender::Shared(Arc::clone(&shared)),
                ChunkReceiver::Shared(shared),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn chunk(seq: u64, rows: usize, cols: usize) -> TimedChunk {
        let data = Array2::from_elem((rows, cols), seq as f64);
        TimedChunk::new(Arc::new(Waveform::new(data).unwrap()), Utc::now(), seq)
    }

    #[test]
    fn queue_is_fifo_without_loss() {
        let (tx, rx) = channel(CommKind::Queue);
        for seq in 0..10 {
            tx.send(chunk(seq, 4, 1)).unwrap();
        }
        for seq in 0..10 {
            match rx.recv_timeout(Duration::from_millis(50)) {
                Received::Chunk(c) => assert_eq!(c.seq, seq),
                other => panic!("expected chunk {}, got {:?}", seq, other),
            }
        }
    }

    #[test]
    fn queue_stop_sentinel_terminates_the_stream() {
        let (tx, rx) = channel(CommKind::Queue);
        tx.send(chunk(0, 2, 1)).unwrap();
        tx.send_stop();
        assert!(matches!(
            rx.recv_timeout(Duration::from_millis(50)),
            Received::Chunk(_)
        ));
        assert!(matches!(
            rx.recv_timeout(Duration::from_millis(50)),
            Received::Stop
        ));
    }

    #[test]
    fn pipe_keeps_only_the_latest_value() {
        let (tx, rx) = channel(CommKind::Pipe);
        tx.send(chunk(1, 2, 1)).unwrap();
        tx.send(chunk(2, 2, 1)).unwrap();
        tx.send(chunk(3, 2, 1)).unwrap();
        match rx.recv_timeout(Duration::from_millis(50)) {
            Received::Chunk(c) => assert_eq!(c.seq, 3),
            other => panic!("expected latest chunk, got {:?}", other),
        }
        assert!(matches!(
            rx.recv_timeout(Duration::from_millis(10)),
            Received::Empty
        ));
    }

    #[test]
    fn shared_array_duplicates_but_never_corrupts() {
        let (tx, rx) = channel(CommKind::SharedArray { rows: 4, cols: 2 });
        tx.send(chunk(7, 4, 2)).unwrap();

        // Two consecutive gets with no intervening put: both observe the
        // same frame.
        for _ in 0..2 {
            match rx.recv_timeout(Duration::ZERO) {
                Received::Chunk(c) => {
                    assert_eq!(c.seq, 7);
                    assert!(c.data.data().iter().all(|&v| v == 7.0));
                }
                other => panic!("expected duplicated frame, got {:?}", other),
            }
        }
    }

    #[test]
    fn shared_array_generation_detects_duplicates() {
        let shared = SharedArray::new(2, 1);
        shared.put(&chunk(0, 2, 1)).unwrap();
        let (_, gen_a) = shared.get_with_generation().unwrap();
        let (_, gen_b) = shared.get_with_generation().unwrap();
        assert_eq!(gen_a, gen_b);

        shared.put(&chunk(1, 2, 1)).unwrap();
        let (_, gen_c) = shared.get_with_generation().unwrap();
        assert_eq!(gen_c, gen_a + 1);
    }

    #[test]
    fn shared_array_tracks_staleness() {
        let shared = SharedArray::new(2, 1);
        shared.put(&chunk(0, 2, 1)).unwrap();
        assert!(!shared.is_stale());
        let _ = shared.get();
        assert!(shared.is_stale());
        shared.put(&chunk(1, 2, 1)).unwrap();
        assert!(!shared.is_stale());
    }

    #[test]
    fn shared_array_rejects_shape_mismatch() {
        let shared = SharedArray::new(4, 2);
        let err = shared.put(&chunk(0, 3, 2)).unwrap_err();
        assert!(matches!(err, DaqError::ShapeMismatch { .. }));
    }

    #[test]
    fn close_is_idempotent_on_both_ends() {
        for kind in [
            CommKind::Queue,
            CommKind::Pipe,
            CommKind::SharedArray { rows: 1, cols: 1 },
        ] {
            let (tx, rx) = channel(kind);
            tx.close();
            tx.close();
            rx.close();
            rx.close();
            assert!(tx.send(chunk(0, 1, 1)).is_err());
        }
    }

    #[test]
    fn depth_reports_unconsumed_items() {
        let (tx, _rx) = channel(CommKind::Queue);
        assert_eq!(tx.depth(), 0);
        tx.send(chunk(0, 1, 1)).unwrap();
        tx.send(chunk(1, 1, 1)).unwrap();
        assert_eq!(tx.depth(), 2);

        let (tx, rx) = channel(CommKind::Pipe);
        tx.send(chunk(0, 1, 1)).unwrap();
        tx.send(chunk(1, 1, 1)).unwrap();
        assert_eq!(tx.depth(), 1);
        let _ = rx.recv_timeout(Duration::from_millis(10));
        assert_eq!(tx.depth(), 0);
    }
}
