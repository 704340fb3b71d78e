//! Lazy playlist sequencing.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use daq_core::{DaqError, Result};

use crate::order::{OrderCursor, PlayOrder};
use crate::waveform::Waveform;

/// A restartable stream of pre-rendered chunks.
///
/// The trait replaces generator-close semantics with an explicit
/// [`ChunkSource::close`]: teardown ordering in the stop sequence calls
/// `close` on every output's source before any hardware is touched, and
/// a closed source simply stops yielding.
pub trait ChunkSource: Send {
    /// Next chunk, or `None` once the source is exhausted or closed.
    /// Exhaustion is the normal end of a finite playlist, not a fault.
    fn next_chunk(&mut self) -> Option<Arc<Waveform>>;

    /// Release metadata handles. Idempotent; never fails.
    fn close(&mut self);
}

/// Sequences `(waveforms, order)` into a chunk stream.
///
/// The first index of the order is resolved eagerly at construction and
/// re-emitted by the first [`ChunkSource::next_chunk`] call, so an output
/// task arming against a start trigger always has a real chunk to
/// pre-fill its buffer with, even before the shuffle has been walked.
///
/// With `cycle = false` the sequencer is finite: exactly one pass of the
/// order (the eager first index plus `len - 1` further pulls), then
/// `None`. With `cycle = true` it runs until closed.
pub struct PlaylistSequencer {
    waveforms: Vec<Arc<Waveform>>,
    cursor: OrderCursor,
    first: usize,
    cycle: bool,
    closed: bool,
    emitted: usize,
    pass_samples: u64,
    history: Vec<usize>,
}

impl PlaylistSequencer {
    pub fn new(
        waveforms: Vec<Waveform>,
        order: PlayOrder,
        cycle: bool,
        seed: Option<u64>,
    ) -> Result<Self> {
        if waveforms.is_empty() {
            return Err(DaqError::Stimulus("playlist has no waveforms".into()));
        }
        let channels = waveforms[0].channels();
        if waveforms.iter().any(|w| w.channels() != channels) {
            return Err(DaqError::Stimulus(
                "playlist waveforms must share a channel count".into(),
            ));
        }

        let mut cursor = OrderCursor::new(order, waveforms.len(), seed)?;
        let first = cursor.next_index();

        // Walk a clone of the cursor to price out one pass ahead of time;
        // the clone shares the rng state, so the prediction matches what
        // will actually be played.
        let mut probe = cursor.clone();
        let mut pass_samples = waveforms[first].samples() as u64;
        for _ in 1..cursor.pass_len() {
            pass_samples += waveforms[probe.next_index()].samples() as u64;
        }

        Ok(Self {
            waveforms: waveforms.into_iter().map(Arc::new).collect(),
            cursor,
            first,
            cycle,
            closed: false,
            emitted: 0,
            pass_samples,
            history: Vec::new(),
        })
    }

    /// Samples in one finite pass (including the re-emitted first chunk).
    pub fn pass_samples(&self) -> u64 {
        self.pass_samples
    }

    /// Total playback duration of one pass, or `None` when cycling.
    pub fn total_duration(&self, sample_rate: f64) -> Option<Duration> {
        if self.cycle {
            None
        } else {
            Some(Duration::from_secs_f64(
                self.pass_samples as f64 / sample_rate,
            ))
        }
    }

    /// Channel count shared by every waveform in the playlist.
    pub fn channels(&self) -> usize {
        self.waveforms[0].channels()
    }

    /// Indices emitted so far, in emission order.
    pub fn emitted(&self) -> &[usize] {
        &self.history
    }
}

impl ChunkSource for PlaylistSequencer {
    fn next_chunk(&mut self) -> Option<Arc<Waveform>> {
        if self.closed {
            return None;
        }
        // First pull: re-emit the eagerly resolved first index without
        // advancing the order.
        if self.emitted == 0 {
            self.emitted = 1;
            self.history.push(self.first);
            return Some(Arc::clone(&self.waveforms[self.first]));
        }
        if !self.cycle && self.emitted >= self.cursor.pass_len() {
            return None;
        }
        let idx = self.cursor.next_index();
        self.emitted += 1;
        self.history.push(idx);
        Some(Arc::clone(&self.waveforms[idx]))
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            debug!(
                emitted = self.emitted,
                "playlist sequencer closed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn wf(samples: usize) -> Waveform {
        Waveform::new(Array2::zeros((samples, 2))).unwrap()
    }

    fn playlist(lens: &[usize]) -> Vec<Waveform> {
        lens.iter().map(|&n| wf(n)).collect()
    }

    #[test]
    fn first_pull_matches_order_head_for_every_policy() {
        for order in [
            PlayOrder::Sequential,
            PlayOrder::Shuffle,
            PlayOrder::BlockShuffle { block_len: 3 },
        ] {
            let mut seq =
                PlaylistSequencer::new(playlist(&[10, 20, 30]), order, false, Some(11)).unwrap();
            let first = seq.next_chunk().unwrap();
            let head = seq.emitted()[0];
            assert!(head < 3);
            assert_eq!(first.samples(), [10, 20, 30][head]);
        }
    }

    #[test]
    fn finite_sequential_pass_plays_each_waveform_once() {
        let mut seq = PlaylistSequencer::new(
            playlist(&[10, 20, 30]),
            PlayOrder::Sequential,
            false,
            None,
        )
        .unwrap();

        let lens: Vec<usize> = std::iter::from_fn(|| seq.next_chunk())
            .map(|c| c.samples())
            .collect();
        assert_eq!(lens, vec![10, 20, 30]);
        // Exhaustion is stable.
        assert!(seq.next_chunk().is_none());
    }

    #[test]
    fn pass_samples_predicts_the_actual_pass() {
        for order in [
            PlayOrder::Sequential,
            PlayOrder::Shuffle,
            PlayOrder::BlockShuffle { block_len: 4 },
        ] {
            let mut seq =
                PlaylistSequencer::new(playlist(&[5, 7, 11, 13]), order, false, Some(3)).unwrap();
            let predicted = seq.pass_samples();
            let played: u64 = std::iter::from_fn(|| seq.next_chunk())
                .map(|c| c.samples() as u64)
                .sum();
            assert_eq!(predicted, played);
        }
    }

    #[test]
    fn cycling_sequencer_keeps_yielding() {
        let mut seq =
            PlaylistSequencer::new(playlist(&[4, 4]), PlayOrder::Sequential, true, None).unwrap();
        for _ in 0..50 {
            assert!(seq.next_chunk().is_some());
        }
        assert!(seq.total_duration(1000.0).is_none());
    }

    #[test]
    fn close_is_idempotent_and_stops_the_stream() {
        let mut seq =
            PlaylistSequencer::new(playlist(&[4]), PlayOrder::Sequential, true, None).unwrap();
        assert!(seq.next_chunk().is_some());
        seq.close();
        seq.close();
        assert!(seq.next_chunk().is_none());
    }

    #[test]
    fn total_duration_sums_the_pass() {
        let seq = PlaylistSequencer::new(
            playlist(&[100, 200, 300]),
            PlayOrder::Sequential,
            false,
            None,
        )
        .unwrap();
        assert_eq!(
            seq.total_duration(600.0),
            Some(Duration::from_secs(1))
        );
    }

    #[test]
    fn rejects_mixed_channel_counts() {
        let mixed = vec![
            Waveform::new(Array2::zeros((8, 2))).unwrap(),
            Waveform::new(Array2::zeros((8, 3))).unwrap(),
        ];
        assert!(PlaylistSequencer::new(mixed, PlayOrder::Sequential, false, None).is_err());
    }
}
