//! Playlist index ordering policies.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use daq_core::{DaqError, Result};

/// How waveform indices are ordered during playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum PlayOrder {
    /// 0, 1, …, n-1, wrapping.
    Sequential,
    /// An independent uniform draw on every pull; consecutive duplicates
    /// are legal.
    Shuffle,
    /// Walks a shuffled permutation, reshuffling only when the in-block
    /// position wraps to zero.
    BlockShuffle { block_len: usize },
}

/// Stateful cursor over a [`PlayOrder`].
///
/// Every emitted index is in `[0, len)`. A cursor is infinite; finiteness
/// (one pass of [`OrderCursor::pass_len`] pulls) is imposed by the
/// sequencer that drives it.
#[derive(Debug, Clone)]
pub struct OrderCursor {
    order: PlayOrder,
    len: usize,
    pos: usize,
    perm: Vec<usize>,
    rng: StdRng,
}

impl OrderCursor {
    /// Create a cursor over `len` waveform indices. `seed` pins the
    /// shuffle for reproducible runs; otherwise the cursor seeds itself
    /// from the OS.
    pub fn new(order: PlayOrder, len: usize, seed: Option<u64>) -> Result<Self> {
        if len == 0 {
            return Err(DaqError::Stimulus("playlist order over zero waveforms".into()));
        }
        if let PlayOrder::BlockShuffle { block_len } = order {
            if block_len == 0 {
                return Err(DaqError::Stimulus("block_len must be positive".into()));
            }
        }
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            order,
            len,
            pos: 0,
            perm: (0..len).collect(),
            rng,
        })
    }

    /// Number of pulls in one finite pass of the playlist.
    pub fn pass_len(&self) -> usize {
        self.len
    }

    /// Emit the next waveform index.
    pub fn next_index(&mut self) -> usize {
        match self.order {
            PlayOrder::Sequential => {
                let idx = self.pos;
                self.pos = (self.pos + 1) % self.len;
                idx
            }
            PlayOrder::Shuffle => self.rng.gen_range(0..self.len),
            PlayOrder::BlockShuffle { block_len } => {
                if self.pos == 0 {
                    self.perm.shuffle(&mut self.rng);
                }
                let idx = self.perm[self.pos % self.perm.len()];
                self.pos = (self.pos + 1) % block_len;
                idx
            }
        }
    }
}
