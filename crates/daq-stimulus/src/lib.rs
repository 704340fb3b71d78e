//! `daq-stimulus`
//!
//! Pre-rendered waveform storage and playlist sequencing for output
//! tasks. A playlist enumerates waveform indices in a fixed, fully
//! shuffled, or block-shuffled order; the sequencer turns that order
//! into a lazy stream of chunks with the arming guarantees the
//! triggered output path depends on.

pub mod order;
pub mod sequencer;
pub mod waveform;

pub use order::{OrderCursor, PlayOrder};
pub use sequencer::{ChunkSource, PlaylistSequencer};
pub use waveform::Waveform;
