//! `daq-storage`
//!
//! Disk persistence for acquired chunks. Two parallel CSV tracks per
//! recording: the sample rows themselves and one wall-clock timestamp
//! row per chunk. Both files are flushed after every chunk, so a crash
//! mid-run loses at most the unflushed tail of the current chunk.

pub mod chunk_writer;

pub use chunk_writer::{save_worker, ChunkWriter, WriterStats};
