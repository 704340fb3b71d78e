//! `daq-comm`
//!
//! Data channels between the acquisition callback path and its
//! consumers, plus the worker lifecycle wrapper that owns a consumer's
//! thread.
//!
//! Three channel variants with distinct delivery contracts:
//!
//! | variant | guarantee | cost |
//! |---|---|---|
//! | Queue | FIFO, no loss | unbounded memory if the consumer stalls |
//! | Pipe | latest value only | staleness instead of backpressure |
//! | SharedArray | fixed memory, never blocks | duplicated or skipped frames |
//!
//! The variant set is closed: endpoints are enums dispatched by `match`,
//! and each carries exactly the capability its contract allows.

pub mod channel;
pub mod worker;

pub use channel::{channel, ChunkReceiver, ChunkSender, CommKind, Received, SharedArray, TimedChunk};
pub use worker::{CommWorker, DrainPolicy};
