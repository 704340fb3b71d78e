//! `daq-protocol`
//!
//! The request/response control surface every service runtime exposes
//! and the orchestrator consumes: a small length-framed binary protocol
//! over TCP with serializer-encoded payloads.
//!
//! The frame layout is deliberately independent of the payload
//! serializer: the serializer name travels in the launch command, so
//! both ends of a deployment agree without negotiation.

pub mod client;
pub mod messages;
pub mod protocol;

pub use client::ControlClient;
pub use messages::{
    BusyReport, CleanupReport, FinishParams, InputParams, OutputParams, PingReply, PlaylistParams,
    ProgressReport, Serializer, SetupParams, SinkSpec, WorkerSpec, PONG,
};
pub use protocol::{ControlRequest, ControlResponse, RequestType, ResponseStatus};
