//! `daq-core`
//!
//! Shared building blocks for the rig-daq service fleet: the error
//! taxonomy every crate reports through, centralized tuning limits, and
//! the camera capability seam consumed by camera-facing services.
//!
//! The acquisition/playback engine itself lives in `daq-task` and
//! `daq-service`; this crate deliberately stays dependency-light so the
//! hardware driver crates can depend on it without pulling in the
//! control plane.

pub mod camera;
pub mod error;
pub mod limits;

pub use error::{DaqError, HardwareError, HardwareErrorKind, Result};
