//! `daq-service`
//!
//! The long-lived, network-addressable runtime hosting one synchronized
//! acquisition/playback engine: a clock-owning input task, any number of
//! triggered output tasks fed from playlist sequencers, and the consumer
//! workers fanned out from the input callback path.
//!
//! Lifecycle is the uniform `setup / start / finish / is_busy / progress
//! / cleanup / ping` contract served over the framed control protocol by
//! [`server::ControlServer`]; the hosting binary is `daq-serviced`.

pub mod config;
pub mod log_relay;
pub mod runtime;
pub mod server;

pub use config::ServiceConfig;
pub use runtime::{build_setup, AcquisitionService, ServiceSetup, ServiceState};
pub use server::ControlServer;
