//! Centralized tuning constants.
//!
//! Keeping these in one place makes the shutdown-time guarantees auditable:
//! every bounded wait in the fleet is built from the constants below.

use std::time::Duration;

// =============================================================================
// Worker Drain / Close
// =============================================================================

/// Interval between queue-depth polls while draining a worker.
pub const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Consecutive non-decreasing depth polls after which a worker is declared
/// wedged and the drain gives up.
pub const DRAIN_STALL_POLLS: u32 = 5;

/// Upper bound on the total drain wait, regardless of queue depth.
pub const DRAIN_MAX_WAIT: Duration = Duration::from_secs(30);

/// Grace period between sending the stop sentinel and abandoning the
/// worker thread.
pub const WORKER_CLOSE_GRACE: Duration = Duration::from_secs(2);

// =============================================================================
// Task Buffers
// =============================================================================

/// Default input buffer length, in seconds of samples per cycle.
pub const INPUT_BUFFER_SECONDS: f64 = 1.0;

/// Output buffers are this fraction of the input buffer: a smaller buffer
/// shortens refill latency, which matters once regeneration is disabled.
pub const OUTPUT_BUFFER_FRACTION: f64 = 0.25;

/// Deadline for a single hardware buffer to fill or drain.
pub const BUFFER_WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long an armed output waits for the master start trigger.
pub const TRIGGER_WAIT_TIMEOUT: Duration = Duration::from_secs(60);

// =============================================================================
// Control Plane
// =============================================================================

/// Timeout for a single control RPC round-trip.
pub const RPC_TIMEOUT: Duration = Duration::from_secs(15);

/// Timeout for establishing the control connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Window within which a freshly launched service process must become
/// discoverable and answer a ping.
pub const WARMUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Interval between PID-discovery polls during warmup.
pub const WARMUP_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Interval between orchestrator heartbeat pings.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(2);

// =============================================================================
// Log Relay
// =============================================================================

/// First port of the fixed range the log relay binds in.
pub const LOG_RELAY_PORT_BASE: u16 = 9500;

/// Number of ports in the relay range; one per service on a host.
pub const LOG_RELAY_PORT_SPAN: u16 = 16;
