//! Start-trigger synchronization.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// One-shot start-of-acquisition edge.
///
/// The clock-owning input task fires the edge when its hardware starts
/// sampling; armed output tasks block on [`TriggerEdge::wait_timeout`]
/// before emitting their first buffer.
#[derive(Debug, Default)]
pub struct TriggerEdge {
    fired: Mutex<bool>,
    cond: Condvar,
}

impl TriggerEdge {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fire the edge. Subsequent calls are no-ops.
    pub fn fire(&self) {
        let mut fired = self.fired.lock();
        if !*fired {
            *fired = true;
            self.cond.notify_all();
        }
    }

    pub fn is_fired(&self) -> bool {
        *self.fired.lock()
    }

    /// Block until the edge fires. Returns `false` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut fired = self.fired.lock();
        while !*fired {
            if self.cond.wait_until(&mut fired, deadline).timed_out() {
                return *fired;
            }
        }
        true
    }
}
