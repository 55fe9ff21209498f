//! In-flight request accounting for the global progress indicator
//!
//! The counter and the busy signal change under one lock so that a 1→0
//! transition on one task and a 0→1 transition on another can never publish
//! their signals out of order.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tracing::{debug, warn};

/// Counts outstanding pipeline calls and publishes a busy/idle signal on
/// 0↔1 transitions.
pub struct BusyTracker {
    in_flight: Mutex<usize>,
    busy: watch::Sender<bool>,
}

impl BusyTracker {
    pub fn new() -> Self {
        let (busy, _) = watch::channel(false);
        Self {
            in_flight: Mutex::new(0),
            busy,
        }
    }

    /// Count one more outstanding call.
    pub fn begin(&self) {
        let mut in_flight = self.lock();
        *in_flight += 1;
        crate::metrics::set_in_flight(*in_flight);
        if *in_flight == 1 {
            debug!("busy");
            self.busy.send_replace(true);
        }
    }

    /// Count one call as finished. An `end` without a matching `begin` is
    /// ignored.
    pub fn end(&self) {
        let mut in_flight = self.lock();
        if *in_flight == 0 {
            warn!("busy tracker end() without matching begin(), ignoring");
            return;
        }
        *in_flight -= 1;
        crate::metrics::set_in_flight(*in_flight);
        if *in_flight == 0 {
            debug!("idle");
            self.busy.send_replace(false);
        }
    }

    /// `begin` now, `end` when the guard drops.
    pub fn guard(self: &Arc<Self>) -> BusyGuard {
        self.begin();
        BusyGuard {
            tracker: Arc::clone(self),
        }
    }

    pub fn in_flight(&self) -> usize {
        *self.lock()
    }

    pub fn is_busy(&self) -> bool {
        *self.busy.borrow()
    }

    /// Receiver for the busy signal.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.busy.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        // A panic while holding this lock can't leave the counter half-updated
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for BusyTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Ends its call exactly once, on whatever path the owning future exits,
/// including being dropped by a timeout.
pub struct BusyGuard {
    tracker: Arc<BusyTracker>,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.tracker.end();
    }
}
