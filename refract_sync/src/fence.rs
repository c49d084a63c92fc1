//! Monotonic counter fence.
//!
//! A [`FrameFence`] publishes a monotonically increasing 64-bit value, one
//! writer ratcheting it forward and any number of waiters blocking until it
//! reaches a target. Frame pacing uses one fence per published timing event:
//! a waiter that returns from `wait(f)` has a happens-before edge on every
//! marker the writer stored before signaling `f`.

use parking_lot::{Condvar, Mutex};
use std::time::Duration;

/// Monotonic u64 fence with blocking waiters.
pub struct FrameFence {
    value: Mutex<u64>,
    cond: Condvar,
}

impl FrameFence {
    /// Create a fence with the given initial value.
    pub fn new(initial: u64) -> Self {
        Self {
            value: Mutex::new(initial),
            cond: Condvar::new(),
        }
    }

    /// Block until the fence value is at least `target`.
    pub fn wait(&self, target: u64) {
        let mut value = self.value.lock();
        while *value < target {
            self.cond.wait(&mut value);
        }
    }

    /// Block until the fence value is at least `target` or the timeout
    /// elapses. Returns `true` if the target was reached.
    pub fn wait_timeout(&self, target: u64, timeout: Duration) -> bool {
        let mut value = self.value.lock();
        while *value < target {
            if self.cond.wait_for(&mut value, timeout).timed_out() {
                return *value >= target;
            }
        }
        true
    }

    /// Ratchet the fence forward to `new_value` and wake all waiters.
    ///
    /// Values lower than the current one are ignored; the fence never moves
    /// backwards.
    pub fn signal(&self, new_value: u64) {
        let mut value = self.value.lock();
        if new_value > *value {
            *value = new_value;
            self.cond.notify_all();
        }
    }

    /// Current fence value.
    pub fn value(&self) -> u64 {
        *self.value.lock()
    }
}

// =============================================================================
// Tests
// =============================================================================
