//! Hybrid sleep with sub-millisecond wakeup accuracy.
//!
//! OS sleeps routinely overshoot by a scheduler quantum, which is far too
//! coarse for frame pacing. [`sleep_until`] sleeps through the bulk of the
//! interval in the OS and spins the final stretch, trading a bounded amount
//! of CPU for an accurate wakeup.

use std::time::{Duration, Instant};

/// How much of the tail end of the interval is spent spinning instead of
/// sleeping. Covers the typical OS oversleep on mainstream schedulers.
const SPIN_WINDOW: Duration = Duration::from_micros(500);

/// Sleep until `target`, spinning through the final [`SPIN_WINDOW`].
///
/// `now` is passed in so a caller that just sampled the clock does not pay
/// for a second sample. Returns immediately if `target` is not in the
/// future.
pub fn sleep_until(now: Instant, target: Instant) {
    if target <= now {
        return;
    }

    let total = target - now;
    if total > SPIN_WINDOW {
        std::thread::sleep(total - SPIN_WINDOW);
    }

    while Instant::now() < target {
        std::hint::spin_loop();
    }
}

/// Sleep for `duration` with the same hybrid strategy.
pub fn sleep_for(duration: Duration) {
    let now = Instant::now();
    sleep_until(now, now + duration);
}

// =============================================================================
// Tests
// =============================================================================
