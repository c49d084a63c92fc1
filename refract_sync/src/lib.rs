//! Synchronization primitives for the refract submission core.
//!
//! Everything in this crate is shared-memory, thread-to-thread plumbing:
//!
//! - [`AtomicSignal`]: a single-word coalescing wait/notify flag built on the
//!   platform wait-on-address facility (futex on Linux, `WaitOnAddress` on
//!   Windows).
//! - [`FixedPool`]: a fixed-capacity lockfree object pool that recycles slots
//!   between producers and consumer threads.
//! - [`FrameFence`]: a monotonic counter fence for publishing per-frame
//!   progress across threads.
//! - [`sleep`]: a hybrid sleep that trades a short spin for sub-millisecond
//!   wakeup accuracy.
//!
//! None of these primitives allocate on their hot paths.

pub mod fence;
pub mod pool;
pub mod signal;
pub mod sleep;
pub mod spin;

pub use fence::FrameFence;
pub use pool::FixedPool;
pub use signal::AtomicSignal;
pub use spin::spin;
