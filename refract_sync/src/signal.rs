//! Coalescing wait/notify signal with test-and-clear semantics.
//!
//! An [`AtomicSignal`] collapses any number of notifications into a single
//! wakeup. The flag is a single atomic word; waiters park on its address via
//! the platform wait-on-address facility:
//!
//! - Linux: `futex(FUTEX_WAIT_PRIVATE)` / `futex(FUTEX_WAKE_PRIVATE)`
//! - Windows: `WaitOnAddress` / `WakeByAddressSingle` / `WakeByAddressAll`
//!
//! The memory-barrier semantics are equivalent to a mutex/condvar pair, but
//! signaling an already-set flag is free of any syscall and nothing here
//! touches the heap.
//!
//! # Contract
//!
//! After any `signal_*` call that follows a `clear()`, at least one
//! subsequent `wait()` returns. `wait()` consumes the flag: it returns only
//! after atomically observing `set` and storing `clear`. The load must not
//! be reordered past the clear, which is why the wait loop is built on a
//! compare-exchange rather than a plain load.

use std::sync::atomic::{AtomicU32, Ordering};

const CLEAR: u32 = 0;
const SET: u32 = 1;

/// Single-word, coalescing wait/notify primitive.
///
/// The name is carried for diagnostics only; it shows up in wait-failure
/// log messages.
pub struct AtomicSignal {
    flag: AtomicU32,
    name: &'static str,
}

impl AtomicSignal {
    /// Create a signal, optionally starting in the set state.
    pub const fn new(name: &'static str, set: bool) -> Self {
        Self {
            flag: AtomicU32::new(if set { SET } else { CLEAR }),
            name,
        }
    }

    /// Block until the flag observes `set`, then atomically clear it.
    ///
    /// Returns immediately (after clearing) if the flag is already set.
    /// Spurious wakeups are retried internally.
    pub fn wait(&self) {
        loop {
            if self
                .flag
                .compare_exchange(SET, CLEAR, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return;
            }

            // Parks while the flag still reads CLEAR. A wakeup between the
            // compare-exchange and the park is caught by the kernel-side
            // value recheck.
            platform::wait(&self.flag, CLEAR, self.name);
        }
    }

    /// Set the flag and wake one waiter.
    ///
    /// If the flag is already set, the notification coalesces and no
    /// syscall is made.
    pub fn signal_one(&self) {
        if self
            .flag
            .compare_exchange(CLEAR, SET, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            platform::wake_one(&self.flag, self.name);
        }
    }

    /// Set the flag and wake all waiters.
    pub fn signal_all(&self) {
        self.flag.store(SET, Ordering::SeqCst);
        platform::wake_all(&self.flag, self.name);
    }

    /// Store `clear` without waking anyone.
    pub fn clear(&self) {
        self.flag.store(CLEAR, Ordering::SeqCst);
    }

    /// Whether the flag currently reads `set`.
    #[inline]
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst) == SET
    }

    /// Diagnostic name given at construction.
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

// =============================================================================
// Platform backends
// =============================================================================

#[cfg(target_os = "linux")]
mod platform {
    use std::sync::atomic::AtomicU32;

    use tracing::error;

    fn futex(flag: &AtomicU32, op: libc::c_int, value: u32) -> libc::c_long {
        // SAFETY: the futex word outlives the syscall and AtomicU32 has the
        // same layout as u32.
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                flag as *const AtomicU32 as *const u32,
                op,
                value,
                std::ptr::null::<libc::timespec>(),
            )
        }
    }

    pub(super) fn wait(flag: &AtomicU32, expected: u32, name: &str) {
        if futex(flag, libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG, expected) == -1 {
            let err = std::io::Error::last_os_error();
            match err.raw_os_error() {
                // EAGAIN: the flag changed before the kernel could park us.
                // EINTR: interrupted; the caller loops and re-examines.
                Some(libc::EAGAIN) | Some(libc::EINTR) => {}
                _ => error!("futex wait on '{}' failed: {}", name, err),
            }
        }
    }

    pub(super) fn wake_one(flag: &AtomicU32, name: &str) {
        if futex(flag, libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG, 1) == -1 {
            error!(
                "futex wake on '{}' failed: {}",
                name,
                std::io::Error::last_os_error()
            );
        }
    }

    pub(super) fn wake_all(flag: &AtomicU32, name: &str) {
        if futex(flag, libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG, i32::MAX as u32) == -1 {
            error!(
                "futex wake on '{}' failed: {}",
                name,
                std::io::Error::last_os_error()
            );
        }
    }
}

#[cfg(windows)]
mod platform {
    use std::ffi::c_void;
    use std::sync::atomic::AtomicU32;

    use tracing::error;
    use windows_sys::Win32::System::Threading::{
        WaitOnAddress, WakeByAddressAll, WakeByAddressSingle, INFINITE,
    };

    pub(super) fn wait(flag: &AtomicU32, expected: u32, name: &str) {
        // SAFETY: both addresses point at live u32-sized storage for the
        // duration of the call.
        let ok = unsafe {
            WaitOnAddress(
                flag as *const AtomicU32 as *const c_void,
                &expected as *const u32 as *const c_void,
                std::mem::size_of::<u32>(),
                INFINITE,
            )
        };
        if ok == 0 {
            error!(
                "WaitOnAddress on '{}' failed: {}",
                name,
                std::io::Error::last_os_error()
            );
        }
    }

    pub(super) fn wake_one(flag: &AtomicU32, _name: &str) {
        // SAFETY: the address points at live storage.
        unsafe { WakeByAddressSingle(flag as *const AtomicU32 as *const c_void) };
    }

    pub(super) fn wake_all(flag: &AtomicU32, _name: &str) {
        // SAFETY: the address points at live storage.
        unsafe { WakeByAddressAll(flag as *const AtomicU32 as *const c_void) };
    }
}

#[cfg(not(any(target_os = "linux", windows)))]
mod platform {
    use std::sync::atomic::{AtomicU32, Ordering};

    // Portable fallback: bounded spin, then yield. Waiters poll the flag,
    // so wakeups need no syscall.
    pub(super) fn wait(flag: &AtomicU32, expected: u32, _name: &str) {
        for _ in 0..64 {
            if flag.load(Ordering::SeqCst) != expected {
                return;
            }
            std::hint::spin_loop();
        }
        std::thread::yield_now();
    }

    pub(super) fn wake_one(_flag: &AtomicU32, _name: &str) {}

    pub(super) fn wake_all(_flag: &AtomicU32, _name: &str) {}
}

// =============================================================================
// Tests
// =============================================================================
