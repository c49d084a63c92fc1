//! GPU operation results.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// Result of a GPU submission, fence wait or present.
///
/// `NotReady` doubles as the "no result published yet" state of a
/// [`SubmitStatus`](crate::SubmitStatus). Everything other than `Success`
/// and `NotReady` is an error; `DeviceLost` is the only irrecoverable one.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GpuResult {
    /// Operation completed.
    Success = 0,
    /// Operation has not produced a result yet.
    #[default]
    NotReady = 1,
    /// The device is gone; no recovery inside this pipeline.
    DeviceLost = 2,
    /// The device ran out of memory.
    OutOfMemory = 3,
    /// The presentation surface no longer matches the swap chain.
    SurfaceOutOfDate = 4,
    /// A transient failure; the submission did not take effect.
    Interrupted = 5,
}

impl GpuResult {
    /// Decode a raw atomic word. Unknown values decode to `NotReady`.
    #[inline]
    pub fn from_u32(value: u32) -> Self {
        match value {
            0 => GpuResult::Success,
            2 => GpuResult::DeviceLost,
            3 => GpuResult::OutOfMemory,
            4 => GpuResult::SurfaceOutOfDate,
            5 => GpuResult::Interrupted,
            _ => GpuResult::NotReady,
        }
    }

    /// Whether this result reports a failure.
    #[inline]
    pub fn is_error(self) -> bool {
        !matches!(self, GpuResult::Success | GpuResult::NotReady)
    }
}

impl fmt::Display for GpuResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GpuResult::Success => "success",
            GpuResult::NotReady => "not ready",
            GpuResult::DeviceLost => "device lost",
            GpuResult::OutOfMemory => "out of memory",
            GpuResult::SurfaceOutOfDate => "surface out of date",
            GpuResult::Interrupted => "interrupted",
        };
        f.write_str(name)
    }
}

/// A [`GpuResult`] in an atomic word.
pub struct AtomicGpuResult(AtomicU32);

impl AtomicGpuResult {
    pub const fn new(result: GpuResult) -> Self {
        Self(AtomicU32::new(result as u32))
    }

    #[inline]
    pub fn load(&self) -> GpuResult {
        GpuResult::from_u32(self.0.load(Ordering::SeqCst))
    }

    #[inline]
    pub fn store(&self, result: GpuResult) {
        self.0.store(result as u32, Ordering::SeqCst);
    }
}

impl Default for AtomicGpuResult {
    fn default() -> Self {
        AtomicGpuResult::new(GpuResult::NotReady)
    }
}

impl fmt::Debug for AtomicGpuResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AtomicGpuResult").field(&self.load()).finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_through_raw_word() {
        for result in [
            GpuResult::Success,
            GpuResult::NotReady,
            GpuResult::DeviceLost,
            GpuResult::OutOfMemory,
            GpuResult::SurfaceOutOfDate,
            GpuResult::Interrupted,
        ] {
            assert_eq!(GpuResult::from_u32(result as u32), result);
        }
        assert_eq!(GpuResult::from_u32(999), GpuResult::NotReady);
    }

    #[test]
    fn test_error_classification() {
        assert!(!GpuResult::Success.is_error());
        assert!(!GpuResult::NotReady.is_error());
        assert!(GpuResult::DeviceLost.is_error());
        assert!(GpuResult::OutOfMemory.is_error());
        assert!(GpuResult::SurfaceOutOfDate.is_error());
    }

    #[test]
    fn test_atomic_cell() {
        let cell = AtomicGpuResult::new(GpuResult::NotReady);
        assert_eq!(cell.load(), GpuResult::NotReady);
        cell.store(GpuResult::OutOfMemory);
        assert_eq!(cell.load(), GpuResult::OutOfMemory);
    }
}
