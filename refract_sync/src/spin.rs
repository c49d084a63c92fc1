//! Low-power spinning.

/// Spin for `count` iterations without giving up the thread's timeslice.
///
/// Each iteration issues the architecture's pause/yield hint so a sibling
/// hyperthread can make progress.
#[inline]
pub fn spin(count: u32) {
    for _ in 0..count {
        std::hint::spin_loop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spin_returns() {
        spin(0);
        spin(1000);
    }
}
