//! Signed microsecond arithmetic over `Instant`.

use std::time::Instant;

/// Microseconds from `from` to `to`; negative when `to` precedes `from`.
#[inline]
pub(crate) fn delta_us(from: Instant, to: Instant) -> i64 {
    if to >= from {
        (to - from).as_micros() as i64
    } else {
        -((from - to).as_micros() as i64)
    }
}
