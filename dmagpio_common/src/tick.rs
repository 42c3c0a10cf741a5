//! Wrapping 32-bit microsecond tick arithmetic.
//!
//! The tick wraps roughly every 71.6 minutes. Never compare two ticks
//! directly; compare their wrapping difference.

/// Microseconds from `earlier` to `later`.
#[inline]
pub fn tick_diff(later: u32, earlier: u32) -> u32 {
    later.wrapping_sub(earlier)
}

/// True when `now` is at or after `deadline`, assuming the two lie within
/// half the wrap period of each other.
#[inline]
pub fn tick_reached(now: u32, deadline: u32) -> bool {
    (now.wrapping_sub(deadline) as i32) >= 0
}

/// `tick` advanced by `micros`.
#[inline]
pub fn tick_add(tick: u32, micros: u32) -> u32 {
    tick.wrapping_add(micros)
}
