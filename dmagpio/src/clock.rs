//! Microsecond tick source and precise sleeping.

use nix::time::{ClockId, clock_gettime};
use std::time::{Duration, Instant};

/// Remaining time below which [`sleep_until`] busy-waits.
const SPIN_THRESHOLD: Duration = Duration::from_micros(50);

/// Source of the wrapping 32-bit microsecond tick.
pub trait TickSource: Send + Sync {
    /// Current tick.
    fn tick(&self) -> u32;
}

/// `CLOCK_MONOTONIC` truncated to 32 bits of microseconds.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    fallback_epoch: Instant,
}

impl MonotonicClock {
    /// Create a clock.
    pub fn new() -> Self {
        Self {
            fallback_epoch: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TickSource for MonotonicClock {
    fn tick(&self) -> u32 {
        match clock_gettime(ClockId::CLOCK_MONOTONIC) {
            Ok(ts) => {
                let micros = (ts.tv_sec() as u64)
                    .wrapping_mul(1_000_000)
                    .wrapping_add(ts.tv_nsec() as u64 / 1_000);
                micros as u32
            }
            Err(_) => self.fallback_epoch.elapsed().as_micros() as u32,
        }
    }
}

/// Sleep until `deadline`, spinning through the final few microseconds.
pub fn sleep_until(deadline: Instant) {
    loop {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        let remaining = deadline - now;
        if remaining > SPIN_THRESHOLD {
            std::thread::sleep(remaining - SPIN_THRESHOLD);
        } else {
            std::hint::spin_loop();
        }
    }
}

/// Delay for `micros` and return the microseconds actually elapsed.
pub fn delay_micros(micros: u32) -> u32 {
    let start = Instant::now();
    sleep_until(start + Duration::from_micros(u64::from(micros)));
    start.elapsed().as_micros().min(u128::from(u32::MAX)) as u32
}
