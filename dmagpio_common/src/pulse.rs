//! Waveform pulse records.
//!
//! A pulse sets and clears pins at one instant, then waits `delay_micros`
//! before the next pulse takes effect.

use bitflags::bitflags;

bitflags! {
    /// Capture actions attached to a raw pulse.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct WaveFlags: u32 {
        /// Record the full level vector when the pulse is reached.
        const READ = 1 << 0;
        /// Record the tick when the pulse is reached.
        const TICK = 1 << 1;
    }
}

/// One (set, clear, delay) step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pulse {
    /// Pins driven high.
    pub set: u64,
    /// Pins driven low.
    pub clear: u64,
    /// Wait before the next pulse.
    pub delay_micros: u32,
}

impl Pulse {
    /// Build a pulse.
    pub const fn new(set: u64, clear: u64, delay_micros: u32) -> Self {
        Self {
            set,
            clear,
            delay_micros,
        }
    }

    /// A pure delay.
    pub const fn delay(delay_micros: u32) -> Self {
        Self::new(0, 0, delay_micros)
    }
}

/// A pulse with capture flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawPulse {
    /// Pins driven high.
    pub set: u64,
    /// Pins driven low.
    pub clear: u64,
    /// Wait before the next pulse.
    pub delay_micros: u32,
    /// Captures taken at this instant.
    pub flags: WaveFlags,
}

impl RawPulse {
    /// Build a raw pulse.
    pub const fn new(set: u64, clear: u64, delay_micros: u32, flags: WaveFlags) -> Self {
        Self {
            set,
            clear,
            delay_micros,
            flags,
        }
    }

    /// A pure delay.
    pub const fn delay(delay_micros: u32) -> Self {
        Self::new(0, 0, delay_micros, WaveFlags::empty())
    }

    /// True when the pulse has no effect at all.
    pub fn is_empty(&self) -> bool {
        self.set == 0 && self.clear == 0 && self.delay_micros == 0 && self.flags.is_empty()
    }
}

impl From<Pulse> for RawPulse {
    fn from(p: Pulse) -> Self {
        Self::new(p.set, p.clear, p.delay_micros, WaveFlags::empty())
    }
}
