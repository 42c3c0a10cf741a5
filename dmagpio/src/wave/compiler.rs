//! Transfer-chain compiler.
//!
//! Turns a time-ordered pulse sequence into fixed-format transfer
//! descriptors. Each descriptor performs one action: write a set mask,
//! write a clear mask, capture levels or tick, or wait. Masks and capture
//! slots live in out-of-line (OOL) words referenced by index. Delays longer
//! than the per-descriptor cap are split into several delay descriptors.
//!
//! The compiler emits a relocatable [`ChainPlan`]; the
//! [`WaveStore`](super::store::WaveStore) places it in its arenas and links
//! the descriptors.

use dmagpio_common::error::{GpioError, GpioResult};
use dmagpio_common::pulse::{RawPulse, WaveFlags};

/// Action performed by one descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    /// Drive the pins in OOL word `ool` high.
    Set {
        /// OOL index of the mask.
        ool: usize,
    },
    /// Drive the pins in OOL word `ool` low.
    Clear {
        /// OOL index of the mask.
        ool: usize,
    },
    /// Store the level vector into OOL word `ool`.
    ReadLevels {
        /// OOL index of the capture slot.
        ool: usize,
    },
    /// Store the tick into OOL word `ool`.
    ReadTick {
        /// OOL index of the capture slot.
        ool: usize,
    },
    /// Wait.
    Delay {
        /// Duration, never above the cap the chain was compiled with.
        micros: u32,
    },
}

impl Transfer {
    /// Shift OOL references by `base`.
    pub fn relocated(self, base: usize) -> Self {
        match self {
            Self::Set { ool } => Self::Set { ool: ool + base },
            Self::Clear { ool } => Self::Clear { ool: ool + base },
            Self::ReadLevels { ool } => Self::ReadLevels { ool: ool + base },
            Self::ReadTick { ool } => Self::ReadTick { ool: ool + base },
            Self::Delay { micros } => Self::Delay { micros },
        }
    }
}

/// Successor of a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
    /// Continue at descriptor index.
    Next(usize),
    /// Terminal marker: playback ends here.
    End,
}

/// A placed, linked descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    /// Action.
    pub transfer: Transfer,
    /// Successor.
    pub next: Link,
}

/// Relocatable compiler output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainPlan {
    /// Descriptors in execution order, OOL indices relative to 0.
    pub transfers: Vec<Transfer>,
    /// Initial OOL words: masks, and zeroed capture slots.
    pub ool: Vec<u64>,
    /// Chain duration.
    pub micros: u64,
    /// Pulses compiled.
    pub pulses: usize,
}

/// Compile `pulses`, splitting delays longer than `max_delay` µs.
///
/// # Errors
/// `EmptyWaveform` if `pulses` is empty.
pub fn compile(pulses: &[RawPulse], max_delay: u32) -> GpioResult<ChainPlan> {
    if pulses.is_empty() {
        return Err(GpioError::EmptyWaveform);
    }
    let max_delay = max_delay.max(1);
    let mut plan = ChainPlan {
        pulses: pulses.len(),
        ..ChainPlan::default()
    };

    for p in pulses {
        if p.set != 0 {
            plan.transfers.push(Transfer::Set { ool: plan.ool.len() });
            plan.ool.push(p.set);
        }
        if p.clear != 0 {
            plan.transfers.push(Transfer::Clear { ool: plan.ool.len() });
            plan.ool.push(p.clear);
        }
        if p.flags.contains(WaveFlags::READ) {
            plan.transfers.push(Transfer::ReadLevels { ool: plan.ool.len() });
            plan.ool.push(0);
        }
        if p.flags.contains(WaveFlags::TICK) {
            plan.transfers.push(Transfer::ReadTick { ool: plan.ool.len() });
            plan.ool.push(0);
        }

        let mut remaining = p.delay_micros;
        while remaining > 0 {
            let chunk = remaining.min(max_delay);
            plan.transfers.push(Transfer::Delay { micros: chunk });
            remaining -= chunk;
        }
        plan.micros += u64::from(p.delay_micros);
    }
    Ok(plan)
}
