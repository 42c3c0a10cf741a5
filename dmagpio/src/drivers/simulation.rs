//! In-process pin bank.
//!
//! Output pins read back their latch; every other pin reads the level an
//! external circuit drives onto it. Tests inject external edges with
//! [`SimulationBackend::drive`], and [`SimulationBackend::link`] wires an
//! output to an input so generated waveforms can be observed as input
//! edges.

use dmagpio_common::consts::GPIO_COUNT;
use dmagpio_common::hal::GpioBackend;
use dmagpio_common::types::{PinMode, Pull, pin_bit};
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use tracing::trace;

const NO_LINK: u8 = u8::MAX;

/// Simulated 54-pin bank.
#[derive(Debug)]
pub struct SimulationBackend {
    /// Output latch.
    latch: AtomicU64,
    /// Externally driven levels.
    external: AtomicU64,
    /// Pins configured as outputs.
    outputs: AtomicU64,
    /// Pins whose level mirrors another pin's latch.
    linked: AtomicU64,
    links: [AtomicU8; GPIO_COUNT],
    modes: [AtomicU8; GPIO_COUNT],
}

impl SimulationBackend {
    /// Create a bank with every pin an input at level low.
    pub fn new() -> Self {
        Self {
            latch: AtomicU64::new(0),
            external: AtomicU64::new(0),
            outputs: AtomicU64::new(0),
            linked: AtomicU64::new(0),
            links: std::array::from_fn(|_| AtomicU8::new(NO_LINK)),
            modes: std::array::from_fn(|_| AtomicU8::new(PinMode::Input as u8)),
        }
    }

    /// Drive `pin` externally.
    pub fn drive(&self, pin: u8, high: bool) {
        trace!("sim drive pin {} -> {}", pin, high);
        if high {
            self.external.fetch_or(pin_bit(pin), Ordering::AcqRel);
        } else {
            self.external.fetch_and(!pin_bit(pin), Ordering::AcqRel);
        }
    }

    /// Drive every pin in `mask` externally to the matching bit of `levels`.
    pub fn drive_mask(&self, mask: u64, levels: u64) {
        let _ = self
            .external
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                Some((cur & !mask) | (levels & mask))
            });
    }

    /// Make input `to` follow the latch of `from`.
    pub fn link(&self, from: u8, to: u8) {
        self.links[usize::from(to)].store(from, Ordering::Release);
        self.linked.fetch_or(pin_bit(to), Ordering::AcqRel);
    }

    /// Remove a link created by [`link`](Self::link).
    pub fn unlink(&self, to: u8) {
        self.linked.fetch_and(!pin_bit(to), Ordering::AcqRel);
        self.links[usize::from(to)].store(NO_LINK, Ordering::Release);
    }

    /// Output latch, regardless of pin modes.
    pub fn latch(&self) -> u64 {
        self.latch.load(Ordering::Acquire)
    }
}

impl Default for SimulationBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl GpioBackend for SimulationBackend {
    fn name(&self) -> &'static str {
        "simulation"
    }

    fn read_levels(&self) -> u64 {
        let latch = self.latch.load(Ordering::Acquire);
        let outputs = self.outputs.load(Ordering::Acquire);
        let mut levels = (latch & outputs) | (self.external.load(Ordering::Acquire) & !outputs);

        let mut linked = self.linked.load(Ordering::Acquire) & !outputs;
        while linked != 0 {
            let to = linked.trailing_zeros() as u8;
            linked &= linked - 1;
            let from = self.links[usize::from(to)].load(Ordering::Acquire);
            if from == NO_LINK {
                continue;
            }
            if latch & pin_bit(from) != 0 {
                levels |= pin_bit(to);
            } else {
                levels &= !pin_bit(to);
            }
        }
        levels
    }

    fn set_levels(&self, mask: u64) {
        self.latch.fetch_or(mask, Ordering::AcqRel);
    }

    fn clear_levels(&self, mask: u64) {
        self.latch.fetch_and(!mask, Ordering::AcqRel);
    }

    fn mode(&self, pin: u8) -> PinMode {
        let raw = self.modes[usize::from(pin)].load(Ordering::Acquire);
        PinMode::try_from(u32::from(raw)).unwrap_or_default()
    }

    fn set_mode(&self, pin: u8, mode: PinMode) {
        self.modes[usize::from(pin)].store(mode as u8, Ordering::Release);
        if mode == PinMode::Output {
            self.outputs.fetch_or(pin_bit(pin), Ordering::AcqRel);
        } else {
            self.outputs.fetch_and(!pin_bit(pin), Ordering::AcqRel);
        }
    }

    fn set_pull(&self, pin: u8, pull: Pull) {
        match pull {
            Pull::Up => self.drive(pin, true),
            Pull::Down => self.drive(pin, false),
            Pull::Off => {}
        }
    }
}

/// Factory registered under "simulation".
pub fn create_backend() -> Box<dyn GpioBackend> {
    Box::new(SimulationBackend::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outputs_read_latch_inputs_read_external() {
        let sim = SimulationBackend::new();
        sim.set_mode(4, PinMode::Output);
        sim.set_levels(pin_bit(4) | pin_bit(5));
        sim.drive(6, true);
        let levels = sim.read_levels();
        assert_ne!(levels & pin_bit(4), 0);
        assert_eq!(levels & pin_bit(5), 0, "pin 5 is an input");
        assert_ne!(levels & pin_bit(6), 0);
        assert_ne!(sim.latch() & pin_bit(5), 0);
    }

    #[test]
    fn pull_sets_undriven_level() {
        let sim = SimulationBackend::new();
        sim.set_pull(17, Pull::Up);
        assert_ne!(sim.read_levels() & pin_bit(17), 0);
        sim.set_pull(17, Pull::Down);
        assert_eq!(sim.read_levels() & pin_bit(17), 0);
    }

    #[test]
    fn link_mirrors_output_latch() {
        let sim = SimulationBackend::new();
        sim.set_mode(4, PinMode::Output);
        sim.link(4, 5);
        sim.set_levels(pin_bit(4));
        assert_ne!(sim.read_levels() & pin_bit(5), 0);
        sim.clear_levels(pin_bit(4));
        assert_eq!(sim.read_levels() & pin_bit(5), 0);
        sim.unlink(5);
        sim.set_levels(pin_bit(4));
        assert_eq!(sim.read_levels() & pin_bit(5), 0);
    }

    #[test]
    fn modes_round_trip() {
        let sim = SimulationBackend::new();
        assert_eq!(sim.mode(10), PinMode::Input);
        sim.set_mode(10, PinMode::Alt3);
        assert_eq!(sim.mode(10), PinMode::Alt3);
    }

    #[test]
    fn drive_mask_updates_only_masked_pins() {
        let sim = SimulationBackend::new();
        sim.drive(1, true);
        sim.drive_mask(0b1100, 0b0100);
        assert_eq!(sim.read_levels() & 0b1110, 0b0110);
    }
}
