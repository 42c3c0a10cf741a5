//! Hardware backend trait.
//!
//! The engine reaches the pin bank only through [`GpioBackend`], so the
//! same waveform, sampling and script code runs against a memory-mapped
//! register block or the in-process simulation.
//!
//! # Concurrency
//!
//! Backends are shared between the sampler, the playback engine, the PWM
//! worker, scripts and caller threads. Every method takes `&self` and each
//! `set_levels`/`clear_levels` call must apply its whole mask atomically.

use crate::types::{PinMode, Pull};

/// Factory function type for creating backend instances.
pub type BackendFactory = fn() -> Box<dyn GpioBackend>;

/// Interface to a bank of up to 54 pins.
pub trait GpioBackend: Send + Sync {
    /// Unique backend identifier (e.g. "simulation").
    fn name(&self) -> &'static str;

    /// Backend version string.
    fn version(&self) -> &'static str {
        "0.1.0"
    }

    /// Current levels of pins 0..=53, one bit per pin.
    fn read_levels(&self) -> u64;

    /// Drive every pin in `mask` high.
    fn set_levels(&self, mask: u64);

    /// Drive every pin in `mask` low.
    fn clear_levels(&self, mask: u64);

    /// Current function of `pin`.
    fn mode(&self, pin: u8) -> PinMode;

    /// Select the function of `pin`.
    fn set_mode(&self, pin: u8, mode: PinMode);

    /// Configure the pull resistor of `pin`.
    fn set_pull(&self, pin: u8, pull: Pull);

    /// Release the hardware. Called once by engine shutdown.
    fn shutdown(&self) {}
}
