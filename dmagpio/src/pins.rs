//! Direct pin access.
//!
//! Every write through here goes to the backend as a single masked
//! set/clear, so it serializes with playback and PWM edges at the backend.
//! A direct write or mode change cancels PWM/servo on that pin first.

use crate::clock;
use crate::pwm::PwmEngine;
use dmagpio_common::consts::{BANK2_MASK, MAX_TRIGGER_PULSE};
use dmagpio_common::error::{GpioError, GpioResult};
use dmagpio_common::hal::GpioBackend;
use dmagpio_common::types::{Level, PinMode, Pull, gpio_index, pin_bit, user_gpio_index};
use std::sync::Arc;
use tracing::trace;

/// Mode, level and bank operations on the backend.
pub struct PinIo {
    backend: Arc<dyn GpioBackend>,
    pwm: Arc<PwmEngine>,
}

impl PinIo {
    /// Wrap `backend`; `pwm` is cancelled on direct writes.
    pub fn new(backend: Arc<dyn GpioBackend>, pwm: Arc<PwmEngine>) -> Self {
        Self { backend, pwm }
    }

    /// Select the function of `pin`.
    ///
    /// # Errors
    /// `BadGpio`.
    pub fn set_mode(&self, pin: u32, mode: PinMode) -> GpioResult<()> {
        let index = gpio_index(pin)?;
        if mode != PinMode::Output {
            self.pwm.cancel(index);
        }
        self.backend.set_mode(index, mode);
        trace!("pin {} mode {:?}", index, mode);
        Ok(())
    }

    /// Function of `pin`.
    ///
    /// # Errors
    /// `BadGpio`.
    pub fn mode(&self, pin: u32) -> GpioResult<PinMode> {
        Ok(self.backend.mode(gpio_index(pin)?))
    }

    /// Configure the pull resistor of `pin`.
    ///
    /// # Errors
    /// `BadGpio`.
    pub fn set_pull(&self, pin: u32, pull: Pull) -> GpioResult<()> {
        self.backend.set_pull(gpio_index(pin)?, pull);
        Ok(())
    }

    /// Level of `pin`.
    ///
    /// # Errors
    /// `BadGpio`.
    pub fn read(&self, pin: u32) -> GpioResult<Level> {
        let index = gpio_index(pin)?;
        Ok(Level::from_vector(self.backend.read_levels(), index))
    }

    /// Drive `pin` to `level` (0 or 1), making it an output if needed.
    ///
    /// # Errors
    /// `BadGpio` or `BadLevel`.
    pub fn write(&self, pin: u32, level: u32) -> GpioResult<()> {
        let index = gpio_index(pin)?;
        let level = Level::try_from(level)?;
        self.pwm.cancel(index);
        if self.backend.mode(index) != PinMode::Output {
            self.backend.set_mode(index, PinMode::Output);
        }
        self.drive(index, level.is_high());
        Ok(())
    }

    fn drive(&self, pin: u8, high: bool) {
        if high {
            self.backend.set_levels(pin_bit(pin));
        } else {
            self.backend.clear_levels(pin_bit(pin));
        }
    }

    /// Levels of pins 0..=31.
    pub fn read_bank1(&self) -> u32 {
        self.backend.read_levels() as u32
    }

    /// Levels of pins 32..=53.
    pub fn read_bank2(&self) -> u32 {
        (self.backend.read_levels() >> 32) as u32 & BANK2_MASK
    }

    /// Drive the pins of `bits` (0..=31) high.
    pub fn set_bank1(&self, bits: u32) {
        self.backend.set_levels(u64::from(bits));
    }

    /// Drive the pins of `bits` (0..=31) low.
    pub fn clear_bank1(&self, bits: u32) {
        self.backend.clear_levels(u64::from(bits));
    }

    /// Drive the pins of `bits` (32..=53) high.
    pub fn set_bank2(&self, bits: u32) {
        self.backend.set_levels(u64::from(bits & BANK2_MASK) << 32);
    }

    /// Drive the pins of `bits` (32..=53) low.
    pub fn clear_bank2(&self, bits: u32) {
        self.backend.clear_levels(u64::from(bits & BANK2_MASK) << 32);
    }

    /// Drive `level` on `pin` for `pulse_len` µs, then the opposite level.
    ///
    /// # Errors
    /// `BadUserGpio`, `BadLevel` or `BadPulseLen` (1..=50).
    pub fn trigger(&self, pin: u32, pulse_len: u32, level: u32) -> GpioResult<()> {
        let index = user_gpio_index(pin)?;
        let level = Level::try_from(level)?;
        if pulse_len == 0 || pulse_len > MAX_TRIGGER_PULSE {
            return Err(GpioError::BadPulseLen(pulse_len));
        }
        self.pwm.cancel(index);
        self.drive(index, level.is_high());
        clock::delay_micros(pulse_len);
        self.drive(index, !level.is_high());
        Ok(())
    }
}
