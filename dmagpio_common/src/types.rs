//! Levels, modes, pulls, edges, wave modes and script status.
//!
//! Raw protocol numbers convert through `TryFrom<u32>`, rejecting unknown
//! values with the matching validation error.

use crate::consts::{MAX_GPIO, MAX_USER_GPIO};
use crate::error::{GpioError, GpioResult};
use std::fmt;

/// Validate a pin in the full 0..=53 range.
pub fn gpio_index(pin: u32) -> GpioResult<u8> {
    if pin > MAX_GPIO {
        return Err(GpioError::BadGpio(pin));
    }
    Ok(pin as u8)
}

/// Validate a pin in the user 0..=31 range.
pub fn user_gpio_index(pin: u32) -> GpioResult<u8> {
    if pin > MAX_USER_GPIO {
        return Err(GpioError::BadUserGpio(pin));
    }
    Ok(pin as u8)
}

/// Bit for `pin` within a 64-bit level vector.
#[inline]
pub const fn pin_bit(pin: u8) -> u64 {
    1u64 << pin
}

// ─── Level ──────────────────────────────────────────────────────────

/// Pin level as reported to alert handlers.
///
/// `Timeout` is only ever synthesised by a watchdog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Level {
    /// Logic low.
    Low = 0,
    /// Logic high.
    High = 1,
    /// No edge within the watchdog window.
    Timeout = 2,
}

impl Level {
    /// Level of bit `pin` in `levels`.
    pub fn from_vector(levels: u64, pin: u8) -> Self {
        Self::from(levels & pin_bit(pin) != 0)
    }

    /// Numeric protocol value.
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// True for `High`.
    pub fn is_high(self) -> bool {
        self == Self::High
    }
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high { Self::High } else { Self::Low }
    }
}

impl TryFrom<u32> for Level {
    type Error = GpioError;

    /// Only 0 and 1 are writable levels.
    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Low),
            1 => Ok(Self::High),
            other => Err(GpioError::BadLevel(other)),
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u32())
    }
}

// ─── Pin mode ───────────────────────────────────────────────────────

/// Pin function select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum PinMode {
    /// Input.
    #[default]
    Input = 0,
    /// Output.
    Output = 1,
    /// Alternate function 5.
    Alt5 = 2,
    /// Alternate function 4.
    Alt4 = 3,
    /// Alternate function 0.
    Alt0 = 4,
    /// Alternate function 1.
    Alt1 = 5,
    /// Alternate function 2.
    Alt2 = 6,
    /// Alternate function 3.
    Alt3 = 7,
}

impl TryFrom<u32> for PinMode {
    type Error = GpioError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Input,
            1 => Self::Output,
            2 => Self::Alt5,
            3 => Self::Alt4,
            4 => Self::Alt0,
            5 => Self::Alt1,
            6 => Self::Alt2,
            7 => Self::Alt3,
            other => return Err(GpioError::BadMode(other)),
        })
    }
}

// ─── Pull ───────────────────────────────────────────────────────────

/// Internal pull resistor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Pull {
    /// No pull.
    #[default]
    Off = 0,
    /// Pull to ground.
    Down = 1,
    /// Pull to supply.
    Up = 2,
}

impl TryFrom<u32> for Pull {
    type Error = GpioError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Off),
            1 => Ok(Self::Down),
            2 => Ok(Self::Up),
            other => Err(GpioError::BadPud(other)),
        }
    }
}

// ─── Edge filter ────────────────────────────────────────────────────

/// Which transitions an alert handler wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Edge {
    /// Low to high.
    Rising,
    /// High to low.
    Falling,
    /// Both.
    #[default]
    Either,
}

impl Edge {
    /// True when a transition to `level` passes this filter.
    pub fn accepts(self, level: Level) -> bool {
        match (self, level) {
            (Self::Either, _) => true,
            (Self::Rising, Level::High) => true,
            (Self::Falling, Level::Low) => true,
            _ => false,
        }
    }
}

// ─── Wave mode ──────────────────────────────────────────────────────

/// Playback mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WaveMode {
    /// Play the chain once.
    OneShot = 0,
    /// Loop the chain until stopped.
    Repeat = 1,
    /// Play once, starting when the current waveform reaches its end.
    OneShotSync = 2,
    /// Loop until stopped, starting when the current waveform reaches its end.
    RepeatSync = 3,
}

impl WaveMode {
    /// True for the looping modes.
    pub fn repeats(self) -> bool {
        matches!(self, Self::Repeat | Self::RepeatSync)
    }

    /// True if the send waits for the current waveform's end.
    pub fn is_sync(self) -> bool {
        matches!(self, Self::OneShotSync | Self::RepeatSync)
    }

    /// The mode with the sync behaviour removed.
    pub fn unsynced(self) -> Self {
        if self.repeats() {
            Self::Repeat
        } else {
            Self::OneShot
        }
    }
}

impl TryFrom<u32> for WaveMode {
    type Error = GpioError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::OneShot),
            1 => Ok(Self::Repeat),
            2 => Ok(Self::OneShotSync),
            3 => Ok(Self::RepeatSync),
            other => Err(GpioError::BadWaveMode(other)),
        }
    }
}

// ─── Script status ──────────────────────────────────────────────────

/// Run state of a stored script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ScriptStatus {
    /// Stored, worker not yet ready.
    Initing = 0,
    /// Idle, runnable.
    Halted = 1,
    /// Executing instructions.
    Running = 2,
    /// Blocked in a delay or edge wait.
    Waiting = 3,
    /// Stopped by a runtime fault.
    Failed = 4,
}

impl ScriptStatus {
    /// True while the script occupies its worker.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Waiting)
    }
}
