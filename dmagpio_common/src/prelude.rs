//! Prelude module for common re-exports.
//!
//! ```rust
//! use dmagpio_common::prelude::*;
//! ```

// ─── Logging ────────────────────────────────────────────────────────
pub use crate::config::LogLevel;

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{
    BackendConfig, ConfigError, ConfigLoader, GpioConfig, NotifyConfig, SamplingConfig,
    SharedConfig, WaveConfig,
};

// ─── Errors ─────────────────────────────────────────────────────────
pub use crate::error::{GpioError, GpioResult};

// ─── Records ────────────────────────────────────────────────────────
pub use crate::pulse::{Pulse, RawPulse, WaveFlags};
pub use crate::report::{Report, ReportFlags, Sample};
pub use crate::types::{Edge, Level, PinMode, Pull, ScriptStatus, WaveMode};

// ─── Hardware ───────────────────────────────────────────────────────
pub use crate::hal::{BackendFactory, GpioBackend};

// ─── Ticks ──────────────────────────────────────────────────────────
pub use crate::tick::{tick_add, tick_diff, tick_reached};
