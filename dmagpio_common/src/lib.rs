//! dmagpio Common Library
//!
//! Shared vocabulary for the dmagpio workspace: limits, error codes,
//! configuration, pin/level enums, pulse and report records and the
//! hardware backend trait.
//!
//! # Module Structure
//!
//! - [`consts`] - Pin ranges and global limits
//! - [`error`] - `GpioError` taxonomy with protocol error codes
//! - [`config`] - Configuration loading traits and types
//! - [`types`] - Levels, modes, pulls, edges, wave modes, script status
//! - [`pulse`] - Waveform pulse records and flags
//! - [`report`] - Samples and 12-byte notification reports
//! - [`tick`] - Wrapping 32-bit microsecond tick arithmetic
//! - [`hal`] - `GpioBackend` trait implemented by hardware backends
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use dmagpio_common::prelude::*;
//!
//! let pulse = Pulse::new(1 << 4, 0, 100);
//! assert_eq!(pulse.delay_micros, 100);
//! ```

pub mod config;
pub mod consts;
pub mod error;
pub mod hal;
pub mod prelude;
pub mod pulse;
pub mod report;
pub mod tick;
pub mod types;
