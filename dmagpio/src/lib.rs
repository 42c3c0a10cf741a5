//! # dmagpio Library
//!
//! Software-timed GPIO engine: microsecond waveforms, continuous edge
//! sampling with callbacks and notification streams, software PWM and
//! servo pulses, timers and an embedded script interpreter.
//!
//! Hardware access goes through the `GpioBackend` trait defined in
//! `dmagpio_common::hal`; backends are created by name from the
//! [`backend_registry`].
//!
//! # Module Structure
//!
//! - [`core`] - `Gpio` facade owning every subsystem
//! - [`backend_registry`] - Backend factory registration
//! - [`drivers`] - Backend implementations (simulation)
//! - [`clock`] - Microsecond tick source and precise sleeping
//! - [`task`] - Supervised threads with stop tokens
//! - [`rt`] - SCHED_FIFO promotion
//! - [`pins`] - Modes, levels, banks and trigger pulses
//! - [`pwm`] - Software PWM and servo pulses
//! - [`wave`] - Pulse pool, chain compiler, waveform store and playback
//! - [`sampler`] - Level sampling into a ring buffer
//! - [`dispatch`] - Edge detection, callbacks, watchdogs, notifications
//! - [`timer`] - Periodic timer callbacks
//! - [`script`] - Script parser, interpreter and registry
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        Gpio (core)                               │
//! │  ┌──────────┐  ┌──────────┐  ┌──────────┐  ┌──────────────────┐  │
//! │  │  PinIo   │  │   PWM    │  │  Timers  │  │  Script Registry │  │
//! │  └────┬─────┘  └────┬─────┘  └──────────┘  └────────┬─────────┘  │
//! │       │             │                               │            │
//! │  ┌────┴─────────────┴──────┐    ┌──────────────┐    │            │
//! │  │ WaveEngine (playback)   │    │  Dispatch    │◄───┘            │
//! │  └────────────┬────────────┘    │  + Notify    │                 │
//! │               │                 └──────▲───────┘                 │
//! │               │                        │ SampleRing              │
//! │               ▼                 ┌──────┴───────┐                 │
//! │       ┌───────────────┐◄────────┤   Sampler    │                 │
//! │       │  GpioBackend  │         └──────────────┘                 │
//! │       │  (trait)      │                                          │
//! │       └───────────────┘                                          │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

#![deny(warnings)]
#![deny(missing_docs)]

pub mod backend_registry;
pub mod clock;
pub mod core;
pub mod dispatch;
pub mod drivers;
pub mod pins;
pub mod pwm;
pub mod rt;
pub mod sampler;
pub mod script;
pub mod task;
pub mod timer;
pub mod wave;

// Re-export key types for convenience
pub use crate::backend_registry::BackendRegistry;
pub use crate::core::Gpio;
pub use crate::dispatch::{AlertHandler, NotifyReader, SamplesHandler, TimerHandler};
pub use crate::task::{StopToken, TaskHandle};
