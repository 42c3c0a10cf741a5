//! Script subsystem.
//!
//! - [`parse`] - text to validated [`Program`]
//! - [`vm`] - the [`Machine`] and the [`ScriptHost`] services it calls
//! - [`registry`] - stored scripts, their workers and run states

pub mod parse;
pub mod registry;
pub mod vm;

pub use parse::{Instr, Operand, Program};
pub use registry::ScriptRegistry;
pub use vm::{Command, Flow, Machine, ScriptHost};
