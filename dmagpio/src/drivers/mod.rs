//! Backend implementations.
//!
//! - [`simulation`] - In-process pin bank for development and testing
//!
//! # Adding New Backends
//!
//! 1. Create a new submodule under `drivers/`
//! 2. Implement `GpioBackend` from `dmagpio_common::hal`
//! 3. Register its factory in [`register_builtin`]

pub mod simulation;

use crate::backend_registry::BackendRegistry;
use dmagpio_common::error::GpioResult;

/// Register every built-in backend.
pub fn register_builtin(registry: &mut BackendRegistry) -> GpioResult<()> {
    registry.register("simulation", simulation::create_backend)
}
