//! Backend registry.
//!
//! Names map to factories; `Gpio::initialise` asks for the backend named
//! in the configuration and owns the result for the engine's lifetime.
//! The registry is a plain value, so tests can build one with their own
//! backends.

use dmagpio_common::error::{GpioError, GpioResult};
use dmagpio_common::hal::{BackendFactory, GpioBackend};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Registry of available backends, ordered by name.
#[derive(Default)]
pub struct BackendRegistry {
    factories: BTreeMap<&'static str, BackendFactory>,
}

impl BackendRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in backend.
    pub fn with_builtin() -> GpioResult<Self> {
        let mut registry = Self::new();
        crate::drivers::register_builtin(&mut registry)?;
        Ok(registry)
    }

    /// Add `factory` under `name`.
    ///
    /// # Errors
    /// `InitFailed` if `name` is taken.
    pub fn register(&mut self, name: &'static str, factory: BackendFactory) -> GpioResult<()> {
        if self.factories.contains_key(name) {
            return Err(GpioError::InitFailed(format!(
                "backend '{name}' registered twice"
            )));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// True if a backend is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Instantiate the backend registered under `name`.
    ///
    /// # Errors
    /// `BackendNotFound` if nothing is registered under `name`.
    pub fn create(&self, name: &str) -> GpioResult<Arc<dyn GpioBackend>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| GpioError::BackendNotFound(name.to_string()))?;
        let backend: Arc<dyn GpioBackend> = Arc::from(factory());
        debug!("Created backend '{}' v{}", backend.name(), backend.version());
        Ok(backend)
    }

    /// Registered names in order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.factories.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dmagpio_common::types::{PinMode, Pull};

    /// Pins that read low and ignore writes.
    struct FloatingBank;

    impl GpioBackend for FloatingBank {
        fn name(&self) -> &'static str {
            "floating"
        }

        fn read_levels(&self) -> u64 {
            0
        }

        fn set_levels(&self, _mask: u64) {}

        fn clear_levels(&self, _mask: u64) {}

        fn mode(&self, _pin: u8) -> PinMode {
            PinMode::Input
        }

        fn set_mode(&self, _pin: u8, _mode: PinMode) {}

        fn set_pull(&self, _pin: u8, _pull: Pull) {}
    }

    fn floating() -> Box<dyn GpioBackend> {
        Box::new(FloatingBank)
    }

    #[test]
    fn custom_backend_is_created_by_name() {
        let mut reg = BackendRegistry::new();
        reg.register("floating", floating).unwrap();
        assert!(reg.contains("floating"));

        let backend = reg.create("floating").unwrap();
        assert_eq!(backend.name(), "floating");
        assert_eq!(backend.read_levels(), 0);
    }

    #[test]
    fn unknown_name_is_backend_not_found() {
        let reg = BackendRegistry::new();
        assert_eq!(
            reg.create("gpiomem").err(),
            Some(GpioError::BackendNotFound("gpiomem".into()))
        );
    }

    #[test]
    fn builtin_registry_lists_simulation() {
        let mut reg = BackendRegistry::with_builtin().unwrap();
        reg.register("floating", floating).unwrap();
        assert_eq!(reg.names().collect::<Vec<_>>(), vec!["floating", "simulation"]);
        assert_eq!(reg.create("simulation").unwrap().name(), "simulation");
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let mut reg = BackendRegistry::with_builtin().unwrap();
        assert!(matches!(
            reg.register("simulation", floating),
            Err(GpioError::InitFailed(_))
        ));
    }
}
