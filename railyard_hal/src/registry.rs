//! Driver registry.
//!
//! Maps hardware-type tags to driver factories. Constructed at
//! startup and populated via `register()`; no global state, so tests
//! can build isolated registries.

use std::collections::HashMap;
use std::sync::Arc;

use crate::driver::{ControlEventSink, HalError, RailDriver};
use crate::drivers;
use crate::params::{HardwareParams, HardwareType};

/// Factory function type for creating driver instances.
pub type DriverFactory =
    fn(&HardwareParams, Arc<dyn ControlEventSink>) -> Result<Box<dyn RailDriver>, HalError>;

pub struct DriverRegistry {
    factories: HashMap<HardwareType, DriverFactory>,
}

impl DriverRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with every built-in driver registered.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(HardwareType::Simulation, drivers::simulation::create);
        registry.register(HardwareType::Cs2Tcp, drivers::cs2::create);
        registry
    }

    /// Register a driver factory.
    ///
    /// # Panics
    /// Panics if the hardware type is already registered.
    pub fn register(&mut self, hardware_type: HardwareType, factory: DriverFactory) {
        if self.factories.contains_key(&hardware_type) {
            panic!("driver '{}' is already registered", hardware_type.tag());
        }
        self.factories.insert(hardware_type, factory);
    }

    /// Construct a driver for the given hardware parameters.
    ///
    /// # Errors
    /// Returns `HalError::DriverNotFound` for unregistered types and
    /// forwards factory failures.
    pub fn create_driver(
        &self,
        params: &HardwareParams,
        sink: Arc<dyn ControlEventSink>,
    ) -> Result<Box<dyn RailDriver>, HalError> {
        let factory = self
            .factories
            .get(&params.hardware_type)
            .ok_or_else(|| HalError::DriverNotFound(params.hardware_type.tag().to_string()))?;
        factory(params, sink)
    }

    pub fn list_types(&self) -> Vec<HardwareType> {
        self.factories.keys().copied().collect()
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
