//! Hardware registry: driver factories and named hardware definitions.
//!
//! The registry is an ordinary value owned by the application context and
//! passed by reference to whatever builds streams. Drivers register a
//! [`SourceFactory`] under their driver type; configuration then defines
//! named hardware against those types, and [`HardwareRegistry::create`]
//! builds a fresh [`HardwareSource`] for a definition on demand.

use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use perfusion_core::{HardwareSource, SourceFactory};
use tracing::debug;

use crate::config::HardwareConfig;

/// Named hardware definitions plus the factories that build them.
#[derive(Default)]
pub struct HardwareRegistry {
    /// Factories by driver type
    factories: HashMap<&'static str, Box<dyn SourceFactory>>,
    /// Hardware definitions by name
    hardware: HashMap<String, HardwareConfig>,
}

impl HardwareRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every simulated driver registered.
    #[cfg(feature = "mock")]
    pub fn with_mock_drivers() -> Self {
        let mut registry = Self::new();
        for factory in perfusion_driver_mock::factories() {
            // Driver types of the mock crate are unique.
            let _ = registry.register_factory(factory);
        }
        registry
    }

    /// Register a driver factory.
    ///
    /// # Errors
    /// Returns error if a factory with the same driver type is registered.
    pub fn register_factory(&mut self, factory: Box<dyn SourceFactory>) -> Result<()> {
        let driver_type = factory.driver_type();
        if self.factories.contains_key(driver_type) {
            return Err(anyhow!("Driver type '{driver_type}' is already registered"));
        }
        debug!(driver_type, name = factory.name(), "Registered driver factory");
        self.factories.insert(driver_type, factory);
        Ok(())
    }

    /// Add a hardware definition after validating it against its driver.
    ///
    /// # Errors
    /// Returns error if:
    /// - The name is already defined
    /// - No factory is registered for the driver type
    /// - The driver rejects the configuration table
    pub fn define(&mut self, config: HardwareConfig) -> Result<()> {
        if self.hardware.contains_key(&config.name) {
            return Err(anyhow!("Hardware '{}' is already defined", config.name));
        }
        let factory = self.factory(&config.driver)?;
        factory.validate(&config.config).with_context(|| {
            format!(
                "Configuration validation failed for hardware '{}' ({})",
                config.name,
                factory.name()
            )
        })?;
        self.hardware.insert(config.name.clone(), config);
        Ok(())
    }

    /// Define every entry of a `[[hardware]]` list.
    pub fn define_all(&mut self, hardware: &[HardwareConfig]) -> Result<()> {
        for config in hardware {
            self.define(config.clone())?;
        }
        Ok(())
    }

    /// Build a new source for the hardware named `name`.
    pub fn create(&self, name: &str) -> Result<Box<dyn HardwareSource>> {
        let config = self
            .hardware
            .get(name)
            .ok_or_else(|| anyhow!("Unknown hardware '{name}'"))?;
        let factory = self.factory(&config.driver)?;
        factory
            .build(&config.name, &config.config)
            .with_context(|| format!("Failed to build hardware '{name}'"))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.hardware.contains_key(name)
    }

    /// Defined hardware names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.hardware.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Registered driver types, sorted.
    pub fn driver_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.factories.keys().copied().collect();
        types.sort_unstable();
        types
    }

    fn factory(&self, driver_type: &str) -> Result<&dyn SourceFactory> {
        self.factories
            .get(driver_type)
            .map(Box::as_ref)
            .ok_or_else(|| {
                anyhow!(
                    "No driver registered for type '{driver_type}' (available: {})",
                    self.driver_types().join(", ")
                )
            })
    }
}

impl std::fmt::Debug for HardwareRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HardwareRegistry")
            .field("driver_types", &self.driver_types())
            .field("hardware", &self.names())
            .finish()
    }
}
