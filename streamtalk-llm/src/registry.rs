// ABOUTME: Registry pattern for runtime model backend selection.
// ABOUTME: Backends register factories, streamtalk creates one by name from config.

use crate::traits::SharedModel;
use crate::ModelConfig;
use anyhow::{anyhow, Result};
use serde_json::Value;
use std::collections::HashMap;

/// Factory function that creates a model backend from config
pub type ModelFactory = Box<dyn Fn(&Value) -> Result<SharedModel> + Send + Sync>;

/// Registry for runtime backend selection
pub struct ModelRegistry {
    factories: HashMap<String, ModelFactory>,
}

impl ModelRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a backend factory by name
    pub fn register<F>(mut self, name: &str, factory: F) -> Self
    where
        F: Fn(&Value) -> Result<SharedModel> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Box::new(factory));
        self
    }

    /// Create a backend by name with the given config
    pub fn create(&self, name: &str, config: &Value) -> Result<SharedModel> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| anyhow!("Unknown model backend: {}", name))?;
        factory(config)
    }

    /// List available backend names, sorted
    pub fn available(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Create a backend from a ModelConfig
    pub fn create_from_config(&self, config: &ModelConfig) -> Result<SharedModel> {
        let json_config = config.to_json_value();
        tracing::debug!(backend = %config.backend_type(), "Creating model backend");
        self.create(config.backend_type(), &json_config)
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        use crate::backends::mock::MockModel;
        use crate::backends::openai::OpenAiModel;

        Self::new()
            .register("mock", MockModel::factory())
            .register("openai", OpenAiModel::factory())
    }
}
