// ABOUTME: Backend selection config for language models.
// ABOUTME: A `type` discriminator plus backend-specific fields passed through to the factory.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Model backend configuration with type discriminator
#[derive(Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Backend type: "openai", "mock"
    #[serde(rename = "type", default = "default_backend_type")]
    pub backend_type: String,

    /// Remaining fields passed to backend factory
    #[serde(flatten)]
    pub config: toml::Table,
}

fn default_backend_type() -> String {
    "openai".to_string()
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            backend_type: default_backend_type(),
            config: toml::Table::new(),
        }
    }
}

// Custom Debug so API keys in the passthrough table never reach the logs
impl std::fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys: Vec<&String> = self.config.keys().collect();
        f.debug_struct("ModelConfig")
            .field("backend_type", &self.backend_type)
            .field("keys", &keys)
            .finish()
    }
}

impl ModelConfig {
    /// Parse configuration from a TOML string
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse model config TOML")
    }

    /// Get backend type name
    pub fn backend_type(&self) -> &str {
        &self.backend_type
    }

    /// Look up a string field in the passthrough table
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(|v| v.as_str())
    }

    /// Set a string field, overriding any value from the file
    pub fn set_str(&mut self, key: &str, value: impl Into<String>) {
        self.config
            .insert(key.to_string(), toml::Value::String(value.into()));
    }

    /// Convert config table to serde_json::Value for registry
    pub fn to_json_value(&self) -> serde_json::Value {
        serde_json::to_value(&self.config).unwrap_or_else(|_| serde_json::json!({}))
    }
}
