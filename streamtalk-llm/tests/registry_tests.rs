// ABOUTME: Tests for the ModelRegistry and ModelFactory pattern.
// ABOUTME: Validates runtime backend selection and creation from config.

use serde_json::json;
use std::sync::Arc;
use streamtalk_llm::backends::mock::MockModel;
use streamtalk_llm::{LanguageModel, ModelConfig, ModelFactory, ModelRegistry};

#[test]
fn test_registry_creates_mock_backend() {
    let registry = ModelRegistry::default();
    let model = registry.create("mock", &json!({})).unwrap();
    assert_eq!(model.name(), "mock");
}

#[test]
fn test_registry_creates_openai_backend_with_explicit_key() {
    let registry = ModelRegistry::default();
    let config = json!({
        "api_key": "test-key",
        "base_url": "http://127.0.0.1:9/v1",
        "model": "llama-3.3-70b-versatile"
    });
    let model = registry.create("openai", &config).unwrap();
    assert_eq!(model.name(), "openai");
}

#[test]
fn test_registry_lists_available_backends() {
    let registry = ModelRegistry::default();
    assert_eq!(registry.available(), vec!["mock", "openai"]);
}

#[test]
fn test_registry_unknown_backend_errors() {
    let registry = ModelRegistry::default();
    match registry.create("nonexistent", &json!({})) {
        Err(err) => assert!(err
            .to_string()
            .contains("Unknown model backend: nonexistent")),
        Ok(_) => panic!("Expected error for unknown backend"),
    }
}

#[test]
fn test_registry_create_from_config() {
    let config = ModelConfig::parse("type = \"mock\"").unwrap();
    let model = ModelRegistry::default()
        .create_from_config(&config)
        .unwrap();
    assert_eq!(model.name(), "mock");
}

#[test]
fn test_registry_custom_factory() {
    let factory: ModelFactory = Box::new(|_config| Ok(Arc::new(MockModel::new())));
    let registry = ModelRegistry::new().register("scripted", factory);
    assert!(registry.create("scripted", &json!({})).is_ok());
    assert_eq!(registry.available(), vec!["scripted"]);
}
