//! Generative model adapter
//!
//! The model is consumed as an opaque `(prompt, output schema) → JSON`
//! service. `OpenAiModel` talks to any OpenAI-compatible chat-completions
//! endpoint; `UnconfiguredModel` stands in when no API key is available and
//! fails every call with an upstream error.

mod openai;

pub use openai::OpenAiModel;

use crate::config::{resolve_api_key, ModelConfig};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// One structured-output request
#[derive(Debug, Clone)]
pub struct JsonRequest {
    pub system: String,
    pub prompt: String,
    /// Identifier for the schema, e.g. `"memory_extraction"`
    pub schema_name: String,
    /// JSON Schema the response must satisfy
    pub schema: serde_json::Value,
}

/// Text/JSON completion service
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    /// Model identifier recorded in pipeline traces
    fn name(&self) -> &str;

    /// Complete `request` and return the parsed JSON object.
    async fn complete_json(&self, request: &JsonRequest) -> Result<serde_json::Value>;
}

/// Model used when no credentials are configured
pub struct UnconfiguredModel {
    name: String,
}

impl UnconfiguredModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl GenerativeModel for UnconfiguredModel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete_json(&self, _request: &JsonRequest) -> Result<serde_json::Value> {
        Err(Error::Upstream("missing credentials".to_string()))
    }
}

/// Build the model described by the configuration.
pub fn model_from_config(config: &ModelConfig) -> Result<Arc<dyn GenerativeModel>> {
    match resolve_api_key(&config.api_key_env) {
        Some(key) => Ok(Arc::new(OpenAiModel::new(config, key)?)),
        None => {
            tracing::warn!(
                "{} is not set; memory extraction and link prediction will fail",
                config.api_key_env
            );
            Ok(Arc::new(UnconfiguredModel::new(&config.model)))
        }
    }
}
