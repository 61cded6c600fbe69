//! Vector tier backends
//!
//! An `Embedder` turns text into vectors and a `VectorIndex` stores
//! `{text, metadata}` payloads keyed by id and answers
//! `(embedding, top_k, filter) → matches` queries.

pub mod embedding;
pub mod index;

pub use embedding::{Embedder, HashingEmbedder, OpenAiEmbedder};
pub use index::FileVectorIndex;

use crate::config::{resolve_api_key, EmbeddingConfig, EmbeddingProvider};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// A stored fact or snippet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorEntry {
    pub id: String,
    pub text: String,
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// A search hit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorMatch {
    pub id: String,
    pub text: String,
    pub metadata: HashMap<String, String>,
    pub score: f32,
}

/// Similarity index
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace an entry by id.
    async fn upsert(&self, entry: VectorEntry) -> Result<()>;

    /// Best `top_k` matches whose metadata contains every `filter` pair.
    async fn search(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: &HashMap<String, String>,
    ) -> Result<Vec<VectorMatch>>;

    async fn len(&self) -> usize;
}

/// Cosine similarity; 0 when either vector is zero or lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

/// Build the embedder described by the configuration.
pub fn embedder_from_config(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider {
        EmbeddingProvider::Hashing => Ok(Arc::new(HashingEmbedder::new(config.dimensions))),
        EmbeddingProvider::Openai => {
            let key = resolve_api_key(&config.api_key_env).ok_or_else(|| {
                Error::Config(format!(
                    "Embedding provider 'openai' needs {} to be set",
                    config.api_key_env
                ))
            })?;
            Ok(Arc::new(OpenAiEmbedder::new(config, key)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_embedder_from_config() {
        let config = EmbeddingConfig::default();
        let embedder = embedder_from_config(&config).unwrap();
        assert_eq!(embedder.dimensions(), config.dimensions);

        let openai = EmbeddingConfig {
            provider: EmbeddingProvider::Openai,
            api_key_env: "COGMEM_TEST_EMBED_KEY_NOT_SET".into(),
            ..Default::default()
        };
        assert!(matches!(embedder_from_config(&openai), Err(Error::Config(_))));
    }
}
