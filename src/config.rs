//! Cogmem configuration management

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main Cogmem configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CogmemConfig {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Generative model configuration
    #[serde(default)]
    pub model: ModelConfig,

    /// Embedding configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Context assembly configuration
    #[serde(default)]
    pub context: ContextConfig,

    /// Background extraction configuration
    #[serde(default)]
    pub extraction: ExtractionConfig,

    /// Graph consistency configuration
    #[serde(default)]
    pub graph: GraphConfig,

    /// Link prediction configuration
    #[serde(default)]
    pub link_prediction: LinkPredictionConfig,
}

impl CogmemConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Allowed CORS origins (empty = any)
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 18800,
            cors_origins: Vec::new(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Base directory for the database and vector snapshots
    pub data_dir: PathBuf,
}

impl StorageConfig {
    /// Path of the SQLite database file
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("cogmem.db")
    }

    /// Directory holding persisted vector entries
    pub fn vectors_dir(&self) -> PathBuf {
        self.data_dir.join("vectors")
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: dirs_next::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("cogmem"),
        }
    }
}

/// Generative model configuration (OpenAI-compatible chat completions)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// API base URL
    pub base_url: String,

    /// Model identifier
    pub model: String,

    /// Environment variable holding the API key
    pub api_key_env: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 60,
        }
    }
}

/// Embedding provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProvider {
    /// Local feature-hashing embedder (no network)
    #[default]
    Hashing,

    /// OpenAI-compatible `/embeddings` endpoint
    Openai,
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Which embedder to use
    pub provider: EmbeddingProvider,

    /// Remote model identifier (openai provider only)
    pub model: String,

    /// Vector dimensions
    pub dimensions: usize,

    /// API base URL (openai provider only)
    pub base_url: String,

    /// Environment variable holding the API key (openai provider only)
    pub api_key_env: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Hashing,
            model: "text-embedding-3-small".to_string(),
            dimensions: 256,
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
        }
    }
}

/// Context assembly configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Number of recent turns pulled from the episodic tier
    pub episodic_turns: usize,

    /// Number of semantic matches requested from the vector tier
    pub semantic_top_k: usize,

    /// Character budget for the composed context
    pub max_chars: usize,

    /// Per-tier timeout in milliseconds
    pub tier_timeout_ms: u64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            episodic_turns: 10,
            semantic_top_k: 5,
            max_chars: 8000,
            tier_timeout_ms: 5000,
        }
    }
}

/// Background extraction queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Number of worker tasks consuming the job channel
    pub workers: usize,

    /// Bounded job channel capacity
    pub queue_capacity: usize,

    /// Attempts per job before the run is marked failed
    pub max_attempts: u32,

    /// Delay between attempts, multiplied by the attempt number
    pub retry_backoff_ms: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_capacity: 256,
            max_attempts: 3,
            retry_backoff_ms: 500,
        }
    }
}

/// Graph consistency configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Minimum name similarity for a duplicate candidate (exclusive)
    pub duplicate_threshold: f64,

    /// Maximum number of duplicate candidates returned
    pub duplicate_limit: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            duplicate_threshold: 0.4,
            duplicate_limit: 20,
        }
    }
}

/// Link prediction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkPredictionConfig {
    /// Number of most recent messages scanned
    pub window: usize,

    /// Minimum number of messages a pair must co-occur in
    pub min_cooccurrence: usize,
}

impl Default for LinkPredictionConfig {
    fn default() -> Self {
        Self {
            window: 10,
            min_cooccurrence: 2,
        }
    }
}

/// Resolve an API key from the named environment variable.
///
/// Tries the exact name first, then its UPPER_CASE form.
pub fn resolve_api_key(env_name: &str) -> Option<String> {
    std::env::var(env_name)
        .or_else(|_| std::env::var(env_name.to_uppercase()))
        .ok()
        .filter(|k| !k.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CogmemConfig::default();
        assert_eq!(config.server.port, 18800);
        assert_eq!(config.context.episodic_turns, 10);
        assert!((config.graph.duplicate_threshold - 0.4).abs() < f64::EPSILON);
        assert_eq!(config.link_prediction.window, 10);
        assert_eq!(config.embedding.provider, EmbeddingProvider::Hashing);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: CogmemConfig = toml::from_str(
            r#"
            [server]
            port = 9000

            [extraction]
            workers = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.extraction.workers, 4);
        assert_eq!(config.extraction.max_attempts, 3);
        assert_eq!(config.context.max_chars, 8000);
    }

    #[test]
    fn test_embedding_provider_serialize() {
        let config: EmbeddingConfig = toml::from_str("provider = \"openai\"").unwrap();
        assert_eq!(config.provider, EmbeddingProvider::Openai);
        assert_eq!(config.dimensions, 256);
    }

    #[test]
    fn test_storage_paths() {
        let storage = StorageConfig {
            data_dir: PathBuf::from("/tmp/cogmem"),
        };
        assert_eq!(storage.database_path(), PathBuf::from("/tmp/cogmem/cogmem.db"));
        assert_eq!(storage.vectors_dir(), PathBuf::from("/tmp/cogmem/vectors"));
    }

    #[test]
    fn test_default_config_round_trips_through_toml() {
        let text = toml::to_string_pretty(&CogmemConfig::default()).unwrap();
        let parsed: CogmemConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.server.port, 18800);
        assert_eq!(parsed.model.model, "gpt-4o-mini");
    }

    #[test]
    fn test_load_missing_file() {
        let result = CogmemConfig::load(Path::new("/nonexistent/cogmem.toml"));
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
