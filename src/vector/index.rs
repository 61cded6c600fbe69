//! In-process vector index with file-based JSON persistence
//!
//! Directory layout:
//! ```text
//! <data_dir>/vectors/
//! ├── <entry-id>.json
//! └── ...
//! ```
//!
//! Entries are held in memory and searched by brute-force cosine similarity.
//! Each upsert writes its entry to disk in the background; all files are
//! loaded back on start.

use super::{cosine_similarity, VectorEntry, VectorIndex, VectorMatch};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

pub struct FileVectorIndex {
    dir: Option<PathBuf>,
    dimensions: usize,
    entries: RwLock<HashMap<String, VectorEntry>>,
}

impl FileVectorIndex {
    /// Open the index at `dir`, loading any persisted entries.
    pub async fn open(dir: PathBuf, dimensions: usize) -> Result<Self> {
        tokio::fs::create_dir_all(&dir).await?;
        let loaded = load_entries(&dir, dimensions);
        tracing::info!(entries = loaded.len(), "Loaded vector index from {}", dir.display());
        Ok(Self {
            dir: Some(dir),
            dimensions,
            entries: RwLock::new(loaded),
        })
    }

    /// Index without persistence
    pub fn in_memory(dimensions: usize) -> Self {
        Self {
            dir: None,
            dimensions,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Persist an entry to disk (fire-and-forget)
    fn persist_entry(&self, entry: &VectorEntry) {
        let Some(dir) = self.dir.clone() else {
            return;
        };
        let entry = entry.clone();
        tokio::spawn(async move {
            let path = dir.join(format!("{}.json", entry.id));
            match serde_json::to_string(&entry) {
                Ok(json) => {
                    if let Err(e) = tokio::fs::write(&path, json).await {
                        tracing::warn!("Failed to persist vector entry {}: {}", entry.id, e);
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to serialize vector entry {}: {}", entry.id, e);
                }
            }
        });
    }
}

fn load_entries(dir: &Path, dimensions: usize) -> HashMap<String, VectorEntry> {
    let mut entries = HashMap::new();
    let read = match std::fs::read_dir(dir) {
        Ok(read) => read,
        Err(e) => {
            tracing::warn!("Failed to read directory {}: {}", dir.display(), e);
            return entries;
        }
    };
    for file in read.flatten() {
        let path = file.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let parsed = std::fs::read_to_string(&path)
            .map_err(Error::from)
            .and_then(|s| serde_json::from_str::<VectorEntry>(&s).map_err(Error::from));
        match parsed {
            Ok(entry) if entry.embedding.len() == dimensions => {
                entries.insert(entry.id.clone(), entry);
            }
            Ok(entry) => {
                tracing::warn!(
                    "Skipping vector entry {} with {} dimensions (index uses {})",
                    entry.id,
                    entry.embedding.len(),
                    dimensions
                );
            }
            Err(e) => tracing::warn!("Failed to load {}: {}", path.display(), e),
        }
    }
    entries
}

#[async_trait]
impl VectorIndex for FileVectorIndex {
    async fn upsert(&self, entry: VectorEntry) -> Result<()> {
        if entry.embedding.len() != self.dimensions {
            return Err(Error::Validation(format!(
                "Embedding has {} dimensions, index expects {}",
                entry.embedding.len(),
                self.dimensions
            )));
        }
        self.persist_entry(&entry);
        self.entries.write().await.insert(entry.id.clone(), entry);
        Ok(())
    }

    async fn search(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: &HashMap<String, String>,
    ) -> Result<Vec<VectorMatch>> {
        let entries = self.entries.read().await;
        let mut matches: Vec<VectorMatch> = entries
            .values()
            .filter(|e| {
                filter
                    .iter()
                    .all(|(k, v)| e.metadata.get(k).map(|m| m == v).unwrap_or(false))
            })
            .map(|e| VectorMatch {
                id: e.id.clone(),
                text: e.text.clone(),
                metadata: e.metadata.clone(),
                score: cosine_similarity(embedding, &e.embedding),
            })
            .filter(|m| m.score > 0.0)
            .collect();
        matches.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}
