//! Semantic tier: vector similarity over stored facts
//!
//! Facts are independent entries with no deduplication; the same sentence
//! stored twice is two entries.

use super::{MemoryTier, TierKind, TierQuery};
use crate::error::Result;
use crate::graph::types::{namespace_key, NamespaceId};
use crate::vector::{Embedder, VectorEntry, VectorIndex};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

pub struct SemanticTier {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    top_k: usize,
}

impl SemanticTier {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>, top_k: usize) -> Self {
        Self {
            embedder,
            index,
            top_k,
        }
    }

    /// Store one fact. Returns the generated entry id.
    pub async fn remember(
        &self,
        text: &str,
        namespace: Option<&NamespaceId>,
        source_message_id: Option<&str>,
    ) -> Result<String> {
        let embedding = self.embedder.embed(text).await?;
        let mut metadata = HashMap::new();
        metadata.insert("namespace".to_string(), namespace_key(namespace).to_string());
        if let Some(message_id) = source_message_id {
            metadata.insert("messageId".to_string(), message_id.to_string());
        }
        let id = Uuid::new_v4().to_string();
        self.index
            .upsert(VectorEntry {
                id: id.clone(),
                text: text.to_string(),
                embedding,
                metadata,
            })
            .await?;
        Ok(id)
    }
}

#[async_trait]
impl MemoryTier for SemanticTier {
    fn kind(&self) -> TierKind {
        TierKind::Semantic
    }

    async fn query(&self, query: &TierQuery) -> Result<Vec<String>> {
        if query.user_query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let embedding = self.embedder.embed(&query.user_query).await?;
        let mut filter = HashMap::new();
        filter.insert(
            "namespace".to_string(),
            namespace_key(query.namespace.as_ref()).to_string(),
        );
        let matches = self.index.search(&embedding, self.top_k, &filter).await?;
        Ok(matches.into_iter().map(|m| m.text).collect())
    }
}
