//! Episodic tier: recent turns of the current conversation

use super::{MemoryTier, TierKind, TierQuery};
use crate::conversation::ConversationStore;
use crate::error::Result;
use crate::storage::blocking;
use async_trait::async_trait;
use std::sync::Arc;

pub struct EpisodicTier {
    store: Arc<ConversationStore>,
    turns: usize,
}

impl EpisodicTier {
    pub fn new(store: Arc<ConversationStore>, turns: usize) -> Self {
        Self { store, turns }
    }
}

#[async_trait]
impl MemoryTier for EpisodicTier {
    fn kind(&self) -> TierKind {
        TierKind::Episodic
    }

    async fn query(&self, query: &TierQuery) -> Result<Vec<String>> {
        if query.conversation_id.is_empty() {
            return Ok(Vec::new());
        }
        let store = self.store.clone();
        let conversation_id = query.conversation_id.clone();
        let turns = self.turns;
        let messages = blocking(move || store.recent(&conversation_id, turns)).await?;
        Ok(messages
            .into_iter()
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect())
    }
}
