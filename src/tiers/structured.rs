//! Structured tier: profiles of the entities a query is about

use super::{resolve_focus, MemoryTier, TierKind, TierQuery};
use crate::error::Result;
use crate::graph::{Entity, GraphStore};
use crate::storage::blocking;
use async_trait::async_trait;
use std::sync::Arc;

pub struct StructuredTier {
    store: Arc<GraphStore>,
}

impl StructuredTier {
    pub fn new(store: Arc<GraphStore>) -> Self {
        Self { store }
    }
}

fn profile_line(entity: &Entity) -> String {
    let mut line = format!("{} ({})", entity.name, entity.entity_type);
    if !entity.description.is_empty() {
        line.push_str(": ");
        line.push_str(&entity.description);
    }
    if !entity.aliases.is_empty() {
        line.push_str(&format!(" [aka {}]", entity.aliases.join(", ")));
    }
    if !entity.tags.is_empty() {
        line.push_str(&format!(" #{}", entity.tags.join(" #")));
    }
    line
}

#[async_trait]
impl MemoryTier for StructuredTier {
    fn kind(&self) -> TierKind {
        TierKind::Structured
    }

    async fn query(&self, query: &TierQuery) -> Result<Vec<String>> {
        let store = self.store.clone();
        let query = query.clone();
        blocking(move || {
            let focus = resolve_focus(&store, &query)?;
            let ids: Vec<String> = focus.iter().map(|e| e.id.clone()).collect();
            store.record_access(&ids)?;
            Ok(focus.iter().map(profile_line).collect())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NewEntity;
    use crate::storage::Database;

    #[tokio::test]
    async fn test_profiles_and_access_count() {
        let store = Arc::new(GraphStore::new(Arc::new(Database::in_memory().unwrap())));
        let alice = store
            .create_entity(
                NewEntity::new("Alice", "person")
                    .description("backend engineer")
                    .alias("Ali")
                    .tag("colleague"),
                None,
            )
            .unwrap();
        let tier = StructuredTier::new(store.clone());

        let lines = tier
            .query(&TierQuery {
                user_query: "remind me about Alice".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(
            lines,
            vec!["Alice (person): backend engineer [aka Ali] #colleague"]
        );
        assert_eq!(store.get_entity(&alice.id).unwrap().access_count, 1);
    }

    #[tokio::test]
    async fn test_no_focus_is_empty() {
        let store = Arc::new(GraphStore::new(Arc::new(Database::in_memory().unwrap())));
        let tier = StructuredTier::new(store);
        let lines = tier
            .query(&TierQuery {
                user_query: "hello".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(lines.is_empty());
    }
}
