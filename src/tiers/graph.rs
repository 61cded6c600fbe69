//! Graph tier: relationships touching the focus entities
//!
//! Emits every stored edge with a focus entity at either end. For transitive
//! predicates one extra hop is followed and reported as inferred
//! (`A part_of B`, `B part_of C` gives `A part_of C (inferred)`).

use super::{resolve_focus, MemoryTier, TierKind, TierQuery};
use crate::error::Result;
use crate::graph::{GraphStore, Relationship};
use crate::storage::blocking;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub struct GraphTier {
    store: Arc<GraphStore>,
}

impl GraphTier {
    pub fn new(store: Arc<GraphStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl MemoryTier for GraphTier {
    fn kind(&self) -> TierKind {
        TierKind::Graph
    }

    async fn query(&self, query: &TierQuery) -> Result<Vec<String>> {
        let store = self.store.clone();
        let query = query.clone();
        blocking(move || relationship_lines(&store, &query)).await
    }
}

fn relationship_lines(store: &GraphStore, query: &TierQuery) -> Result<Vec<String>> {
    let focus = resolve_focus(store, query)?;
    if focus.is_empty() {
        return Ok(Vec::new());
    }
    let transitive: HashSet<String> = store
        .list_predicates()?
        .into_iter()
        .filter(|p| p.is_transitive)
        .map(|p| p.id)
        .collect();

    let mut names: HashMap<String, String> = HashMap::new();
    let mut seen_edges: HashSet<String> = HashSet::new();
    let mut lines = Vec::new();
    let mut inferred = Vec::new();

    for entity in &focus {
        names.insert(entity.id.clone(), entity.name.clone());
        for edge in store.list_edges(Some(&entity.id))? {
            if !seen_edges.insert(edge.id.clone()) {
                continue;
            }
            let source = name_of(store, &edge.source_entity_id, &mut names)?;
            let target = name_of(store, &edge.target_entity_id, &mut names)?;
            lines.push(format!("{} {} {}", source, edge.predicate, target));

            if transitive.contains(&edge.predicate_id) && edge.source_entity_id == entity.id {
                for next in hop(store, &edge)? {
                    let far = name_of(store, &next.target_entity_id, &mut names)?;
                    inferred.push(format!("{} {} {} (inferred)", source, edge.predicate, far));
                }
            }
        }
    }

    let mut seen_lines: HashSet<String> = lines.iter().cloned().collect();
    for line in inferred {
        let plain = line.trim_end_matches(" (inferred)").to_string();
        if !seen_lines.contains(&plain) && seen_lines.insert(line.clone()) {
            lines.push(line);
        }
    }
    Ok(lines)
}

fn name_of(store: &GraphStore, id: &str, cache: &mut HashMap<String, String>) -> Result<String> {
    if let Some(name) = cache.get(id) {
        return Ok(name.clone());
    }
    let name = store.get_entity(id)?.name;
    cache.insert(id.to_string(), name.clone());
    Ok(name)
}

/// Outgoing edges of `edge`'s target with the same predicate, skipping
/// any that loop back to `edge`'s source.
fn hop(store: &GraphStore, edge: &Relationship) -> Result<Vec<Relationship>> {
    Ok(store
        .list_edges(Some(&edge.target_entity_id))?
        .into_iter()
        .filter(|next| {
            next.predicate_id == edge.predicate_id
                && next.source_entity_id == edge.target_entity_id
                && next.target_entity_id != edge.source_entity_id
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{NewEntity, NewPredicate};
    use crate::storage::Database;

    #[tokio::test]
    async fn test_edges_and_transitive_inference() {
        let store = Arc::new(GraphStore::new(Arc::new(Database::in_memory().unwrap())));
        store
            .create_predicate(NewPredicate {
                name: "part_of".into(),
                is_transitive: true,
                ..Default::default()
            })
            .unwrap();
        let kreuzberg = store.create_entity(NewEntity::new("Kreuzberg", "place"), None).unwrap();
        let berlin = store.create_entity(NewEntity::new("Berlin", "place"), None).unwrap();
        let germany = store.create_entity(NewEntity::new("Germany", "place"), None).unwrap();
        let alice = store.create_entity(NewEntity::new("Alice", "person"), None).unwrap();
        store.create_edge(&kreuzberg.id, "part_of", &berlin.id, "").unwrap();
        store.create_edge(&berlin.id, "part_of", &germany.id, "").unwrap();
        store.create_edge(&alice.id, "lives_in", &kreuzberg.id, "").unwrap();

        let tier = GraphTier::new(store);
        let lines = tier
            .query(&TierQuery {
                mentioned_entities: vec![kreuzberg.id.clone()],
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(lines.contains(&"Kreuzberg part_of Berlin".to_string()));
        assert!(lines.contains(&"Alice lives_in Kreuzberg".to_string()));
        assert!(lines.contains(&"Kreuzberg part_of Germany (inferred)".to_string()));
        assert_eq!(lines.len(), 3);
    }

    #[tokio::test]
    async fn test_no_focus_is_empty() {
        let store = Arc::new(GraphStore::new(Arc::new(Database::in_memory().unwrap())));
        let tier = GraphTier::new(store);
        assert!(tier.query(&TierQuery::default()).await.unwrap().is_empty());
    }
}
