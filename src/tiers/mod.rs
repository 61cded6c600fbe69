//! Memory tiers
//!
//! Four independent backends queried in parallel during context assembly:
//!
//! | Tier         | Source                               | Returns                         |
//! |--------------|--------------------------------------|---------------------------------|
//! | `episodic`   | last N turns of the conversation     | `role: content` lines           |
//! | `semantic`   | vector search over stored facts      | fact texts, best first          |
//! | `structured` | entities mentioned or named in query | one profile line per entity     |
//! | `graph`      | edges touching the focus entities    | `source predicate target` lines |
//!
//! A tier only answers with lines or an error; the pipeline turns that into a
//! [`TierOutcome`] so an empty answer and a failure stay distinguishable.

pub mod episodic;
pub mod graph;
pub mod semantic;
pub mod structured;

pub use episodic::EpisodicTier;
pub use graph::GraphTier;
pub use semantic::SemanticTier;
pub use structured::StructuredTier;

use crate::error::Result;
use crate::graph::{Entity, EntityFilter, GraphStore, NamespaceId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Which tier produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierKind {
    Episodic,
    Semantic,
    Structured,
    Graph,
}

impl TierKind {
    /// Section header used in the composed context
    pub fn header(&self) -> &'static str {
        match self {
            Self::Episodic => "## Recent conversation",
            Self::Semantic => "## Relevant facts",
            Self::Structured => "## Known entities",
            Self::Graph => "## Relationships",
        }
    }
}

impl std::fmt::Display for TierKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Episodic => write!(f, "episodic"),
            Self::Semantic => write!(f, "semantic"),
            Self::Structured => write!(f, "structured"),
            Self::Graph => write!(f, "graph"),
        }
    }
}

/// Three-valued result of one tier query
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "lowercase")]
pub enum TierOutcome {
    Success(Vec<String>),
    /// The tier ran and found nothing
    Empty,
    Error(String),
}

impl TierOutcome {
    pub fn from_result(result: Result<Vec<String>>) -> Self {
        match result {
            Ok(lines) if lines.is_empty() => Self::Empty,
            Ok(lines) => Self::Success(lines),
            Err(e) => Self::Error(e.to_string()),
        }
    }
}

/// Input shared by all tiers
#[derive(Debug, Clone, Default)]
pub struct TierQuery {
    pub conversation_id: String,
    pub user_query: String,
    /// Entity ids or exact names
    pub mentioned_entities: Vec<String>,
    pub namespace: Option<NamespaceId>,
}

/// One memory backend
#[async_trait]
pub trait MemoryTier: Send + Sync {
    fn kind(&self) -> TierKind;

    async fn query(&self, query: &TierQuery) -> Result<Vec<String>>;
}

/// Entities a query is about: those explicitly mentioned (by id or exact
/// name) plus any whose name or alias appears as a whole word in the text.
pub(crate) fn resolve_focus(store: &GraphStore, query: &TierQuery) -> Result<Vec<Entity>> {
    let namespace = query.namespace.as_ref();
    let mut focus: Vec<Entity> = Vec::new();
    fn push(entity: Entity, focus: &mut Vec<Entity>) {
        if !focus.iter().any(|e| e.id == entity.id) {
            focus.push(entity);
        }
    }

    for mention in &query.mentioned_entities {
        match store.get_entity(mention) {
            Ok(entity) => push(entity, &mut focus),
            Err(crate::Error::NotFound(_)) => {
                for entity in store.find_entities_by_name(mention, namespace)? {
                    push(entity, &mut focus);
                }
            }
            Err(e) => return Err(e),
        }
    }

    let text = query.user_query.to_lowercase();
    if !text.trim().is_empty() {
        for entity in store.list_entities(namespace, &EntityFilter::default())? {
            let named = std::iter::once(&entity.name)
                .chain(entity.aliases.iter())
                .any(|n| contains_phrase(&text, &n.to_lowercase()));
            if named {
                push(entity, &mut focus);
            }
        }
    }
    Ok(focus)
}

/// Whole-word containment of `phrase` in `text`.
fn contains_phrase(text: &str, phrase: &str) -> bool {
    if phrase.chars().count() < 2 {
        return false;
    }
    text.match_indices(phrase).any(|(start, _)| {
        let before = text[..start].chars().next_back();
        let after = text[start + phrase.len()..].chars().next();
        !before.map(char::is_alphanumeric).unwrap_or(false)
            && !after.map(char::is_alphanumeric).unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::graph::NewEntity;
    use crate::storage::Database;
    use std::sync::Arc;

    #[test]
    fn test_outcome_from_result() {
        assert_eq!(TierOutcome::from_result(Ok(vec![])), TierOutcome::Empty);
        assert_eq!(
            TierOutcome::from_result(Ok(vec!["a".into()])),
            TierOutcome::Success(vec!["a".into()])
        );
        assert!(matches!(
            TierOutcome::from_result(Err(Error::Upstream("down".into()))),
            TierOutcome::Error(_)
        ));
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_value(TierOutcome::Empty).unwrap();
        assert_eq!(json["status"], "empty");
        let json = serde_json::to_value(TierOutcome::Error("x".into())).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["detail"], "x");
    }

    #[test]
    fn test_contains_phrase() {
        assert!(contains_phrase("where does alice work?", "alice"));
        assert!(!contains_phrase("malice aforethought", "alice"));
        assert!(contains_phrase("news about acme corp today", "acme corp"));
        assert!(!contains_phrase("a", "a"));
    }

    #[test]
    fn test_resolve_focus() {
        let store = GraphStore::new(Arc::new(Database::in_memory().unwrap()));
        let alice = store.create_entity(NewEntity::new("Alice", "person"), None).unwrap();
        let acme = store
            .create_entity(NewEntity::new("Acme", "org").alias("ACME Inc"), None)
            .unwrap();
        store.create_entity(NewEntity::new("Bob", "person"), None).unwrap();

        let focus = resolve_focus(
            &store,
            &TierQuery {
                user_query: "What do we know about acme inc?".into(),
                mentioned_entities: vec![alice.id.clone(), "Alice".into()],
                ..Default::default()
            },
        )
        .unwrap();
        let ids: Vec<&str> = focus.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec![alice.id.as_str(), acme.id.as_str()]);
    }
}
