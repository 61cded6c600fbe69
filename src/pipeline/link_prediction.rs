//! Link prediction
//!
//! Looks for two entities that keep turning up together in a conversation
//! but have no edge between them, and asks the model what the missing edge
//! should be. The proposal is returned to the caller; nothing is written.

use crate::config::LinkPredictionConfig;
use crate::conversation::ConversationStore;
use crate::error::{Error, Result};
use crate::graph::{normalize_predicate, Entity, GraphStore};
use crate::llm::{GenerativeModel, JsonRequest};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

const SYSTEM_PROMPT: &str = "You propose a single missing relationship between two entities \
in a knowledge graph. Answer with a short snake_case predicate (for example works_at, \
married_to, part_of) and which of the two entities is the source.";

/// A suggested edge. Never persisted by the predictor.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkProposal {
    pub source_entity: Entity,
    pub target_entity: Entity,
    pub suggested_predicate: String,
    /// Number of scanned messages mentioning both entities
    pub cooccurrences: usize,
}

#[derive(Debug, Deserialize)]
struct PredicateAnswer {
    predicate: String,
    #[serde(default)]
    source: Option<String>,
}

pub struct LinkPredictor {
    model: Arc<dyn GenerativeModel>,
    graph: Arc<GraphStore>,
    conversations: Arc<ConversationStore>,
    config: LinkPredictionConfig,
}

impl LinkPredictor {
    pub fn new(
        model: Arc<dyn GenerativeModel>,
        graph: Arc<GraphStore>,
        conversations: Arc<ConversationStore>,
        config: LinkPredictionConfig,
    ) -> Self {
        Self {
            model,
            graph,
            conversations,
            config,
        }
    }

    /// Best unlinked co-occurring pair in the recent window, if any.
    ///
    /// Ties on co-occurrence count are broken by entity name, then id.
    pub fn candidate_pair(&self, conversation_id: &str) -> Result<Option<(Entity, Entity, usize)>> {
        let messages = self
            .conversations
            .recent(conversation_id, self.config.window)?;

        let mut counts: BTreeMap<(String, String), usize> = BTreeMap::new();
        for message in &messages {
            let ids: BTreeSet<&String> = message.entity_ids.iter().collect();
            let ids: Vec<&String> = ids.into_iter().collect();
            for (i, a) in ids.iter().enumerate() {
                for b in &ids[i + 1..] {
                    *counts.entry(((*a).clone(), (*b).clone())).or_insert(0) += 1;
                }
            }
        }

        let mut best: Option<(Entity, Entity, usize)> = None;
        for ((a, b), count) in counts {
            if count < self.config.min_cooccurrence.max(1) {
                continue;
            }
            if self.graph.edge_exists_between(&a, &b)? {
                continue;
            }
            let (first, second) = match (self.lookup(&a)?, self.lookup(&b)?) {
                (Some(x), Some(y)) => order_pair(x, y),
                _ => continue,
            };
            let better = match &best {
                None => true,
                Some((bf, bs, bc)) => {
                    count > *bc || (count == *bc && pair_key(&first, &second) < pair_key(bf, bs))
                }
            };
            if better {
                best = Some((first, second, count));
            }
        }
        Ok(best)
    }

    /// Propose the missing edge for the best candidate pair.
    pub async fn predict(&self, conversation_id: &str) -> Result<Option<LinkProposal>> {
        let Some((first, second, count)) = self.candidate_pair(conversation_id)? else {
            tracing::debug!(conversation_id = %conversation_id, "No link candidate");
            return Ok(None);
        };

        let request = JsonRequest {
            system: SYSTEM_PROMPT.to_string(),
            prompt: format!(
                "Entity 1: {}\nEntity 2: {}\nThey were mentioned together in {} recent messages \
                 but are not yet connected.",
                describe(&first),
                describe(&second),
                count
            ),
            schema_name: "link_prediction".to_string(),
            schema: json!({
                "type": "object",
                "additionalProperties": false,
                "required": ["predicate", "source"],
                "properties": {
                    "predicate": { "type": "string" },
                    "source": { "type": "string", "enum": [first.name, second.name] }
                }
            }),
        };
        let answer: PredicateAnswer = serde_json::from_value(self.model.complete_json(&request).await?)
            .map_err(|e| Error::Upstream(format!("Model output did not match link schema: {}", e)))?;

        let predicate = normalize_predicate(&answer.predicate);
        if predicate.is_empty() {
            return Err(Error::Upstream("Model returned an empty predicate".to_string()));
        }
        let reversed = answer.source.as_deref() == Some(second.name.as_str())
            && first.name != second.name;
        let (source_entity, target_entity) = if reversed {
            (second, first)
        } else {
            (first, second)
        };

        tracing::info!(
            source = %source_entity.name,
            target = %target_entity.name,
            predicate = %predicate,
            "Link proposed"
        );
        Ok(Some(LinkProposal {
            source_entity,
            target_entity,
            suggested_predicate: predicate,
            cooccurrences: count,
        }))
    }

    fn lookup(&self, id: &str) -> Result<Option<Entity>> {
        match self.graph.get_entity(id) {
            Ok(entity) => Ok(Some(entity)),
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn pair_key<'a>(a: &'a Entity, b: &'a Entity) -> (&'a str, &'a str, &'a str, &'a str) {
    (&a.name, &b.name, &a.id, &b.id)
}

fn order_pair(a: Entity, b: Entity) -> (Entity, Entity) {
    if (&a.name, &a.id) <= (&b.name, &b.id) {
        (a, b)
    } else {
        (b, a)
    }
}

fn describe(entity: &Entity) -> String {
    if entity.description.is_empty() {
        format!("{} ({})", entity.name, entity.entity_type)
    } else {
        format!("{} ({}): {}", entity.name, entity.entity_type, entity.description)
    }
}
