//! Graph consistency engine
//!
//! Duplicate-candidate detection, merge and split. Merge and split each run
//! as a single transaction: a failure at any step leaves the graph exactly
//! as it was.

use super::similarity::similarity;
use super::store::{self, EntityFilter, GraphStore};
use super::types::*;
use crate::error::{Error, Result};
use crate::storage::{encode_list, stored_now, ts};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

// =============================================================================
// Types
// =============================================================================

/// Two entities whose names look alike
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateCandidate {
    pub entity_a: Entity,
    pub entity_b: Entity,
    pub similarity: f64,
}

/// Request body for `POST /entities/merge`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRequest {
    /// Entity that survives
    pub target_id: String,
    /// Entity folded into the target and deleted
    pub source_id: String,
    #[serde(default)]
    pub expected_target_version: Option<i64>,
    #[serde(default)]
    pub expected_source_version: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeOutcome {
    pub entity: Entity,
    pub edges_repointed: usize,
    /// Edges dropped because the target already had an identical one, or
    /// because they connected source and target directly
    pub edges_collapsed: usize,
    pub messages_repointed: usize,
}

/// What happens to one of the source's edges during a split
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum MigrationDecision {
    /// Move the source's end of the edge to `newEntities[newEntityIndex]`
    #[serde(rename_all = "camelCase")]
    Reassign { new_entity_index: usize },
    Delete,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipMigration {
    pub relationship_id: String,
    #[serde(flatten)]
    pub decision: MigrationDecision,
}

/// Request body for `POST /entities/split`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitRequest {
    pub source_entity_id: String,
    pub new_entities: Vec<NewEntity>,
    #[serde(default)]
    pub relationship_migrations: Vec<RelationshipMigration>,
    #[serde(default)]
    pub expected_version: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitOutcome {
    pub entities: Vec<Entity>,
    pub edges_reassigned: usize,
    pub edges_deleted: usize,
}

fn check_version(entity: &Entity, expected: Option<i64>) -> Result<()> {
    match expected {
        Some(v) if v != entity.version => Err(Error::Conflict(format!(
            "Entity {} is at version {}, expected {}",
            entity.id, entity.version, v
        ))),
        _ => Ok(()),
    }
}

impl GraphStore {
    // =========================================================================
    // Duplicates
    // =========================================================================

    /// Pairs of entities in a namespace whose name similarity exceeds
    /// `threshold`, best first, at most `limit`.
    pub fn find_duplicates(
        &self,
        namespace: Option<&NamespaceId>,
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<DuplicateCandidate>> {
        let entities = self.list_entities(namespace, &EntityFilter::default())?;

        let mut candidates = Vec::new();
        for (i, a) in entities.iter().enumerate() {
            for b in &entities[i + 1..] {
                let score = similarity(&a.name, &b.name);
                if score > threshold {
                    candidates.push(DuplicateCandidate {
                        entity_a: a.clone(),
                        entity_b: b.clone(),
                        similarity: score,
                    });
                }
            }
        }

        candidates.sort_by(|x, y| {
            y.similarity
                .total_cmp(&x.similarity)
                .then_with(|| x.entity_a.name.cmp(&y.entity_a.name))
                .then_with(|| x.entity_b.name.cmp(&y.entity_b.name))
        });
        candidates.truncate(limit);
        Ok(candidates)
    }

    // =========================================================================
    // Merge
    // =========================================================================

    /// Fold `source` into `target`.
    pub fn merge(&self, request: &MergeRequest) -> Result<MergeOutcome> {
        let outcome = self.db().transaction(|tx| merge_in(tx, request))?;
        tracing::info!(
            target_id = %request.target_id,
            source_id = %request.source_id,
            edges_repointed = outcome.edges_repointed,
            edges_collapsed = outcome.edges_collapsed,
            "Merged entities"
        );
        Ok(outcome)
    }

    // =========================================================================
    // Split
    // =========================================================================

    /// Divide `source` into two or more new entities.
    pub fn split(&self, request: SplitRequest) -> Result<SplitOutcome> {
        let source_id = request.source_entity_id.clone();
        let outcome = self.db().transaction(|tx| split_in(tx, request))?;
        tracing::info!(
            source_id = %source_id,
            new_entities = outcome.entities.len(),
            edges_reassigned = outcome.edges_reassigned,
            edges_deleted = outcome.edges_deleted,
            "Split entity"
        );
        Ok(outcome)
    }
}

fn merge_in(conn: &Connection, request: &MergeRequest) -> Result<MergeOutcome> {
    if request.target_id == request.source_id {
        return Err(Error::Validation(
            "Cannot merge an entity into itself".to_string(),
        ));
    }
    let mut target = store::get_entity_in(conn, &request.target_id)?;
    let source = store::get_entity_in(conn, &request.source_id)?;
    check_version(&target, request.expected_target_version)?;
    check_version(&source, request.expected_source_version)?;
    if target.namespace != source.namespace {
        return Err(Error::Validation(
            "Cannot merge entities from different namespaces".to_string(),
        ));
    }

    let mut aliases = target.aliases.clone();
    aliases.extend(source.aliases.iter().cloned());
    aliases.push(source.name.clone());
    let aliases: Vec<String> = dedup_strings(aliases)
        .into_iter()
        .filter(|a| *a != target.name)
        .collect();
    let mut tags = target.tags.clone();
    tags.extend(source.tags.iter().cloned());
    let tags = dedup_strings(tags);
    if target.description.is_empty() {
        target.description = source.description.clone();
    }

    let total_edges = store::edges_for_entity_in(conn, &source.id)?.len();

    // Edges between the pair would become self-loops.
    conn.execute(
        "DELETE FROM entity_relationships
         WHERE (source_entity_id = ?1 AND target_entity_id = ?2)
            OR (source_entity_id = ?2 AND target_entity_id = ?1)",
        params![source.id, target.id],
    )?;

    let repointed_out = conn.execute(
        "UPDATE OR IGNORE entity_relationships SET source_entity_id = ?1 WHERE source_entity_id = ?2",
        params![target.id, source.id],
    )?;
    let repointed_in = conn.execute(
        "UPDATE OR IGNORE entity_relationships SET target_entity_id = ?1 WHERE target_entity_id = ?2",
        params![target.id, source.id],
    )?;
    let reverses_collapsed = store::collapse_symmetric_reverses_in(conn, &target.id)?;
    let edges_repointed = (repointed_out + repointed_in).saturating_sub(reverses_collapsed);

    let messages_repointed = conn.execute(
        "UPDATE OR IGNORE message_entities SET entity_id = ?1 WHERE entity_id = ?2",
        params![target.id, source.id],
    )?;

    let now = stored_now();
    conn.execute(
        "UPDATE entity_definitions
         SET description = ?1, aliases = ?2, tags = ?3, access_count = access_count + ?4,
             version = version + 1, last_updated_at = ?5
         WHERE id = ?6",
        params![
            target.description,
            encode_list(&aliases),
            encode_list(&tags),
            source.access_count,
            ts(&now),
            target.id
        ],
    )?;

    // Leftover edges and message links of the source cascade here.
    store::delete_entity_in(conn, &source.id)?;

    target.aliases = aliases;
    target.tags = tags;
    target.access_count += source.access_count;
    target.version += 1;
    target.last_updated_at = now;

    Ok(MergeOutcome {
        entity: target,
        edges_repointed,
        edges_collapsed: total_edges - edges_repointed,
        messages_repointed,
    })
}

fn split_in(conn: &Connection, request: SplitRequest) -> Result<SplitOutcome> {
    if request.new_entities.len() < 2 {
        return Err(Error::Validation(
            "A split requires at least two new entities".to_string(),
        ));
    }
    let source = store::get_entity_in(conn, &request.source_entity_id)?;
    check_version(&source, request.expected_version)?;

    let mut seen = HashSet::new();
    for new in &request.new_entities {
        let key = (new.name.trim().to_string(), new.entity_type.trim().to_string());
        if key.0 == source.name && key.1 == source.entity_type {
            return Err(Error::Validation(format!(
                "New entity '{}' has the same name and type as the entity being split",
                source.name
            )));
        }
        if !seen.insert(key) {
            return Err(Error::Validation(format!(
                "New entity '{}' is listed more than once",
                new.name.trim()
            )));
        }
    }

    let decisions: HashMap<&str, &MigrationDecision> = request
        .relationship_migrations
        .iter()
        .map(|m| (m.relationship_id.as_str(), &m.decision))
        .collect();
    let edges = store::edges_for_entity_in(conn, &source.id)?;
    for edge in &edges {
        match decisions.get(edge.id.as_str()) {
            None => {
                return Err(Error::Validation(format!(
                    "Missing migration decision for relationship {}",
                    edge.id
                )))
            }
            Some(MigrationDecision::Reassign { new_entity_index })
                if *new_entity_index >= request.new_entities.len() =>
            {
                return Err(Error::Validation(format!(
                    "Relationship {} is reassigned to new entity #{}, but only {} were given",
                    edge.id,
                    new_entity_index,
                    request.new_entities.len()
                )))
            }
            Some(_) => {}
        }
    }

    let mut created = Vec::with_capacity(request.new_entities.len());
    for new in request.new_entities {
        created.push(store::upsert_entity_in(conn, new, source.namespace.as_ref())?);
    }

    let mut edges_reassigned = 0;
    let mut edges_deleted = 0;
    for edge in &edges {
        let decision = decisions.get(edge.id.as_str()).copied();
        match decision {
            Some(MigrationDecision::Reassign { new_entity_index }) => {
                let new_id = &created[*new_entity_index].id;
                let other = if edge.source_entity_id == source.id {
                    &edge.target_entity_id
                } else {
                    &edge.source_entity_id
                };
                if other == new_id {
                    conn.execute(
                        "DELETE FROM entity_relationships WHERE id = ?1",
                        params![edge.id],
                    )?;
                    edges_deleted += 1;
                    continue;
                }
                let column = if edge.source_entity_id == source.id {
                    "source_entity_id"
                } else {
                    "target_entity_id"
                };
                edges_reassigned += conn.execute(
                    &format!("UPDATE OR IGNORE entity_relationships SET {column} = ?1 WHERE id = ?2"),
                    params![new_id, edge.id],
                )?;
            }
            Some(MigrationDecision::Delete) => {
                edges_deleted += conn.execute(
                    "DELETE FROM entity_relationships WHERE id = ?1",
                    params![edge.id],
                )?;
            }
            None => {}
        }
    }

    for entity in &created {
        let collapsed = store::collapse_symmetric_reverses_in(conn, &entity.id)?;
        edges_reassigned = edges_reassigned.saturating_sub(collapsed);
        edges_deleted += collapsed;
    }

    let mut copy_links = conn.prepare(
        "INSERT OR IGNORE INTO message_entities (message_id, entity_id, created_at)
         SELECT message_id, ?1, created_at FROM message_entities WHERE entity_id = ?2",
    )?;
    for entity in &created {
        copy_links.execute(params![entity.id, source.id])?;
    }

    store::delete_entity_in(conn, &source.id)?;

    Ok(SplitOutcome {
        entities: created,
        edges_reassigned,
        edges_deleted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;
    use std::sync::Arc;

    fn make_store() -> GraphStore {
        GraphStore::new(Arc::new(Database::in_memory().unwrap()))
    }

    fn entity(store: &GraphStore, name: &str, entity_type: &str) -> Entity {
        store
            .create_entity(NewEntity::new(name, entity_type), None)
            .unwrap()
    }

    fn link_message(store: &GraphStore, message_id: &str, entity_id: &str) {
        store
            .db()
            .with_conn(|c| {
                c.execute(
                    "INSERT INTO message_entities (message_id, entity_id, created_at)
                     VALUES (?1, ?2, '2024-01-01T00:00:00.000Z')",
                    params![message_id, entity_id],
                )?;
                Ok(())
            })
            .unwrap();
    }

    fn linked_messages(store: &GraphStore, entity_id: &str) -> Vec<String> {
        store
            .db()
            .with_conn(|c| {
                let mut stmt = c.prepare(
                    "SELECT message_id FROM message_entities WHERE entity_id = ?1 ORDER BY message_id",
                )?;
                let rows = stmt.query_map(params![entity_id], |r| r.get(0))?;
                Ok(rows.collect::<rusqlite::Result<Vec<String>>>()?)
            })
            .unwrap()
    }

    /// (source name, predicate, target name) for every edge, sorted
    fn edge_set(store: &GraphStore) -> Vec<(String, String, String)> {
        let mut set: Vec<_> = store
            .list_edges(None)
            .unwrap()
            .into_iter()
            .map(|e| {
                let s = store.get_entity(&e.source_entity_id).unwrap().name;
                let t = store.get_entity(&e.target_entity_id).unwrap().name;
                (s, e.predicate, t)
            })
            .collect();
        set.sort();
        set
    }

    #[test]
    fn test_find_duplicates_threshold_and_order() {
        let store = make_store();
        entity(&store, "Acme Corp", "org");
        entity(&store, "Acme Corporation", "org");
        entity(&store, "Acme Corp.", "org");
        entity(&store, "Globex", "org");

        let dups = store.find_duplicates(None, 0.4, 20).unwrap();
        assert!(!dups.is_empty());
        assert!(dups.iter().all(|d| d.similarity > 0.4));
        for pair in dups.windows(2) {
            assert!(pair[0].similarity >= pair[1].similarity);
        }
        assert!(dups
            .iter()
            .all(|d| d.entity_a.name != "Globex" && d.entity_b.name != "Globex"));

        let capped = store.find_duplicates(None, 0.4, 1).unwrap();
        assert_eq!(capped.len(), 1);
        assert_eq!(capped[0].similarity, dups[0].similarity);
    }

    #[test]
    fn test_find_duplicates_is_namespace_scoped() {
        let store = make_store();
        let ns = NamespaceId::new("work");
        entity(&store, "Acme Corp", "org");
        store
            .create_entity(NewEntity::new("Acme Corporation", "org"), Some(&ns))
            .unwrap();
        assert!(store.find_duplicates(None, 0.4, 20).unwrap().is_empty());
    }

    #[test]
    fn test_merge_rejects_self() {
        let store = make_store();
        let a = entity(&store, "Alice", "person");
        let result = store.merge(&MergeRequest {
            target_id: a.id.clone(),
            source_id: a.id.clone(),
            expected_target_version: None,
            expected_source_version: None,
        });
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn test_merge_repoints_edges_and_links() {
        let store = make_store();
        let target = store
            .create_entity(NewEntity::new("Robert", "person").alias("Rob"), None)
            .unwrap();
        let source = store
            .create_entity(NewEntity::new("Bob", "person").alias("Bobby"), None)
            .unwrap();
        let acme = entity(&store, "Acme", "org");
        let carol = entity(&store, "Carol", "person");

        store.create_edge(&target.id, "works_at", &acme.id, "").unwrap();
        store.create_edge(&source.id, "works_at", &acme.id, "").unwrap();
        store.create_edge(&carol.id, "knows", &source.id, "").unwrap();
        store.create_edge(&source.id, "sibling_of", &target.id, "").unwrap();
        link_message(&store, "m1", &source.id);
        link_message(&store, "m2", &source.id);
        link_message(&store, "m2", &target.id);

        let outcome = store
            .merge(&MergeRequest {
                target_id: target.id.clone(),
                source_id: source.id.clone(),
                expected_target_version: Some(1),
                expected_source_version: Some(1),
            })
            .unwrap();

        assert_eq!(outcome.entity.aliases, vec!["Rob", "Bobby", "Bob"]);
        assert_eq!(outcome.entity.version, 2);
        assert_eq!(outcome.edges_repointed, 1);
        assert_eq!(outcome.edges_collapsed, 2);

        assert!(matches!(store.get_entity(&source.id), Err(Error::NotFound(_))));
        assert!(matches!(
            store.create_edge(&source.id, "knows", &acme.id, ""),
            Err(Error::NotFound(_))
        ));
        assert_eq!(
            edge_set(&store),
            vec![
                ("Carol".to_string(), "knows".to_string(), "Robert".to_string()),
                ("Robert".to_string(), "works_at".to_string(), "Acme".to_string()),
            ]
        );
        assert_eq!(linked_messages(&store, &target.id), vec!["m1", "m2"]);
    }

    #[test]
    fn test_merge_collapses_symmetric_reverse_edges() {
        let store = make_store();
        store
            .create_predicate(NewPredicate {
                name: "married_to".into(),
                is_symmetric: true,
                ..Default::default()
            })
            .unwrap();
        let target = entity(&store, "Robert", "person");
        let source = entity(&store, "Bob", "person");
        let ann = entity(&store, "Ann", "person");
        store.create_edge(&target.id, "married_to", &ann.id, "").unwrap();
        store.create_edge(&ann.id, "married_to", &source.id, "").unwrap();

        let outcome = store
            .merge(&MergeRequest {
                target_id: target.id.clone(),
                source_id: source.id.clone(),
                expected_target_version: None,
                expected_source_version: None,
            })
            .unwrap();

        assert_eq!(store.list_edges(None).unwrap().len(), 1);
        assert_eq!(outcome.edges_repointed, 0);
        assert_eq!(outcome.edges_collapsed, 1);
        assert_eq!(outcome.entity, store.get_entity(&target.id).unwrap());
    }

    #[test]
    fn test_merge_version_conflict_rolls_back() {
        let store = make_store();
        let target = entity(&store, "Robert", "person");
        let source = entity(&store, "Bob", "person");
        let acme = entity(&store, "Acme", "org");
        store.create_edge(&source.id, "works_at", &acme.id, "").unwrap();

        let result = store.merge(&MergeRequest {
            target_id: target.id.clone(),
            source_id: source.id.clone(),
            expected_target_version: None,
            expected_source_version: Some(7),
        });
        assert!(matches!(result, Err(Error::Conflict(_))));
        assert!(store.get_entity(&source.id).is_ok());
        assert_eq!(store.list_edges(Some(&source.id)).unwrap().len(), 1);
    }

    #[test]
    fn test_split_requires_two_entities_and_all_decisions() {
        let store = make_store();
        let source = entity(&store, "Jordan", "person");
        let acme = entity(&store, "Acme", "org");
        let edge = store.create_edge(&source.id, "works_at", &acme.id, "").unwrap();

        let too_few = store.split(SplitRequest {
            source_entity_id: source.id.clone(),
            new_entities: vec![NewEntity::new("Jordan A", "person")],
            relationship_migrations: vec![],
            expected_version: None,
        });
        assert!(matches!(too_few, Err(Error::Validation(_))));

        let missing = store.split(SplitRequest {
            source_entity_id: source.id.clone(),
            new_entities: vec![
                NewEntity::new("Jordan A", "person"),
                NewEntity::new("Jordan B", "person"),
            ],
            relationship_migrations: vec![],
            expected_version: None,
        });
        assert!(matches!(missing, Err(Error::Validation(_))));

        let bad_index = store.split(SplitRequest {
            source_entity_id: source.id.clone(),
            new_entities: vec![
                NewEntity::new("Jordan A", "person"),
                NewEntity::new("Jordan B", "person"),
            ],
            relationship_migrations: vec![RelationshipMigration {
                relationship_id: edge.relationship.id.clone(),
                decision: MigrationDecision::Reassign { new_entity_index: 5 },
            }],
            expected_version: None,
        });
        assert!(matches!(bad_index, Err(Error::Validation(_))));

        // Nothing was written by the rejected attempts.
        assert!(store.get_entity(&source.id).is_ok());
        assert!(store.find_entities_by_name("Jordan A", None).unwrap().is_empty());
    }

    #[test]
    fn test_split_then_merge_restores_edges() {
        let store = make_store();
        let source = store
            .create_entity(NewEntity::new("Jordan", "person"), Some(&NamespaceId::new("b1")))
            .unwrap();
        let ns = source.namespace.clone();
        let acme = store
            .create_entity(NewEntity::new("Acme", "org"), ns.as_ref())
            .unwrap();
        let paris = store
            .create_entity(NewEntity::new("Paris", "place"), ns.as_ref())
            .unwrap();
        let sam = store
            .create_entity(NewEntity::new("Sam", "person"), ns.as_ref())
            .unwrap();
        let works = store.create_edge(&source.id, "works_at", &acme.id, "").unwrap();
        let lives = store.create_edge(&source.id, "lives_in", &paris.id, "").unwrap();
        let knows = store.create_edge(&sam.id, "knows", &source.id, "").unwrap();
        link_message(&store, "m1", &source.id);

        let outcome = store
            .split(SplitRequest {
                source_entity_id: source.id.clone(),
                new_entities: vec![
                    NewEntity::new("Jordan Lee", "person"),
                    NewEntity::new("Jordan Park", "person"),
                ],
                relationship_migrations: vec![
                    RelationshipMigration {
                        relationship_id: works.relationship.id.clone(),
                        decision: MigrationDecision::Reassign { new_entity_index: 0 },
                    },
                    RelationshipMigration {
                        relationship_id: lives.relationship.id.clone(),
                        decision: MigrationDecision::Reassign { new_entity_index: 1 },
                    },
                    RelationshipMigration {
                        relationship_id: knows.relationship.id.clone(),
                        decision: MigrationDecision::Delete,
                    },
                ],
                expected_version: Some(1),
            })
            .unwrap();

        assert_eq!(outcome.entities.len(), 2);
        assert_eq!(outcome.edges_reassigned, 2);
        assert_eq!(outcome.edges_deleted, 1);
        assert!(outcome.entities.iter().all(|e| e.namespace == ns));
        assert!(matches!(store.get_entity(&source.id), Err(Error::NotFound(_))));
        for e in &outcome.entities {
            assert_eq!(linked_messages(&store, &e.id), vec!["m1"]);
        }

        store
            .merge(&MergeRequest {
                target_id: outcome.entities[0].id.clone(),
                source_id: outcome.entities[1].id.clone(),
                expected_target_version: None,
                expected_source_version: None,
            })
            .unwrap();

        assert_eq!(
            edge_set(&store),
            vec![
                ("Jordan Lee".to_string(), "lives_in".to_string(), "Paris".to_string()),
                ("Jordan Lee".to_string(), "works_at".to_string(), "Acme".to_string()),
            ]
        );
    }

    #[test]
    fn test_migration_deserialization() {
        let json = serde_json::json!([
            {"relationshipId": "r1", "action": "reassign", "newEntityIndex": 1},
            {"relationshipId": "r2", "action": "delete"}
        ]);
        let parsed: Vec<RelationshipMigration> = serde_json::from_value(json).unwrap();
        assert_eq!(
            parsed[0].decision,
            MigrationDecision::Reassign { new_entity_index: 1 }
        );
        assert_eq!(parsed[1].decision, MigrationDecision::Delete);
    }
}
