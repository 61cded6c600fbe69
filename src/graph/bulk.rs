//! Bulk entity actions
//!
//! One action applied to many entity ids. In the default mode every id runs
//! in its own transaction and failures are collected per item; with
//! `atomic: true` all ids share one transaction and the first failure rolls
//! back the whole batch.

use super::store::{self, GraphStore};
use super::types::*;
use super::validation::{self, Candidate};
use crate::error::{Error, Result};
use crate::storage::ts;
use chrono::Utc;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkAction {
    Delete,
    AddTags,
    RemoveTags,
    SetType,
    SetNamespace,
    SetDescription,
}

/// Request body for `POST /entities/bulk-actions`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkActionRequest {
    pub action: BulkAction,
    pub ids: Vec<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub atomic: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkItemError {
    pub id: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkActionResult {
    pub action: BulkAction,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub errors: Vec<BulkItemError>,
}

/// A bulk action with its payload decoded
#[derive(Debug, Clone)]
enum BulkOp {
    Delete,
    AddTags(Vec<String>),
    RemoveTags(Vec<String>),
    SetType(String),
    SetNamespace(Option<NamespaceId>),
    SetDescription(String),
}

fn payload_str(payload: &serde_json::Value, key: &str) -> Result<String> {
    payload
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| Error::Validation(format!("payload.{} must be a string", key)))
}

fn payload_tags(payload: &serde_json::Value) -> Result<Vec<String>> {
    let tags: Vec<String> = payload
        .get("tags")
        .and_then(|v| v.as_array())
        .ok_or_else(|| Error::Validation("payload.tags must be a list of strings".to_string()))?
        .iter()
        .filter_map(|v| v.as_str().map(String::from))
        .collect();
    let tags = dedup_strings(tags);
    if tags.is_empty() {
        return Err(Error::Validation("payload.tags must not be empty".to_string()));
    }
    Ok(tags)
}

impl BulkOp {
    fn decode(action: BulkAction, payload: &serde_json::Value) -> Result<Self> {
        Ok(match action {
            BulkAction::Delete => Self::Delete,
            BulkAction::AddTags => Self::AddTags(payload_tags(payload)?),
            BulkAction::RemoveTags => Self::RemoveTags(payload_tags(payload)?),
            BulkAction::SetType => {
                let entity_type = payload_str(payload, "type")?;
                if entity_type.is_empty() {
                    return Err(Error::Validation("payload.type must not be empty".to_string()));
                }
                Self::SetType(entity_type)
            }
            BulkAction::SetNamespace => match payload.get("namespace") {
                None | Some(serde_json::Value::Null) => Self::SetNamespace(None),
                Some(_) => {
                    let ns = payload_str(payload, "namespace")?;
                    Self::SetNamespace((!ns.is_empty()).then(|| NamespaceId::new(ns)))
                }
            },
            BulkAction::SetDescription => Self::SetDescription(payload_str(payload, "description")?),
        })
    }

    fn apply(&self, conn: &Connection, id: &str) -> Result<()> {
        match self {
            Self::Delete => store::delete_entity_in(conn, id),
            Self::AddTags(tags) => {
                let mut merged = store::get_entity_in(conn, id)?.tags;
                merged.extend(tags.iter().cloned());
                store::update_entity_in(conn, id, EntityUpdate {
                    tags: Some(merged),
                    ..Default::default()
                })
                .map(|_| ())
            }
            Self::RemoveTags(tags) => {
                let kept = store::get_entity_in(conn, id)?
                    .tags
                    .into_iter()
                    .filter(|t| !tags.contains(t))
                    .collect();
                store::update_entity_in(conn, id, EntityUpdate {
                    tags: Some(kept),
                    ..Default::default()
                })
                .map(|_| ())
            }
            Self::SetType(entity_type) => store::update_entity_in(conn, id, EntityUpdate {
                entity_type: Some(entity_type.clone()),
                ..Default::default()
            })
            .map(|_| ()),
            Self::SetDescription(description) => store::update_entity_in(conn, id, EntityUpdate {
                description: Some(description.clone()),
                ..Default::default()
            })
            .map(|_| ()),
            Self::SetNamespace(namespace) => set_namespace_in(conn, id, namespace.as_ref()),
        }
    }
}

fn set_namespace_in(conn: &Connection, id: &str, namespace: Option<&NamespaceId>) -> Result<()> {
    let entity = store::get_entity_in(conn, id)?;
    if entity.namespace.as_ref() == namespace {
        return Ok(());
    }
    let taken: i64 = conn.query_row(
        "SELECT COUNT(*) FROM entity_definitions
         WHERE name = ?1 AND type = ?2 AND namespace = ?3 AND id != ?4",
        params![entity.name, entity.entity_type, namespace_key(namespace), id],
        |row| row.get(0),
    )?;
    if taken > 0 {
        return Err(Error::Conflict(format!(
            "'{}' ({}) already exists in the target namespace",
            entity.name, entity.entity_type
        )));
    }
    validation::validate(
        conn,
        &Candidate {
            id: Some(&entity.id),
            name: &entity.name,
            entity_type: &entity.entity_type,
            description: &entity.description,
            aliases: &entity.aliases,
            tags: &entity.tags,
            namespace,
        },
    )?;
    conn.execute(
        "UPDATE entity_definitions
         SET namespace = ?1, version = version + 1, last_updated_at = ?2 WHERE id = ?3",
        params![namespace_key(namespace), ts(&Utc::now()), id],
    )?;
    Ok(())
}

impl GraphStore {
    /// Apply one action to many entities.
    pub fn bulk_action(&self, request: &BulkActionRequest) -> Result<BulkActionResult> {
        if request.ids.is_empty() {
            return Err(Error::Validation("ids must not be empty".to_string()));
        }
        let op = BulkOp::decode(request.action, &request.payload)?;

        if request.atomic {
            self.db().transaction(|tx| {
                for id in &request.ids {
                    op.apply(tx, id).map_err(|e| match e {
                        Error::Validation(m) => Error::Validation(format!("{}: {}", id, m)),
                        Error::NotFound(m) => Error::NotFound(format!("{}: {}", id, m)),
                        Error::Conflict(m) => Error::Conflict(format!("{}: {}", id, m)),
                        other => other,
                    })?;
                }
                Ok(())
            })?;
            return Ok(BulkActionResult {
                action: request.action,
                processed: request.ids.len(),
                succeeded: request.ids.len(),
                failed: 0,
                errors: Vec::new(),
            });
        }

        let mut errors = Vec::new();
        for id in &request.ids {
            if let Err(e) = self.db().transaction(|tx| op.apply(tx, id)) {
                tracing::debug!(entity_id = %id, error = %e, "Bulk action item failed");
                errors.push(BulkItemError {
                    id: id.clone(),
                    error: e.to_string(),
                });
            }
        }
        Ok(BulkActionResult {
            action: request.action,
            processed: request.ids.len(),
            succeeded: request.ids.len() - errors.len(),
            failed: errors.len(),
            errors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::validation::{FieldRule, RuleField, RuleKind, ValidationRule};
    use crate::storage::Database;
    use serde_json::json;
    use std::sync::Arc;

    fn make_store() -> GraphStore {
        GraphStore::new(Arc::new(Database::in_memory().unwrap()))
    }

    fn request(action: BulkAction, ids: Vec<String>, payload: serde_json::Value, atomic: bool) -> BulkActionRequest {
        BulkActionRequest {
            action,
            ids,
            payload,
            atomic,
        }
    }

    #[test]
    fn test_add_and_remove_tags() {
        let store = make_store();
        let a = store.create_entity(NewEntity::new("Alice", "person").tag("friend"), None).unwrap();
        let b = store.create_entity(NewEntity::new("Bob", "person"), None).unwrap();
        let ids = vec![a.id.clone(), b.id.clone()];

        let result = store
            .bulk_action(&request(BulkAction::AddTags, ids.clone(), json!({"tags": ["team", "friend"]}), false))
            .unwrap();
        assert_eq!(result.succeeded, 2);
        assert_eq!(store.get_entity(&a.id).unwrap().tags, vec!["friend", "team"]);
        assert_eq!(store.get_entity(&b.id).unwrap().tags, vec!["team", "friend"]);

        store
            .bulk_action(&request(BulkAction::RemoveTags, ids, json!({"tags": ["friend"]}), false))
            .unwrap();
        assert_eq!(store.get_entity(&a.id).unwrap().tags, vec!["team"]);
        assert_eq!(store.get_entity(&b.id).unwrap().tags, vec!["team"]);
    }

    #[test]
    fn test_non_atomic_collects_failures() {
        let store = make_store();
        let a = store.create_entity(NewEntity::new("Alice", "person"), None).unwrap();
        let result = store
            .bulk_action(&request(
                BulkAction::Delete,
                vec![a.id.clone(), "ghost".to_string()],
                json!(null),
                false,
            ))
            .unwrap();
        assert_eq!(result.processed, 2);
        assert_eq!(result.succeeded, 1);
        assert_eq!(result.failed, 1);
        assert_eq!(result.errors[0].id, "ghost");
        assert!(store.get_entity(&a.id).is_err());
    }

    #[test]
    fn test_atomic_rolls_back_everything() {
        let store = make_store();
        let a = store.create_entity(NewEntity::new("Alice", "person"), None).unwrap();
        let result = store.bulk_action(&request(
            BulkAction::SetDescription,
            vec![a.id.clone(), "ghost".to_string()],
            json!({"description": "changed"}),
            true,
        ));
        assert!(matches!(result, Err(Error::NotFound(_))));
        assert_eq!(store.get_entity(&a.id).unwrap().description, "");
    }

    #[test]
    fn test_set_type_and_namespace() {
        let store = make_store();
        let a = store.create_entity(NewEntity::new("Jordan", "person"), None).unwrap();
        store
            .bulk_action(&request(BulkAction::SetType, vec![a.id.clone()], json!({"type": "country"}), false))
            .unwrap();
        assert_eq!(store.get_entity(&a.id).unwrap().entity_type, "country");

        store
            .bulk_action(&request(BulkAction::SetNamespace, vec![a.id.clone()], json!({"namespace": "geo"}), false))
            .unwrap();
        let moved = store.get_entity(&a.id).unwrap();
        assert_eq!(moved.namespace, Some(NamespaceId::new("geo")));
        assert_eq!(moved.version, 3);

        store
            .bulk_action(&request(BulkAction::SetNamespace, vec![a.id.clone()], json!({"namespace": null}), false))
            .unwrap();
        assert_eq!(store.get_entity(&a.id).unwrap().namespace, None);
    }

    #[test]
    fn test_set_namespace_collision() {
        let store = make_store();
        let ns = NamespaceId::new("geo");
        store.create_entity(NewEntity::new("Jordan", "country"), Some(&ns)).unwrap();
        let a = store.create_entity(NewEntity::new("Jordan", "country"), None).unwrap();
        let result = store
            .bulk_action(&request(BulkAction::SetNamespace, vec![a.id.clone()], json!({"namespace": "geo"}), false))
            .unwrap();
        assert_eq!(result.failed, 1);
    }

    #[test]
    fn test_set_namespace_runs_validation_rules() {
        let store = make_store();
        store
            .set_validation_rules(&ValidationRule {
                entity_type: "country".into(),
                rules: vec![FieldRule {
                    field: RuleField::Name,
                    rule: RuleKind::UniqueAcrossTypes,
                    params: json!({"types": ["person"]}),
                    error_message: "Country names cannot clash with people".into(),
                }],
            })
            .unwrap();
        let ns = NamespaceId::new("geo");
        store.create_entity(NewEntity::new("Jordan", "person"), Some(&ns)).unwrap();
        let country = store.create_entity(NewEntity::new("Jordan", "country"), None).unwrap();

        let result = store
            .bulk_action(&request(
                BulkAction::SetNamespace,
                vec![country.id.clone()],
                json!({"namespace": "geo"}),
                false,
            ))
            .unwrap();
        assert_eq!(result.failed, 1);
        assert!(result.errors[0].error.contains("Country names cannot clash with people"));
        assert_eq!(store.get_entity(&country.id).unwrap().namespace, None);
    }

    #[test]
    fn test_invalid_payload_rejected_up_front() {
        let store = make_store();
        let a = store.create_entity(NewEntity::new("Alice", "person"), None).unwrap();
        let result = store.bulk_action(&request(BulkAction::AddTags, vec![a.id], json!({}), false));
        assert!(matches!(result, Err(Error::Validation(_))));
        let empty = store.bulk_action(&request(BulkAction::Delete, vec![], json!(null), false));
        assert!(matches!(empty, Err(Error::Validation(_))));
    }
}
