//! Entity & relationship store
//!
//! SQLite-backed persistence for the knowledge graph. Free functions ending
//! in `_in` take a `&Connection` so they compose inside a larger transaction
//! (merge, split, bulk actions); the `GraphStore` methods wrap them in their
//! own transaction.
//!
//! Conflict handling:
//! - entities upsert on `(name, type, namespace)`: description, aliases and
//!   tags of the existing row are updated, never duplicated
//! - edges insert idempotently on `(source, target, predicate)`: a repeat is
//!   a successful no-op
//! - deleting an entity cascades to its edges and message links

use super::types::*;
use super::validation::{self, Candidate, ValidationRule};
use crate::error::{Error, Result};
use crate::storage::{decode_list, encode_list, parse_ts, stored_now, ts, Database};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::Arc;
use uuid::Uuid;

pub(crate) const ENTITY_COLUMNS: &str = "id, name, type, description, aliases, tags, namespace, \
     access_count, version, created_at, last_updated_at";

const PREDICATE_COLUMNS: &str = "id, name, description, is_transitive, is_symmetric";

const EDGE_SELECT: &str = "SELECT r.id, r.source_entity_id, r.target_entity_id, r.predicate_id, \
     p.name, r.context, r.verification_status, r.last_verified_at, r.created_at \
     FROM entity_relationships r JOIN predicate_definitions p ON p.id = r.predicate_id";

/// Filters for listing entities
#[derive(Debug, Clone, Default)]
pub struct EntityFilter {
    pub entity_type: Option<String>,
    /// Substring match on name or aliases
    pub query: Option<String>,
    pub limit: Option<usize>,
}

/// Knowledge graph store
#[derive(Clone)]
pub struct GraphStore {
    db: Arc<Database>,
}

impl GraphStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub(crate) fn db(&self) -> &Arc<Database> {
        &self.db
    }

    // =========================================================================
    // Entities
    // =========================================================================

    /// Validate and upsert an entity by `(name, type, namespace)`.
    pub fn create_entity(&self, entity: NewEntity, namespace: Option<&NamespaceId>) -> Result<Entity> {
        let entity = self
            .db
            .transaction(|tx| upsert_entity_in(tx, entity, namespace))?;
        tracing::debug!(entity_id = %entity.id, name = %entity.name, "Upserted entity");
        Ok(entity)
    }

    pub fn get_entity(&self, id: &str) -> Result<Entity> {
        self.db.with_conn(|c| get_entity_in(c, id))
    }

    pub fn list_entities(
        &self,
        namespace: Option<&NamespaceId>,
        filter: &EntityFilter,
    ) -> Result<Vec<Entity>> {
        self.db.with_conn(|c| list_entities_in(c, namespace, filter))
    }

    /// Exact-name lookup within a namespace, oldest first.
    pub fn find_entities_by_name(
        &self,
        name: &str,
        namespace: Option<&NamespaceId>,
    ) -> Result<Vec<Entity>> {
        self.db.with_conn(|c| find_by_name_in(c, name, namespace))
    }

    pub fn update_entity(&self, id: &str, update: EntityUpdate) -> Result<Entity> {
        self.db.transaction(|tx| update_entity_in(tx, id, update))
    }

    /// Delete an entity; its edges and message links cascade.
    pub fn delete_entity(&self, id: &str) -> Result<()> {
        self.db.with_conn(|c| delete_entity_in(c, id))?;
        tracing::debug!(entity_id = %id, "Deleted entity");
        Ok(())
    }

    /// Increment `accessCount` for each entity read by a retrieval path.
    pub fn record_access(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.db.transaction(|tx| {
            let mut stmt = tx.prepare(
                "UPDATE entity_definitions SET access_count = access_count + 1 WHERE id = ?1",
            )?;
            for id in ids {
                stmt.execute(params![id])?;
            }
            Ok(())
        })
    }

    // =========================================================================
    // Predicates
    // =========================================================================

    pub fn list_predicates(&self) -> Result<Vec<Predicate>> {
        self.db.with_conn(list_predicates_in)
    }

    pub fn get_predicate(&self, id: &str) -> Result<Predicate> {
        self.db.with_conn(|c| get_predicate_in(c, id))
    }

    /// Create a predicate, or redefine an existing one with the same name.
    pub fn create_predicate(&self, predicate: NewPredicate) -> Result<Predicate> {
        self.db.with_conn(|c| create_predicate_in(c, predicate))
    }

    pub fn update_predicate(&self, id: &str, update: PredicateUpdate) -> Result<Predicate> {
        self.db.transaction(|tx| update_predicate_in(tx, id, update))
    }

    /// Delete a predicate. Fails with a conflict while edges still use it.
    pub fn delete_predicate(&self, id: &str) -> Result<()> {
        self.db.transaction(|tx| delete_predicate_in(tx, id))
    }

    // =========================================================================
    // Relationships
    // =========================================================================

    /// Upsert the predicate by name, then insert the edge idempotently.
    pub fn create_edge(
        &self,
        source_id: &str,
        predicate: &str,
        target_id: &str,
        context: &str,
    ) -> Result<EdgeOutcome> {
        let outcome = self
            .db
            .transaction(|tx| create_edge_in(tx, source_id, predicate, target_id, context))?;
        if outcome.created {
            tracing::debug!(
                edge_id = %outcome.relationship.id,
                predicate = %outcome.relationship.predicate,
                "Created edge"
            );
        }
        Ok(outcome)
    }

    pub fn get_edge(&self, id: &str) -> Result<Relationship> {
        self.db.with_conn(|c| get_edge_in(c, id))
    }

    /// List edges, optionally restricted to those touching one entity.
    pub fn list_edges(&self, entity_id: Option<&str>) -> Result<Vec<Relationship>> {
        self.db.with_conn(|c| match entity_id {
            Some(id) => edges_for_entity_in(c, id),
            None => {
                let mut stmt = c.prepare(&format!("{EDGE_SELECT} ORDER BY r.created_at"))?;
                let rows = stmt.query_map([], row_to_relationship)?;
                Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
            }
        })
    }

    pub fn delete_edge(&self, id: &str) -> Result<()> {
        self.db.with_conn(|c| {
            let n = c.execute("DELETE FROM entity_relationships WHERE id = ?1", params![id])?;
            if n == 0 {
                return Err(Error::NotFound(format!("Relationship {} not found", id)));
            }
            Ok(())
        })
    }

    /// Relabel an edge. If the relabeled edge would duplicate an existing
    /// one, the two collapse and the existing edge is returned.
    pub fn update_edge_predicate(&self, id: &str, predicate: &str) -> Result<Relationship> {
        self.db
            .transaction(|tx| update_edge_predicate_in(tx, id, predicate))
    }

    /// Update predicate, context and/or verification status.
    pub fn update_edge(&self, id: &str, update: RelationshipUpdate) -> Result<Relationship> {
        self.db.transaction(|tx| {
            let mut edge = get_edge_in(tx, id)?;
            if let Some(predicate) = update.predicate.as_deref() {
                edge = update_edge_predicate_in(tx, &edge.id, predicate)?;
            }
            if let Some(context) = update.context {
                tx.execute(
                    "UPDATE entity_relationships SET context = ?1 WHERE id = ?2",
                    params![context.trim(), edge.id],
                )?;
            }
            if let Some(status) = update.verification_status {
                let verified_at = match status {
                    VerificationStatus::Unverified => None,
                    _ => Some(ts(&Utc::now())),
                };
                tx.execute(
                    "UPDATE entity_relationships
                     SET verification_status = ?1, last_verified_at = ?2 WHERE id = ?3",
                    params![status.to_string(), verified_at, edge.id],
                )?;
            }
            get_edge_in(tx, &edge.id)
        })
    }

    /// Whether any edge connects the two entities, in either direction.
    pub fn edge_exists_between(&self, a: &str, b: &str) -> Result<bool> {
        self.db.with_conn(|c| edge_exists_between_in(c, a, b))
    }

    // =========================================================================
    // Validation rules
    // =========================================================================

    pub fn list_validation_rules(&self) -> Result<Vec<ValidationRule>> {
        self.db.with_conn(validation::list_rules)
    }

    pub fn get_validation_rules(&self, entity_type: &str) -> Result<Option<ValidationRule>> {
        self.db.with_conn(|c| validation::load_rules(c, entity_type))
    }

    pub fn set_validation_rules(&self, rule_set: &ValidationRule) -> Result<()> {
        self.db.with_conn(|c| validation::save_rules(c, rule_set))
    }

    pub fn delete_validation_rules(&self, entity_type: &str) -> Result<()> {
        if self
            .db
            .with_conn(|c| validation::delete_rules(c, entity_type))?
        {
            Ok(())
        } else {
            Err(Error::NotFound(format!(
                "No validation rules for type {}",
                entity_type
            )))
        }
    }
}

// =============================================================================
// Entity helpers
// =============================================================================

pub(crate) fn row_to_entity(row: &Row<'_>) -> rusqlite::Result<Entity> {
    Ok(Entity {
        id: row.get(0)?,
        name: row.get(1)?,
        entity_type: row.get(2)?,
        description: row.get(3)?,
        aliases: decode_list(&row.get::<_, String>(4)?),
        tags: decode_list(&row.get::<_, String>(5)?),
        namespace: namespace_from_column(row.get(6)?),
        access_count: row.get(7)?,
        version: row.get(8)?,
        created_at: parse_ts(&row.get::<_, String>(9)?),
        last_updated_at: parse_ts(&row.get::<_, String>(10)?),
    })
}

pub(crate) fn get_entity_in(conn: &Connection, id: &str) -> Result<Entity> {
    conn.query_row(
        &format!("SELECT {ENTITY_COLUMNS} FROM entity_definitions WHERE id = ?1"),
        params![id],
        row_to_entity,
    )
    .optional()?
    .ok_or_else(|| Error::NotFound(format!("Entity {} not found", id)))
}

fn find_by_key_in(
    conn: &Connection,
    name: &str,
    entity_type: &str,
    namespace: Option<&NamespaceId>,
) -> Result<Option<Entity>> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {ENTITY_COLUMNS} FROM entity_definitions
                 WHERE name = ?1 AND type = ?2 AND namespace = ?3"
            ),
            params![name, entity_type, namespace_key(namespace)],
            row_to_entity,
        )
        .optional()?)
}

pub(crate) fn find_by_name_in(
    conn: &Connection,
    name: &str,
    namespace: Option<&NamespaceId>,
) -> Result<Vec<Entity>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ENTITY_COLUMNS} FROM entity_definitions
         WHERE name = ?1 AND namespace = ?2 ORDER BY created_at, id"
    ))?;
    let rows = stmt.query_map(params![name.trim(), namespace_key(namespace)], row_to_entity)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub(crate) fn list_entities_in(
    conn: &Connection,
    namespace: Option<&NamespaceId>,
    filter: &EntityFilter,
) -> Result<Vec<Entity>> {
    let limit = filter.limit.map(|l| l as i64).unwrap_or(-1);
    let mut stmt = conn.prepare(&format!(
        "SELECT {ENTITY_COLUMNS} FROM entity_definitions
         WHERE namespace = ?1
           AND (?2 IS NULL OR type = ?2)
           AND (?3 IS NULL OR name LIKE '%' || ?3 || '%' OR aliases LIKE '%' || ?3 || '%')
         ORDER BY name, type
         LIMIT ?4"
    ))?;
    let rows = stmt.query_map(
        params![
            namespace_key(namespace),
            filter.entity_type,
            filter.query,
            limit
        ],
        row_to_entity,
    )?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub(crate) fn upsert_entity_in(
    conn: &Connection,
    entity: NewEntity,
    namespace: Option<&NamespaceId>,
) -> Result<Entity> {
    let entity = entity.normalized()?;
    let now = stored_now();

    match find_by_key_in(conn, &entity.name, &entity.entity_type, namespace)? {
        Some(mut existing) => {
            let mut aliases = existing.aliases.clone();
            aliases.extend(entity.aliases);
            let aliases = dedup_strings(aliases);
            let mut tags = existing.tags.clone();
            tags.extend(entity.tags);
            let tags = dedup_strings(tags);
            let description = if entity.description.is_empty() {
                existing.description.clone()
            } else {
                entity.description
            };

            if aliases == existing.aliases
                && tags == existing.tags
                && description == existing.description
            {
                return Ok(existing);
            }

            validation::validate(
                conn,
                &Candidate {
                    id: Some(&existing.id),
                    name: &existing.name,
                    entity_type: &existing.entity_type,
                    description: &description,
                    aliases: &aliases,
                    tags: &tags,
                    namespace,
                },
            )?;

            conn.execute(
                "UPDATE entity_definitions
                 SET description = ?1, aliases = ?2, tags = ?3,
                     version = version + 1, last_updated_at = ?4
                 WHERE id = ?5",
                params![description, encode_list(&aliases), encode_list(&tags), ts(&now), existing.id],
            )?;

            existing.description = description;
            existing.aliases = aliases;
            existing.tags = tags;
            existing.version += 1;
            existing.last_updated_at = now;
            Ok(existing)
        }
        None => {
            validation::validate(
                conn,
                &Candidate {
                    id: None,
                    name: &entity.name,
                    entity_type: &entity.entity_type,
                    description: &entity.description,
                    aliases: &entity.aliases,
                    tags: &entity.tags,
                    namespace,
                },
            )?;

            let created = Entity {
                id: Uuid::new_v4().to_string(),
                name: entity.name,
                entity_type: entity.entity_type,
                description: entity.description,
                aliases: entity.aliases,
                tags: entity.tags,
                namespace: namespace.cloned(),
                access_count: 0,
                version: 1,
                created_at: now,
                last_updated_at: now,
            };
            conn.execute(
                "INSERT INTO entity_definitions
                 (id, name, type, description, aliases, tags, namespace,
                  access_count, version, created_at, last_updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, 1, ?8, ?8)",
                params![
                    created.id,
                    created.name,
                    created.entity_type,
                    created.description,
                    encode_list(&created.aliases),
                    encode_list(&created.tags),
                    namespace_key(namespace),
                    ts(&now),
                ],
            )?;
            Ok(created)
        }
    }
}

pub(crate) fn update_entity_in(conn: &Connection, id: &str, update: EntityUpdate) -> Result<Entity> {
    let mut entity = get_entity_in(conn, id)?;
    if let Some(expected) = update.expected_version {
        if expected != entity.version {
            return Err(Error::Conflict(format!(
                "Entity {} is at version {}, expected {}",
                id, entity.version, expected
            )));
        }
    }

    if let Some(name) = update.name {
        entity.name = name.trim().to_string();
    }
    if let Some(entity_type) = update.entity_type {
        entity.entity_type = entity_type.trim().to_string();
    }
    if entity.name.is_empty() || entity.entity_type.is_empty() {
        return Err(Error::Validation(
            "Entity name and type must not be empty".to_string(),
        ));
    }
    if let Some(description) = update.description {
        entity.description = description.trim().to_string();
    }
    if let Some(aliases) = update.aliases {
        entity.aliases = dedup_strings(aliases);
    }
    if let Some(tags) = update.tags {
        entity.tags = dedup_strings(tags);
    }

    if let Some(other) = find_by_key_in(
        conn,
        &entity.name,
        &entity.entity_type,
        entity.namespace.as_ref(),
    )? {
        if other.id != entity.id {
            return Err(Error::Conflict(format!(
                "An entity named '{}' of type '{}' already exists",
                entity.name, entity.entity_type
            )));
        }
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
            namespace: entity.namespace.as_ref(),
        },
    )?;

    let now = stored_now();
    conn.execute(
        "UPDATE entity_definitions
         SET name = ?1, type = ?2, description = ?3, aliases = ?4, tags = ?5,
             version = version + 1, last_updated_at = ?6
         WHERE id = ?7",
        params![
            entity.name,
            entity.entity_type,
            entity.description,
            encode_list(&entity.aliases),
            encode_list(&entity.tags),
            ts(&now),
            entity.id
        ],
    )?;
    entity.version += 1;
    entity.last_updated_at = now;
    Ok(entity)
}

pub(crate) fn delete_entity_in(conn: &Connection, id: &str) -> Result<()> {
    let n = conn.execute("DELETE FROM entity_definitions WHERE id = ?1", params![id])?;
    if n == 0 {
        return Err(Error::NotFound(format!("Entity {} not found", id)));
    }
    Ok(())
}

// =============================================================================
// Predicate helpers
// =============================================================================

fn row_to_predicate(row: &Row<'_>) -> rusqlite::Result<Predicate> {
    Ok(Predicate {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        is_transitive: row.get(3)?,
        is_symmetric: row.get(4)?,
    })
}

fn list_predicates_in(conn: &Connection) -> Result<Vec<Predicate>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {PREDICATE_COLUMNS} FROM predicate_definitions ORDER BY name"
    ))?;
    let rows = stmt.query_map([], row_to_predicate)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn get_predicate_in(conn: &Connection, id: &str) -> Result<Predicate> {
    conn.query_row(
        &format!("SELECT {PREDICATE_COLUMNS} FROM predicate_definitions WHERE id = ?1"),
        params![id],
        row_to_predicate,
    )
    .optional()?
    .ok_or_else(|| Error::NotFound(format!("Predicate {} not found", id)))
}

fn predicate_by_name_in(conn: &Connection, name: &str) -> Result<Option<Predicate>> {
    Ok(conn
        .query_row(
            &format!("SELECT {PREDICATE_COLUMNS} FROM predicate_definitions WHERE name = ?1"),
            params![name],
            row_to_predicate,
        )
        .optional()?)
}

fn checked_predicate_name(name: &str) -> Result<String> {
    let normalized = normalize_predicate(name);
    if normalized.is_empty() {
        return Err(Error::Validation("Predicate name is required".to_string()));
    }
    Ok(normalized)
}

/// Fetch a predicate by name, creating a bare definition if it is new.
pub(crate) fn ensure_predicate_in(conn: &Connection, name: &str) -> Result<Predicate> {
    let name = checked_predicate_name(name)?;
    conn.execute(
        "INSERT OR IGNORE INTO predicate_definitions (id, name, description, is_transitive, is_symmetric)
         VALUES (?1, ?2, '', 0, 0)",
        params![Uuid::new_v4().to_string(), name],
    )?;
    predicate_by_name_in(conn, &name)?
        .ok_or_else(|| Error::Internal(format!("Predicate {} vanished after insert", name)))
}

fn create_predicate_in(conn: &Connection, predicate: NewPredicate) -> Result<Predicate> {
    let name = checked_predicate_name(&predicate.name)?;
    conn.execute(
        "INSERT INTO predicate_definitions (id, name, description, is_transitive, is_symmetric)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(name) DO UPDATE SET
            description = excluded.description,
            is_transitive = excluded.is_transitive,
            is_symmetric = excluded.is_symmetric",
        params![
            Uuid::new_v4().to_string(),
            name,
            predicate.description.trim(),
            predicate.is_transitive,
            predicate.is_symmetric
        ],
    )?;
    predicate_by_name_in(conn, &name)?
        .ok_or_else(|| Error::Internal(format!("Predicate {} vanished after insert", name)))
}

fn update_predicate_in(conn: &Connection, id: &str, update: PredicateUpdate) -> Result<Predicate> {
    let mut predicate = get_predicate_in(conn, id)?;
    if let Some(name) = update.name {
        let name = checked_predicate_name(&name)?;
        if let Some(other) = predicate_by_name_in(conn, &name)? {
            if other.id != predicate.id {
                return Err(Error::Conflict(format!("Predicate '{}' already exists", name)));
            }
        }
        predicate.name = name;
    }
    if let Some(description) = update.description {
        predicate.description = description.trim().to_string();
    }
    if let Some(flag) = update.is_transitive {
        predicate.is_transitive = flag;
    }
    if let Some(flag) = update.is_symmetric {
        predicate.is_symmetric = flag;
    }
    conn.execute(
        "UPDATE predicate_definitions
         SET name = ?1, description = ?2, is_transitive = ?3, is_symmetric = ?4
         WHERE id = ?5",
        params![
            predicate.name,
            predicate.description,
            predicate.is_transitive,
            predicate.is_symmetric,
            predicate.id
        ],
    )?;
    Ok(predicate)
}

fn delete_predicate_in(conn: &Connection, id: &str) -> Result<()> {
    let predicate = get_predicate_in(conn, id)?;
    let in_use: i64 = conn.query_row(
        "SELECT COUNT(*) FROM entity_relationships WHERE predicate_id = ?1",
        params![id],
        |row| row.get(0),
    )?;
    if in_use > 0 {
        return Err(Error::Conflict(format!(
            "Predicate '{}' is used by {} relationship(s)",
            predicate.name, in_use
        )));
    }
    conn.execute("DELETE FROM predicate_definitions WHERE id = ?1", params![id])?;
    Ok(())
}

// =============================================================================
// Edge helpers
// =============================================================================

pub(crate) fn row_to_relationship(row: &Row<'_>) -> rusqlite::Result<Relationship> {
    let status: String = row.get(6)?;
    let verified_at: Option<String> = row.get(7)?;
    Ok(Relationship {
        id: row.get(0)?,
        source_entity_id: row.get(1)?,
        target_entity_id: row.get(2)?,
        predicate_id: row.get(3)?,
        predicate: row.get(4)?,
        context: row.get(5)?,
        verification_status: status.parse().unwrap_or_default(),
        last_verified_at: verified_at.as_deref().map(parse_ts),
        created_at: parse_ts(&row.get::<_, String>(8)?),
    })
}

pub(crate) fn get_edge_in(conn: &Connection, id: &str) -> Result<Relationship> {
    conn.query_row(
        &format!("{EDGE_SELECT} WHERE r.id = ?1"),
        params![id],
        row_to_relationship,
    )
    .optional()?
    .ok_or_else(|| Error::NotFound(format!("Relationship {} not found", id)))
}

fn edge_by_triple_in(
    conn: &Connection,
    source_id: &str,
    target_id: &str,
    predicate_id: &str,
) -> Result<Option<Relationship>> {
    Ok(conn
        .query_row(
            &format!(
                "{EDGE_SELECT} WHERE r.source_entity_id = ?1 AND r.target_entity_id = ?2
                 AND r.predicate_id = ?3"
            ),
            params![source_id, target_id, predicate_id],
            row_to_relationship,
        )
        .optional()?)
}

/// Delete symmetric edges touching the entity whose reverse also exists,
/// keeping one edge per pair. Returns the number of edges removed.
pub(crate) fn collapse_symmetric_reverses_in(conn: &Connection, entity_id: &str) -> Result<usize> {
    Ok(conn.execute(
        "DELETE FROM entity_relationships WHERE id IN (
            SELECT r.id FROM entity_relationships r
            JOIN predicate_definitions p ON p.id = r.predicate_id
            JOIN entity_relationships rev
              ON rev.source_entity_id = r.target_entity_id
             AND rev.target_entity_id = r.source_entity_id
             AND rev.predicate_id = r.predicate_id
            WHERE p.is_symmetric = 1
              AND (r.source_entity_id = ?1 OR r.target_entity_id = ?1)
              AND r.id > rev.id
        )",
        params![entity_id],
    )?)
}

/// All edges where the entity is source or target.
pub(crate) fn edges_for_entity_in(conn: &Connection, entity_id: &str) -> Result<Vec<Relationship>> {
    let mut stmt = conn.prepare(&format!(
        "{EDGE_SELECT} WHERE r.source_entity_id = ?1 OR r.target_entity_id = ?1
         ORDER BY r.created_at, r.id"
    ))?;
    let rows = stmt.query_map(params![entity_id], row_to_relationship)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub(crate) fn edge_exists_between_in(conn: &Connection, a: &str, b: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM entity_relationships
         WHERE (source_entity_id = ?1 AND target_entity_id = ?2)
            OR (source_entity_id = ?2 AND target_entity_id = ?1)",
        params![a, b],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub(crate) fn create_edge_in(
    conn: &Connection,
    source_id: &str,
    predicate: &str,
    target_id: &str,
    context: &str,
) -> Result<EdgeOutcome> {
    if source_id == target_id {
        return Err(Error::Validation(
            "An entity cannot be related to itself".to_string(),
        ));
    }
    get_entity_in(conn, source_id)?;
    get_entity_in(conn, target_id)?;
    let predicate = ensure_predicate_in(conn, predicate)?;

    if predicate.is_symmetric {
        if let Some(reverse) = edge_by_triple_in(conn, target_id, source_id, &predicate.id)? {
            return Ok(EdgeOutcome {
                relationship: reverse,
                created: false,
            });
        }
    }

    let inserted = conn.execute(
        "INSERT OR IGNORE INTO entity_relationships
         (id, source_entity_id, target_entity_id, predicate_id, context,
          verification_status, last_verified_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 'unverified', NULL, ?6)",
        params![
            Uuid::new_v4().to_string(),
            source_id,
            target_id,
            predicate.id,
            context.trim(),
            ts(&Utc::now())
        ],
    )?;

    let relationship = edge_by_triple_in(conn, source_id, target_id, &predicate.id)?
        .ok_or_else(|| Error::Internal("Edge vanished after insert".to_string()))?;
    Ok(EdgeOutcome {
        relationship,
        created: inserted > 0,
    })
}

pub(crate) fn update_edge_predicate_in(
    conn: &Connection,
    id: &str,
    predicate: &str,
) -> Result<Relationship> {
    let edge = get_edge_in(conn, id)?;
    let predicate = ensure_predicate_in(conn, predicate)?;
    if predicate.id == edge.predicate_id {
        return Ok(edge);
    }

    if predicate.is_symmetric {
        if let Some(reverse) =
            edge_by_triple_in(conn, &edge.target_entity_id, &edge.source_entity_id, &predicate.id)?
        {
            conn.execute("DELETE FROM entity_relationships WHERE id = ?1", params![id])?;
            return Ok(reverse);
        }
    }

    let updated = conn.execute(
        "UPDATE OR IGNORE entity_relationships SET predicate_id = ?1 WHERE id = ?2",
        params![predicate.id, id],
    )?;
    if updated == 0 {
        // Relabeling would duplicate an existing edge: collapse into it.
        conn.execute("DELETE FROM entity_relationships WHERE id = ?1", params![id])?;
        return edge_by_triple_in(
            conn,
            &edge.source_entity_id,
            &edge.target_entity_id,
            &predicate.id,
        )?
        .ok_or_else(|| Error::Internal("Collapsed edge not found".to_string()));
    }
    get_edge_in(conn, id)
}
