//! Knowledge graph types
//!
//! Wire and storage types for entities, predicates and relationships.
//! All types use camelCase JSON serialization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of an isolated namespace ("brain"). `None` everywhere means
/// the global namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NamespaceId(pub String);

impl NamespaceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NamespaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Column value for a namespace. The global namespace is stored as `''` so
/// that the `(name, type, namespace)` unique index also covers it.
pub(crate) fn namespace_key(namespace: Option<&NamespaceId>) -> &str {
    namespace.map(NamespaceId::as_str).unwrap_or("")
}

pub(crate) fn namespace_from_column(value: String) -> Option<NamespaceId> {
    if value.is_empty() {
        None
    } else {
        Some(NamespaceId(value))
    }
}

/// A named, typed node in the knowledge graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub description: String,
    pub aliases: Vec<String>,
    pub tags: Vec<String>,
    pub namespace: Option<NamespaceId>,
    pub access_count: i64,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

/// Request body for creating (upserting) an entity
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEntity {
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl NewEntity {
    pub fn new(name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entity_type: entity_type.into(),
            ..Default::default()
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Trim name and type; both are required.
    pub(crate) fn normalized(mut self) -> crate::Result<Self> {
        self.name = self.name.trim().to_string();
        self.entity_type = self.entity_type.trim().to_string();
        if self.name.is_empty() {
            return Err(crate::Error::Validation("Entity name is required".to_string()));
        }
        if self.entity_type.is_empty() {
            return Err(crate::Error::Validation("Entity type is required".to_string()));
        }
        self.description = self.description.trim().to_string();
        self.aliases = dedup_strings(self.aliases);
        self.tags = dedup_strings(self.tags);
        Ok(self)
    }
}

/// Partial update for an entity. Lists given here replace the stored ones.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityUpdate {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub entity_type: Option<String>,
    pub description: Option<String>,
    pub aliases: Option<Vec<String>>,
    pub tags: Option<Vec<String>>,
    /// Reject the update with a conflict unless the stored version matches
    pub expected_version: Option<i64>,
}

/// A controlled-vocabulary edge label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Predicate {
    pub id: String,
    pub name: String,
    pub description: String,
    pub is_transitive: bool,
    pub is_symmetric: bool,
}

/// Request body for creating a predicate
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPredicate {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_transitive: bool,
    #[serde(default)]
    pub is_symmetric: bool,
}

/// Partial update for a predicate
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredicateUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub is_transitive: Option<bool>,
    pub is_symmetric: Option<bool>,
}

/// Verification state of an edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    #[default]
    Unverified,
    Verified,
    Refuted,
}

impl std::fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unverified => write!(f, "unverified"),
            Self::Verified => write!(f, "verified"),
            Self::Refuted => write!(f, "refuted"),
        }
    }
}

impl std::str::FromStr for VerificationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unverified" => Ok(Self::Unverified),
            "verified" => Ok(Self::Verified),
            "refuted" => Ok(Self::Refuted),
            other => Err(format!("unknown verification status: {}", other)),
        }
    }
}

/// A directed, predicate-labeled connection between two entities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    pub id: String,
    pub source_entity_id: String,
    pub target_entity_id: String,
    pub predicate_id: String,
    /// Predicate name, joined for convenience
    pub predicate: String,
    pub context: String,
    pub verification_status: VerificationStatus,
    pub last_verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Request body for creating an edge
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRelationship {
    pub source_entity_id: String,
    pub target_entity_id: String,
    pub predicate: String,
    #[serde(default)]
    pub context: String,
}

/// Partial update for an edge
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipUpdate {
    pub predicate: Option<String>,
    pub context: Option<String>,
    pub verification_status: Option<VerificationStatus>,
}

/// Result of an idempotent edge insert
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeOutcome {
    pub relationship: Relationship,
    /// False when an identical edge already existed and the insert was absorbed
    pub created: bool,
}

/// Normalize a predicate name to snake_case (`"Works At"` → `"works_at"`).
pub fn normalize_predicate(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_sep = false;
    let mut prev_lower = false;
    for ch in name.trim().chars() {
        if ch.is_alphanumeric() {
            if ch.is_uppercase() && prev_lower {
                pending_sep = true;
            }
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            prev_lower = ch.is_lowercase() || ch.is_numeric();
            out.extend(ch.to_lowercase());
        } else {
            pending_sep = true;
            prev_lower = false;
        }
    }
    out
}

/// Trim, drop empties and remove duplicates while keeping first-seen order.
pub(crate) fn dedup_strings(items: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        let item = item.trim().to_string();
        if !item.is_empty() && !out.contains(&item) {
            out.push(item);
        }
    }
    out
}
