//! Per-type entity validation rules
//!
//! Rules are evaluated before an entity is created or updated. A violation
//! rejects the write with the rule's configured message; data is never
//! silently rewritten to satisfy a rule.

use super::types::{namespace_key, NamespaceId};
use crate::error::{Error, Result};
use regex::Regex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

/// Entity field a rule applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleField {
    Name,
    Description,
    Aliases,
    Tags,
}

/// Kind of constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// Field must be non-empty
    Required,
    /// `params.value`: minimum character count
    MinLength,
    /// `params.value`: maximum character count
    MaxLength,
    /// `params.pattern`: regex the field must match
    Pattern,
    /// `params.values`: allowed values
    OneOf,
    /// `params.types`: no entity of a *different* listed type may share the name
    UniqueAcrossTypes,
}

/// A single field constraint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldRule {
    pub field: RuleField,
    pub rule: RuleKind,
    #[serde(default)]
    pub params: serde_json::Value,
    pub error_message: String,
}

/// All rules for one entity type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRule {
    pub entity_type: String,
    pub rules: Vec<FieldRule>,
}

/// The values a rule set is checked against
pub(crate) struct Candidate<'a> {
    pub id: Option<&'a str>,
    pub name: &'a str,
    pub entity_type: &'a str,
    pub description: &'a str,
    pub aliases: &'a [String],
    pub tags: &'a [String],
    pub namespace: Option<&'a NamespaceId>,
}

impl Candidate<'_> {
    fn values(&self, field: RuleField) -> Vec<&str> {
        match field {
            RuleField::Name => vec![self.name],
            RuleField::Description => vec![self.description],
            RuleField::Aliases => self.aliases.iter().map(String::as_str).collect(),
            RuleField::Tags => self.tags.iter().map(String::as_str).collect(),
        }
    }
}

/// Reject rule sets whose params cannot be evaluated (bad regex, missing values).
pub(crate) fn check_rule_definitions(rules: &[FieldRule]) -> Result<()> {
    for rule in rules {
        let ok = match rule.rule {
            RuleKind::Required => true,
            RuleKind::MinLength | RuleKind::MaxLength => rule.params["value"].as_u64().is_some(),
            RuleKind::Pattern => match rule.params["pattern"].as_str() {
                Some(p) => Regex::new(p).is_ok(),
                None => false,
            },
            RuleKind::OneOf => rule.params["values"].is_array(),
            RuleKind::UniqueAcrossTypes => {
                rule.field == RuleField::Name && rule.params["types"].is_array()
            }
        };
        if !ok {
            return Err(Error::Validation(format!(
                "Invalid parameters for {:?} rule on {:?}",
                rule.rule, rule.field
            )));
        }
    }
    Ok(())
}

/// Evaluate every rule for the candidate's type.
pub(crate) fn validate(conn: &Connection, candidate: &Candidate<'_>) -> Result<()> {
    let Some(rule_set) = load_rules(conn, candidate.entity_type)? else {
        return Ok(());
    };

    for rule in &rule_set.rules {
        let values = candidate.values(rule.field);
        let passed = match rule.rule {
            RuleKind::Required => values.iter().any(|v| !v.trim().is_empty()),
            RuleKind::MinLength => {
                let min = rule.params["value"].as_u64().unwrap_or(0) as usize;
                values.iter().all(|v| v.chars().count() >= min)
            }
            RuleKind::MaxLength => {
                let max = rule.params["value"].as_u64().unwrap_or(u64::MAX) as usize;
                values.iter().all(|v| v.chars().count() <= max)
            }
            RuleKind::Pattern => {
                let pattern = rule.params["pattern"].as_str().unwrap_or("");
                let re = Regex::new(pattern)
                    .map_err(|e| Error::Validation(format!("Invalid rule pattern: {}", e)))?;
                values.iter().all(|v| v.is_empty() || re.is_match(v))
            }
            RuleKind::OneOf => {
                let allowed = string_list(&rule.params["values"]);
                values.iter().all(|v| allowed.iter().any(|a| a == v))
            }
            RuleKind::UniqueAcrossTypes => !name_taken_by_other_type(conn, candidate, rule)?,
        };

        if !passed {
            return Err(Error::Validation(rule.error_message.clone()));
        }
    }
    Ok(())
}

fn name_taken_by_other_type(
    conn: &Connection,
    candidate: &Candidate<'_>,
    rule: &FieldRule,
) -> Result<bool> {
    let types = string_list(&rule.params["types"]);
    let mut stmt = conn.prepare(
        "SELECT id, type FROM entity_definitions
         WHERE name = ?1 COLLATE NOCASE AND namespace = ?2",
    )?;
    let rows = stmt.query_map(
        params![candidate.name, namespace_key(candidate.namespace)],
        |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
    )?;
    for row in rows {
        let (id, entity_type) = row?;
        if Some(id.as_str()) == candidate.id || entity_type == candidate.entity_type {
            continue;
        }
        if types.iter().any(|t| *t == entity_type) {
            return Ok(true);
        }
    }
    Ok(false)
}

fn string_list(value: &serde_json::Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) fn load_rules(conn: &Connection, entity_type: &str) -> Result<Option<ValidationRule>> {
    let rules: Option<String> = conn
        .query_row(
            "SELECT rules FROM entity_type_validation_rules WHERE entity_type = ?1",
            params![entity_type],
            |row| row.get(0),
        )
        .optional()?;
    match rules {
        Some(json) => Ok(Some(ValidationRule {
            entity_type: entity_type.to_string(),
            rules: serde_json::from_str(&json)?,
        })),
        None => Ok(None),
    }
}

pub(crate) fn list_rules(conn: &Connection) -> Result<Vec<ValidationRule>> {
    let mut stmt = conn.prepare(
        "SELECT entity_type, rules FROM entity_type_validation_rules ORDER BY entity_type",
    )?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
    let mut out = Vec::new();
    for row in rows {
        let (entity_type, json) = row?;
        out.push(ValidationRule {
            entity_type,
            rules: serde_json::from_str(&json)?,
        });
    }
    Ok(out)
}

pub(crate) fn save_rules(conn: &Connection, rule_set: &ValidationRule) -> Result<()> {
    check_rule_definitions(&rule_set.rules)?;
    conn.execute(
        "INSERT INTO entity_type_validation_rules (entity_type, rules) VALUES (?1, ?2)
         ON CONFLICT(entity_type) DO UPDATE SET rules = excluded.rules",
        params![rule_set.entity_type, serde_json::to_string(&rule_set.rules)?],
    )?;
    Ok(())
}

pub(crate) fn delete_rules(conn: &Connection, entity_type: &str) -> Result<bool> {
    let n = conn.execute(
        "DELETE FROM entity_type_validation_rules WHERE entity_type = ?1",
        params![entity_type],
    )?;
    Ok(n > 0)
}
