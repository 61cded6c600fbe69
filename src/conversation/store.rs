//! Conversation log and message-entity links
//!
//! Messages are the episodic tier's source; `message_entities` rows record
//! which entities a message mentions and feed link prediction and merge
//! lineage.

use super::types::*;
use crate::error::{Error, Result};
use crate::storage::{parse_ts, stored_now, ts, Database};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::Arc;
use uuid::Uuid;

const MESSAGE_COLUMNS: &str = "id, conversation_id, role, content, created_at";

/// Conversation message store
pub struct ConversationStore {
    db: Arc<Database>,
}

fn row_to_message(row: &Row<'_>) -> rusqlite::Result<Message> {
    let role: String = row.get(2)?;
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        role: role.parse().unwrap_or(Role::User),
        content: row.get(3)?,
        entity_ids: Vec::new(),
        created_at: parse_ts(&row.get::<_, String>(4)?),
    })
}

fn entity_ids_in(conn: &Connection, message_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT entity_id FROM message_entities WHERE message_id = ?1 ORDER BY created_at, entity_id",
    )?;
    let rows = stmt.query_map(params![message_id], |row| row.get(0))?;
    Ok(rows.collect::<rusqlite::Result<Vec<String>>>()?)
}

fn with_entities(conn: &Connection, mut messages: Vec<Message>) -> Result<Vec<Message>> {
    for message in &mut messages {
        message.entity_ids = entity_ids_in(conn, &message.id)?;
    }
    Ok(messages)
}

/// Link a message to entities; unknown entity ids are rejected.
pub(crate) fn link_entities_in(
    conn: &Connection,
    message_id: &str,
    entity_ids: &[String],
) -> Result<usize> {
    let now = ts(&Utc::now());
    let mut linked = 0;
    for entity_id in entity_ids {
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM entity_definitions WHERE id = ?1)",
            params![entity_id],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(Error::NotFound(format!("Entity {} not found", entity_id)));
        }
        linked += conn.execute(
            "INSERT OR IGNORE INTO message_entities (message_id, entity_id, created_at)
             VALUES (?1, ?2, ?3)",
            params![message_id, entity_id, now],
        )?;
    }
    Ok(linked)
}

impl ConversationStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Append a message and link any entities it mentions.
    pub fn append(&self, conversation_id: &str, message: NewMessage) -> Result<Message> {
        if conversation_id.trim().is_empty() {
            return Err(Error::Validation("conversationId is required".to_string()));
        }
        self.db.transaction(|tx| {
            let id = message
                .id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            let created_at = stored_now();
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO conversation_messages (id, conversation_id, role, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, conversation_id, message.role.to_string(), message.content, ts(&created_at)],
            )?;
            if inserted == 0 {
                return Err(Error::Conflict(format!("Message {} already exists", id)));
            }
            link_entities_in(tx, &id, &message.mentioned_entity_ids)?;
            Ok(Message {
                entity_ids: entity_ids_in(tx, &id)?,
                id,
                conversation_id: conversation_id.to_string(),
                role: message.role,
                content: message.content,
                created_at,
            })
        })
    }

    pub fn get(&self, message_id: &str) -> Result<Option<Message>> {
        self.db.with_conn(|c| {
            let message = c
                .query_row(
                    &format!("SELECT {MESSAGE_COLUMNS} FROM conversation_messages WHERE id = ?1"),
                    params![message_id],
                    row_to_message,
                )
                .optional()?;
            match message {
                Some(m) => Ok(with_entities(c, vec![m])?.pop()),
                None => Ok(None),
            }
        })
    }

    /// All messages of a conversation, oldest first.
    pub fn list(&self, conversation_id: &str) -> Result<Vec<Message>> {
        self.db.with_conn(|c| {
            let mut stmt = c.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM conversation_messages
                 WHERE conversation_id = ?1 ORDER BY created_at, rowid"
            ))?;
            let rows = stmt
                .query_map(params![conversation_id], row_to_message)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            with_entities(c, rows)
        })
    }

    /// The last `n` messages of a conversation, oldest first.
    pub fn recent(&self, conversation_id: &str, n: usize) -> Result<Vec<Message>> {
        self.db.with_conn(|c| {
            let mut stmt = c.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM conversation_messages
                 WHERE conversation_id = ?1 ORDER BY created_at DESC, rowid DESC LIMIT ?2"
            ))?;
            let mut rows = stmt
                .query_map(params![conversation_id, n as i64], row_to_message)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.reverse();
            with_entities(c, rows)
        })
    }

    /// Link an existing message id (which need not be stored here) to entities.
    pub fn link_entities(&self, message_id: &str, entity_ids: &[String]) -> Result<usize> {
        self.db.transaction(|tx| link_entities_in(tx, message_id, entity_ids))
    }

    pub fn entities_for_message(&self, message_id: &str) -> Result<Vec<String>> {
        self.db.with_conn(|c| entity_ids_in(c, message_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphStore, NewEntity};

    fn make_stores() -> (ConversationStore, GraphStore) {
        let db = Arc::new(Database::in_memory().unwrap());
        (ConversationStore::new(db.clone()), GraphStore::new(db))
    }

    #[test]
    fn test_append_and_list() {
        let (store, _) = make_stores();
        store.append("c1", NewMessage::new(Role::User, "hi")).unwrap();
        store.append("c1", NewMessage::new(Role::Assistant, "hello")).unwrap();
        store.append("c2", NewMessage::new(Role::User, "other")).unwrap();

        let messages = store.list("c1").unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "hi");
        assert_eq!(messages[1].role, Role::Assistant);
    }

    #[test]
    fn test_recent_keeps_chronological_order() {
        let (store, _) = make_stores();
        for i in 0..5 {
            store
                .append("c1", NewMessage::new(Role::User, format!("turn {}", i)))
                .unwrap();
        }
        let recent = store.recent("c1", 2).unwrap();
        let contents: Vec<&str> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["turn 3", "turn 4"]);
    }

    #[test]
    fn test_mentions_become_links() {
        let (store, graph) = make_stores();
        let alice = graph.create_entity(NewEntity::new("Alice", "person"), None).unwrap();
        let message = store
            .append(
                "c1",
                NewMessage::new(Role::User, "Alice says hi")
                    .with_id("m1")
                    .mentioning(alice.id.clone()),
            )
            .unwrap();
        assert_eq!(message.id, "m1");
        assert_eq!(message.entity_ids, vec![alice.id.clone()]);
        assert_eq!(store.get("m1").unwrap().unwrap().entity_ids, vec![alice.id]);
    }

    #[test]
    fn test_unknown_mention_rolls_back() {
        let (store, _) = make_stores();
        let result = store.append(
            "c1",
            NewMessage::new(Role::User, "who?").with_id("m1").mentioning("ghost"),
        );
        assert!(matches!(result, Err(Error::NotFound(_))));
        assert!(store.get("m1").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_message_id_conflicts() {
        let (store, _) = make_stores();
        store.append("c1", NewMessage::new(Role::User, "a").with_id("m1")).unwrap();
        let again = store.append("c1", NewMessage::new(Role::User, "b").with_id("m1"));
        assert!(matches!(again, Err(Error::Conflict(_))));
    }

    #[test]
    fn test_link_entities_is_idempotent() {
        let (store, graph) = make_stores();
        let acme = graph.create_entity(NewEntity::new("Acme", "org"), None).unwrap();
        let ids = vec![acme.id.clone()];
        assert_eq!(store.link_entities("ai-1", &ids).unwrap(), 1);
        assert_eq!(store.link_entities("ai-1", &ids).unwrap(), 0);
        assert_eq!(store.entities_for_message("ai-1").unwrap(), ids);
    }
}
