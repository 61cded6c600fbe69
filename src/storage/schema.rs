// Schema migrations. Every statement is idempotent; new tables or indexes are
// appended at the end rather than editing existing DDL.

use crate::error::Result;
use rusqlite::Connection;

pub(crate) fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS entity_definitions (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            type TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            aliases TEXT NOT NULL DEFAULT '[]',
            tags TEXT NOT NULL DEFAULT '[]',
            namespace TEXT NOT NULL DEFAULT '',
            access_count INTEGER NOT NULL DEFAULT 0,
            version INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            last_updated_at TEXT NOT NULL,
            UNIQUE (name, type, namespace)
        );

        CREATE INDEX IF NOT EXISTS idx_entities_name ON entity_definitions(name, namespace);

        CREATE TABLE IF NOT EXISTS predicate_definitions (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            description TEXT NOT NULL DEFAULT '',
            is_transitive INTEGER NOT NULL DEFAULT 0,
            is_symmetric INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS entity_relationships (
            id TEXT PRIMARY KEY,
            source_entity_id TEXT NOT NULL,
            target_entity_id TEXT NOT NULL,
            predicate_id TEXT NOT NULL,
            context TEXT NOT NULL DEFAULT '',
            verification_status TEXT NOT NULL DEFAULT 'unverified',
            last_verified_at TEXT,
            created_at TEXT NOT NULL,
            UNIQUE (source_entity_id, target_entity_id, predicate_id),
            FOREIGN KEY (source_entity_id) REFERENCES entity_definitions(id) ON DELETE CASCADE,
            FOREIGN KEY (target_entity_id) REFERENCES entity_definitions(id) ON DELETE CASCADE,
            FOREIGN KEY (predicate_id) REFERENCES predicate_definitions(id)
        );

        CREATE INDEX IF NOT EXISTS idx_relationships_source ON entity_relationships(source_entity_id);
        CREATE INDEX IF NOT EXISTS idx_relationships_target ON entity_relationships(target_entity_id);

        CREATE TABLE IF NOT EXISTS entity_type_validation_rules (
            entity_type TEXT PRIMARY KEY,
            rules TEXT NOT NULL DEFAULT '[]'
        );

        CREATE TABLE IF NOT EXISTS conversation_messages (
            id TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL,
            role TEXT NOT NULL,
            content TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON conversation_messages(conversation_id, created_at);

        CREATE TABLE IF NOT EXISTS message_entities (
            message_id TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (message_id, entity_id),
            FOREIGN KEY (entity_id) REFERENCES entity_definitions(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_message_entities_entity ON message_entities(entity_id);

        CREATE TABLE IF NOT EXISTS pipeline_runs (
            id TEXT PRIMARY KEY,
            message_id TEXT NOT NULL,
            pipeline_type TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'running',
            final_output TEXT,
            error_message TEXT,
            start_time TEXT NOT NULL,
            end_time TEXT,
            duration_ms INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_pipeline_runs_message ON pipeline_runs(message_id);

        CREATE TABLE IF NOT EXISTS pipeline_run_steps (
            id TEXT PRIMARY KEY,
            run_id TEXT NOT NULL,
            step_order INTEGER NOT NULL,
            step_name TEXT NOT NULL,
            status TEXT NOT NULL,
            input_payload TEXT,
            output_payload TEXT,
            model_used TEXT,
            prompt_used TEXT,
            config_used TEXT,
            error_message TEXT,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            duration_ms INTEGER NOT NULL,
            UNIQUE (run_id, step_order),
            FOREIGN KEY (run_id) REFERENCES pipeline_runs(id) ON DELETE CASCADE
        );
        ",
    )?;
    Ok(())
}
