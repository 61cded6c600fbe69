//! Relational store
//!
//! A single SQLite connection behind a mutex. Every multi-step mutation
//! (merge, split, atomic bulk actions) goes through [`Database::transaction`],
//! which opens a `BEGIN IMMEDIATE` transaction, commits when the closure
//! returns `Ok`, and rolls back on any error.

mod schema;

use crate::error::{Error, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::Path;

/// Thread-safe database wrapper
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the database file and run migrations
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        tracing::info!("Opened database at {}", path.display());
        Self::init(conn)
    }

    /// In-memory database (tests and ephemeral runs)
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        schema::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run a read or single-statement write against the connection.
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Run `f` inside one write transaction.
    ///
    /// Either every statement issued by `f` is committed or none is.
    pub fn transaction<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

/// Run store work on tokio's blocking pool so SQLite calls never stall the
/// async workers and callers' timeouts stay effective.
pub async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Internal(format!("Blocking task failed: {}", e)))?
}

/// Format a timestamp the way every table stores it (RFC 3339, millisecond precision)
pub(crate) fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Current time truncated to the precision timestamps are stored with, so a
/// value returned from a write equals the same row read back.
pub(crate) fn stored_now() -> DateTime<Utc> {
    parse_ts(&ts(&Utc::now()))
}

/// Parse a stored timestamp, falling back to the epoch for corrupt values
pub(crate) fn parse_ts(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

/// Encode a string list as a JSON column
pub(crate) fn encode_list(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

/// Decode a JSON list column, treating corrupt values as empty
pub(crate) fn decode_list(value: &str) -> Vec<String> {
    serde_json::from_str(value).unwrap_or_default()
}
