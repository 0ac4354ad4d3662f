//! Message store — the persistence collaborator behind a chat session.
//!
//! Holds user messages and final assistant answers. The orchestrator reads
//! a bounded tail of it as prior context; nothing else is persisted.
//!
//! Uses `rusqlite` in synchronous mode; calls are short single statements.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use super::errors::AgentError;
use super::types::StoredMessage;
use crate::inference::types::Role;

// ─── Trait ──────────────────────────────────────────────────────────────────

/// Append-only message log with bulk clear.
pub trait MessageStore: Send + Sync {
    fn append(&self, message: StoredMessage) -> Result<(), AgentError>;

    /// The last `n` messages, oldest first.
    fn get_recent(&self, n: usize) -> Result<Vec<StoredMessage>, AgentError>;

    fn get_all(&self) -> Result<Vec<StoredMessage>, AgentError>;

    /// Remove every message atomically.
    fn clear(&self) -> Result<(), AgentError>;
}

// ─── InMemoryStore ──────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct InMemoryStore {
    messages: Mutex<Vec<StoredMessage>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<StoredMessage>>, AgentError> {
        self.messages.lock().map_err(|_| AgentError::DatabaseError {
            reason: "message store lock poisoned".into(),
        })
    }
}

impl MessageStore for InMemoryStore {
    fn append(&self, message: StoredMessage) -> Result<(), AgentError> {
        self.lock()?.push(message);
        Ok(())
    }

    fn get_recent(&self, n: usize) -> Result<Vec<StoredMessage>, AgentError> {
        let messages = self.lock()?;
        let start = messages.len().saturating_sub(n);
        Ok(messages[start..].to_vec())
    }

    fn get_all(&self) -> Result<Vec<StoredMessage>, AgentError> {
        Ok(self.lock()?.clone())
    }

    fn clear(&self) -> Result<(), AgentError> {
        self.lock()?.clear();
        Ok(())
    }
}

// ─── SqliteStore ────────────────────────────────────────────────────────────

/// SQLite-backed store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AgentError> {
        let conn = Connection::open(path.as_ref())?;
        Self::init(conn)
    }

    /// An in-memory database, for tests and throwaway sessions.
    pub fn open_in_memory() -> Result<Self, AgentError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, AgentError> {
        // WAL mode so a reader never blocks the writer
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                timestamp TEXT NOT NULL
            );
            ",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, AgentError> {
        self.conn.lock().map_err(|_| AgentError::DatabaseError {
            reason: "sqlite connection lock poisoned".into(),
        })
    }

    fn query(&self, sql: &str, limit: i64) -> Result<Vec<StoredMessage>, AgentError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params![limit], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut messages = Vec::new();
        for row in rows {
            let (role, content, timestamp) = row?;
            messages.push(StoredMessage {
                role: str_to_role(&role),
                content,
                timestamp: parse_timestamp(&timestamp),
            });
        }
        Ok(messages)
    }
}

impl MessageStore for SqliteStore {
    fn append(&self, message: StoredMessage) -> Result<(), AgentError> {
        self.conn()?.execute(
            "INSERT INTO messages (role, content, timestamp) VALUES (?1, ?2, ?3)",
            params![
                message.role.as_str(),
                message.content,
                message.timestamp.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    fn get_recent(&self, n: usize) -> Result<Vec<StoredMessage>, AgentError> {
        let mut messages = self.query(
            "SELECT role, content, timestamp FROM messages ORDER BY id DESC LIMIT ?1",
            i64::try_from(n).unwrap_or(i64::MAX),
        )?;
        messages.reverse();
        Ok(messages)
    }

    fn get_all(&self) -> Result<Vec<StoredMessage>, AgentError> {
        // LIMIT -1 means no limit in SQLite
        self.query(
            "SELECT role, content, timestamp FROM messages ORDER BY id ASC LIMIT ?1",
            -1,
        )
    }

    fn clear(&self) -> Result<(), AgentError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM messages", [])?;
        tx.commit()?;
        Ok(())
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

fn str_to_role(s: &str) -> Role {
    match s {
        "system" => Role::System,
        "assistant" => Role::Assistant,
        "tool" => Role::Tool,
        _ => Role::User,
    }
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(store: &dyn MessageStore) {
        for i in 0..5 {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            store
                .append(StoredMessage::new(role, format!("message {i}")))
                .unwrap();
        }
    }

    fn contents(messages: &[StoredMessage]) -> Vec<&str> {
        messages.iter().map(|m| m.content.as_str()).collect()
    }

    #[test]
    fn test_in_memory_recent_is_oldest_first() {
        let store = InMemoryStore::new();
        fill(&store);
        let recent = store.get_recent(2).unwrap();
        assert_eq!(contents(&recent), vec!["message 3", "message 4"]);
        assert_eq!(store.get_recent(50).unwrap().len(), 5);
    }

    #[test]
    fn test_in_memory_clear() {
        let store = InMemoryStore::new();
        fill(&store);
        store.clear().unwrap();
        assert!(store.get_all().unwrap().is_empty());
    }

    #[test]
    fn test_sqlite_round_trip_preserves_role_and_order() {
        let store = SqliteStore::open_in_memory().unwrap();
        fill(&store);

        let all = store.get_all().unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all[0].role, Role::User);
        assert_eq!(all[1].role, Role::Assistant);

        let recent = store.get_recent(3).unwrap();
        assert_eq!(contents(&recent), vec!["message 2", "message 3", "message 4"]);
    }

    #[test]
    fn test_sqlite_clear_and_reuse() {
        let store = SqliteStore::open_in_memory().unwrap();
        fill(&store);
        store.clear().unwrap();
        assert!(store.get_recent(10).unwrap().is_empty());

        store.append(StoredMessage::new(Role::User, "fresh")).unwrap();
        assert_eq!(contents(&store.get_all().unwrap()), vec!["fresh"]);
    }

    #[test]
    fn test_sqlite_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.append(StoredMessage::new(Role::User, "kept")).unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(contents(&store.get_all().unwrap()), vec!["kept"]);
    }
}
