use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::conversations::ConversationRepo;
use crate::error::Result;
use crate::messages::MessageRepo;
use crate::users::UserRepo;

/// Shared handle to the single process-wide SQLite connection.
pub(crate) type Db = Arc<Mutex<Connection>>;

/// The three repositories over one shared connection.
pub struct Store {
    pub users: UserRepo,
    pub conversations: ConversationRepo,
    pub messages: MessageRepo,
}

impl Store {
    /// Open (or create) the database at `url` and initialise the schema.
    ///
    /// Accepts a plain path, `sqlite://<path>`, or `:memory:`.
    pub fn open(url: &str) -> Result<Self> {
        let path = url.strip_prefix("sqlite://").unwrap_or(url);
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(path)?
        };
        Self::from_connection(conn)
    }

    /// Wrap an already-open connection; used by tests with in-memory DBs.
    pub fn from_connection(conn: Connection) -> Result<Self> {
        // Cascading deletes require foreign-key enforcement, off by default
        // in SQLite.
        conn.pragma_update(None, "foreign_keys", true)?;
        init_db(&conn)?;
        let db: Db = Arc::new(Mutex::new(conn));
        Ok(Self {
            users: UserRepo::new(db.clone()),
            conversations: ConversationRepo::new(db.clone()),
            messages: MessageRepo::new(db),
        })
    }
}

/// Initialise all tables and indices. Safe to call on every startup —
/// `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS users (
            id           TEXT PRIMARY KEY NOT NULL,
            phone_number TEXT NOT NULL UNIQUE,
            display_name TEXT,
            language     TEXT NOT NULL DEFAULT 'es',
            created_at   TEXT NOT NULL,
            updated_at   TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS conversations (
            id              TEXT PRIMARY KEY NOT NULL,
            user_id         TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            status          TEXT NOT NULL DEFAULT 'active'
                            CHECK (status IN ('active', 'closed', 'archived')),
            context_summary TEXT,
            last_message_at TEXT NOT NULL,
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY NOT NULL,
            conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
            role            TEXT NOT NULL CHECK (role IN ('user', 'assistant', 'system')),
            content         TEXT NOT NULL,
            provider_sid    TEXT UNIQUE,
            metadata        TEXT,
            tokens_used     INTEGER,
            latency_ms      INTEGER,
            created_at      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_conversations_user
            ON conversations(user_id);
        CREATE INDEX IF NOT EXISTS idx_conversations_last_message
            ON conversations(last_message_at);
        CREATE INDEX IF NOT EXISTS idx_conversations_status_user
            ON conversations(status, user_id);
        CREATE INDEX IF NOT EXISTS idx_conversations_created
            ON conversations(created_at);
        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id);
        CREATE INDEX IF NOT EXISTS idx_messages_created
            ON messages(created_at);
        CREATE INDEX IF NOT EXISTS idx_messages_role_conversation
            ON messages(role, conversation_id);",
    )?;
    Ok(())
}

/// Current instant as RFC3339 with microsecond precision.
///
/// Fixed precision keeps lexicographic order equal to chronological order
/// for the TEXT timestamp columns.
pub(crate) fn now() -> String {
    chrono::Utc::now()
        .to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        init_db(&conn).unwrap();
    }

    #[test]
    fn timestamps_sort_lexicographically() {
        let a = now();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = now();
        assert!(a < b);
        assert_eq!(a.len(), b.len());
    }

    #[test]
    fn open_strips_sqlite_prefix() {
        let store = Store::open("sqlite://:memory:").unwrap();
        assert_eq!(store.users.count().unwrap(), 0);
    }
}
