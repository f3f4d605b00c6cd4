use rusqlite::params;
use tracing::debug;
use uuid::Uuid;

use charla_core::types::Role;

use crate::db::{now, Db};
use crate::error::{Result, StoreError};
use crate::types::{Message, NewMessage, TokenStats};

const MESSAGE_COLUMNS: &str =
    "id, conversation_id, role, content, provider_sid, metadata, tokens_used, latency_ms, created_at";

/// Append-only message persistence.
///
/// `provider_sid` carries a UNIQUE constraint; a violated insert surfaces
/// `DuplicateProviderSid` so the service layer can resolve the
/// lookup-then-insert race by re-reading the existing row.
pub struct MessageRepo {
    db: Db,
}

impl MessageRepo {
    pub(crate) fn new(db: Db) -> Self {
        Self { db }
    }

    pub fn create(&self, new: NewMessage) -> Result<Message> {
        let id = Uuid::now_v7().to_string();
        let ts = now();
        let metadata = new
            .metadata
            .as_ref()
            .map(|m| serde_json::to_string(m).unwrap_or_default());

        let db = self.db.lock().unwrap();
        let inserted = db.execute(
            "INSERT INTO messages
             (id, conversation_id, role, content, provider_sid, metadata,
              tokens_used, latency_ms, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                id,
                new.conversation_id,
                new.role.as_str(),
                new.content,
                new.provider_sid,
                metadata,
                new.tokens_used,
                new.latency_ms,
                ts,
            ],
        );

        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, Some(msg)))
                if e.code == rusqlite::ErrorCode::ConstraintViolation
                    && msg.contains("provider_sid") =>
            {
                return Err(StoreError::DuplicateProviderSid {
                    sid: new.provider_sid.unwrap_or_default(),
                });
            }
            Err(e) => return Err(StoreError::Database(e)),
        }

        debug!(message_id = %id, conversation_id = %new.conversation_id, role = %new.role, "message inserted");
        Ok(Message {
            id,
            conversation_id: new.conversation_id,
            role: new.role,
            content: new.content,
            provider_sid: new.provider_sid,
            metadata: new.metadata,
            tokens_used: new.tokens_used,
            latency_ms: new.latency_ms,
            created_at: ts,
        })
    }

    /// Idempotency probe by provider message id.
    pub fn find_by_provider_sid(&self, sid: &str) -> Result<Option<Message>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE provider_sid = ?1"),
            params![sid],
            row_to_message,
        ) {
            Ok(message) => Ok(Some(message)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    pub fn find_by_id(&self, id: &str) -> Result<Option<Message>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
            params![id],
            row_to_message,
        ) {
            Ok(message) => Ok(Some(message)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    /// All messages of a conversation, oldest first, optionally capped.
    pub fn find_by_conversation(
        &self,
        conversation_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Message>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE conversation_id = ?1
             ORDER BY created_at ASC, id ASC
             LIMIT ?2"
        ))?;
        let cap = limit.map(|n| n as i64).unwrap_or(-1);
        let rows = stmt.query_map(params![conversation_id, cap], row_to_message)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// The `n` most recent messages, returned oldest first.
    pub fn find_recent_by_conversation(&self, conversation_id: &str, n: usize) -> Result<Vec<Message>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE conversation_id = ?1
             ORDER BY created_at DESC, id DESC
             LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![conversation_id, n as i64], row_to_message)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        // Reverse so oldest first.
        out.reverse();
        Ok(out)
    }

    /// Replace the free-form metadata; the only mutable message field.
    pub fn update_metadata(&self, id: &str, metadata: serde_json::Value) -> Result<Message> {
        let raw = serde_json::to_string(&metadata).unwrap_or_default();
        let db = self.db.lock().unwrap();
        let changed = db.execute(
            "UPDATE messages SET metadata = ?1 WHERE id = ?2",
            params![raw, id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound { id: id.to_string() });
        }
        Ok(db.query_row(
            &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
            params![id],
            row_to_message,
        )?)
    }

    pub fn count_by_conversation(&self, conversation_id: &str) -> Result<i64> {
        let db = self.db.lock().unwrap();
        Ok(db.query_row(
            "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
            params![conversation_id],
            |row| row.get(0),
        )?)
    }

    /// Aggregate over rows with a non-null token count.
    pub fn token_stats(&self, conversation_id: &str) -> Result<TokenStats> {
        let db = self.db.lock().unwrap();
        Ok(db.query_row(
            "SELECT COALESCE(SUM(tokens_used), 0),
                    COUNT(tokens_used),
                    COALESCE(AVG(tokens_used), 0.0)
             FROM messages
             WHERE conversation_id = ?1 AND tokens_used IS NOT NULL",
            params![conversation_id],
            |row| {
                Ok(TokenStats {
                    total: row.get(0)?,
                    count: row.get(1)?,
                    avg: row.get(2)?,
                })
            },
        )?)
    }

    /// Delete everything but the `keep_n` most recent rows. Returns the
    /// number of deleted rows.
    pub fn delete_older_than(&self, conversation_id: &str, keep_n: usize) -> Result<usize> {
        let db = self.db.lock().unwrap();
        let deleted = db.execute(
            "DELETE FROM messages
             WHERE conversation_id = ?1 AND id NOT IN (
                 SELECT id FROM messages
                 WHERE conversation_id = ?1
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?2)",
            params![conversation_id, keep_n as i64],
        )?;
        if deleted > 0 {
            debug!(conversation_id, deleted, "old messages pruned");
        }
        Ok(deleted)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let role: String = row.get(2)?;
    let role: Role = role.parse().map_err(|_| {
        rusqlite::Error::InvalidColumnType(2, "role".to_string(), rusqlite::types::Type::Text)
    })?;
    let metadata: Option<String> = row.get(5)?;
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        role,
        content: row.get(3)?,
        provider_sid: row.get(4)?,
        metadata: metadata.and_then(|raw| serde_json::from_str(&raw).ok()),
        tokens_used: row.get(6)?,
        latency_ms: row.get(7)?,
        created_at: row.get(8)?,
    })
}
