use rusqlite::{params, Connection};
use tracing::debug;
use uuid::Uuid;

use charla_core::types::ConversationStatus;

use crate::db::{now, Db};
use crate::error::{Result, StoreError};
use crate::types::Conversation;

const CONVERSATION_COLUMNS: &str =
    "id, user_id, status, context_summary, last_message_at, created_at, updated_at";

/// Conversation persistence with ownership-checked state transitions.
///
/// Write operations that name a conversation alongside a caller user id
/// reject mismatches with `AccessDenied`; the read path returns `None`
/// instead so callers cannot distinguish foreign rows from missing ones.
pub struct ConversationRepo {
    db: Db,
}

impl ConversationRepo {
    pub(crate) fn new(db: Db) -> Self {
        Self { db }
    }

    /// The active conversation with the greatest last-activity, or `None`.
    pub fn find_active_by_user(&self, user_id: &str) -> Result<Option<Conversation>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            &format!(
                "SELECT {CONVERSATION_COLUMNS} FROM conversations
                 WHERE user_id = ?1 AND status = 'active'
                 ORDER BY last_message_at DESC
                 LIMIT 1"
            ),
            params![user_id],
            row_to_conversation,
        ) {
            Ok(conversation) => Ok(Some(conversation)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    /// Fetch by id. When `as_user` is given and does not match the owner,
    /// the result is `None`.
    pub fn find_by_id(&self, id: &str, as_user: Option<&str>) -> Result<Option<Conversation>> {
        let db = self.db.lock().unwrap();
        let conversation = match db.query_row(
            &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"),
            params![id],
            row_to_conversation,
        ) {
            Ok(c) => c,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(StoreError::Database(e)),
        };
        if let Some(caller) = as_user {
            if conversation.user_id != caller {
                return Ok(None);
            }
        }
        Ok(Some(conversation))
    }

    /// Create a fresh active conversation for the user.
    pub fn create(&self, user_id: &str) -> Result<Conversation> {
        let id = Uuid::now_v7().to_string();
        let ts = now();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO conversations
             (id, user_id, status, last_message_at, created_at, updated_at)
             VALUES (?1, ?2, 'active', ?3, ?3, ?3)",
            params![id, user_id, ts],
        )?;
        debug!(conversation_id = %id, user_id, "conversation created");
        Ok(Conversation {
            id,
            user_id: user_id.to_string(),
            status: ConversationStatus::Active,
            context_summary: None,
            last_message_at: ts.clone(),
            created_at: ts.clone(),
            updated_at: ts,
        })
    }

    /// Bump last-activity to now.
    pub fn touch(&self, id: &str) -> Result<Conversation> {
        let ts = now();
        let db = self.db.lock().unwrap();
        let changed = db.execute(
            "UPDATE conversations SET last_message_at = ?1, updated_at = ?1 WHERE id = ?2",
            params![ts, id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound { id: id.to_string() });
        }
        read_back(&db, id)
    }

    /// Replace the context summary. Ownership-checked.
    pub fn set_summary(&self, id: &str, summary: &str, as_user: &str) -> Result<Conversation> {
        let db = self.db.lock().unwrap();
        load_owned(&db, id, as_user)?;
        db.execute(
            "UPDATE conversations SET context_summary = ?1, updated_at = ?2 WHERE id = ?3",
            params![summary, now(), id],
        )?;
        read_back(&db, id)
    }

    /// Transition active → closed. Ownership-checked.
    pub fn close(&self, id: &str, as_user: &str) -> Result<Conversation> {
        self.transition(id, as_user, ConversationStatus::Closed)
    }

    /// Transition active → archived. Ownership-checked.
    pub fn archive(&self, id: &str, as_user: &str) -> Result<Conversation> {
        self.transition(id, as_user, ConversationStatus::Archived)
    }

    fn transition(&self, id: &str, as_user: &str, to: ConversationStatus) -> Result<Conversation> {
        let db = self.db.lock().unwrap();
        let current = load_owned(&db, id, as_user)?;
        if current.status != ConversationStatus::Active {
            return Err(StoreError::InvalidState {
                id: id.to_string(),
                status: current.status.to_string(),
            });
        }
        db.execute(
            "UPDATE conversations SET status = ?1, updated_at = ?2
             WHERE id = ?3 AND status = 'active'",
            params![to.as_str(), now(), id],
        )?;
        debug!(conversation_id = %id, to = %to, "conversation transitioned");
        read_back(&db, id)
    }

    /// All conversations of a user, most recent activity first, optionally
    /// filtered by state.
    pub fn find_by_user(
        &self,
        user_id: &str,
        status: Option<ConversationStatus>,
    ) -> Result<Vec<Conversation>> {
        let db = self.db.lock().unwrap();
        let mut out = Vec::new();
        match status {
            Some(status) => {
                let mut stmt = db.prepare(&format!(
                    "SELECT {CONVERSATION_COLUMNS} FROM conversations
                     WHERE user_id = ?1 AND status = ?2
                     ORDER BY last_message_at DESC"
                ))?;
                let rows = stmt.query_map(params![user_id, status.as_str()], row_to_conversation)?;
                for row in rows {
                    out.push(row?);
                }
            }
            None => {
                let mut stmt = db.prepare(&format!(
                    "SELECT {CONVERSATION_COLUMNS} FROM conversations
                     WHERE user_id = ?1
                     ORDER BY last_message_at DESC"
                ))?;
                let rows = stmt.query_map(params![user_id], row_to_conversation)?;
                for row in rows {
                    out.push(row?);
                }
            }
        }
        Ok(out)
    }

    pub fn count_by_state(&self, status: ConversationStatus) -> Result<i64> {
        let db = self.db.lock().unwrap();
        Ok(db.query_row(
            "SELECT COUNT(*) FROM conversations WHERE status = ?1",
            params![status.as_str()],
            |row| row.get(0),
        )?)
    }

    pub fn count(&self) -> Result<i64> {
        let db = self.db.lock().unwrap();
        Ok(db.query_row("SELECT COUNT(*) FROM conversations", [], |row| row.get(0))?)
    }
}

/// Fetch a conversation, enforcing existence and ownership.
fn load_owned(db: &Connection, id: &str, as_user: &str) -> Result<Conversation> {
    let conversation = match db.query_row(
        &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"),
        params![id],
        row_to_conversation,
    ) {
        Ok(c) => c,
        Err(rusqlite::Error::QueryReturnedNoRows) => {
            return Err(StoreError::NotFound { id: id.to_string() })
        }
        Err(e) => return Err(StoreError::Database(e)),
    };
    if conversation.user_id != as_user {
        return Err(StoreError::AccessDenied { id: id.to_string() });
    }
    Ok(conversation)
}

fn read_back(db: &Connection, id: &str) -> Result<Conversation> {
    Ok(db.query_row(
        &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"),
        params![id],
        row_to_conversation,
    )?)
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    let status: String = row.get(2)?;
    let status = status.parse().map_err(|_| {
        rusqlite::Error::InvalidColumnType(2, "status".to_string(), rusqlite::types::Type::Text)
    })?;
    Ok(Conversation {
        id: row.get(0)?,
        user_id: row.get(1)?,
        status,
        context_summary: row.get(3)?,
        last_message_at: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Store;

    fn seeded() -> (Store, String, String) {
        let store = Store::open(":memory:").unwrap();
        let a = store.users.upsert("+14155550001", None, None).unwrap();
        let b = store.users.upsert("+14155550002", None, None).unwrap();
        (store, a.id, b.id)
    }

    #[test]
    fn create_is_active() {
        let (store, user_a, _) = seeded();
        let conversation = store.conversations.create(&user_a).unwrap();
        assert_eq!(conversation.status, ConversationStatus::Active);
        assert_eq!(conversation.user_id, user_a);
    }

    #[test]
    fn active_with_latest_activity_wins() {
        let (store, user_a, _) = seeded();
        let older = store.conversations.create(&user_a).unwrap();
        let newer = store.conversations.create(&user_a).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        store.conversations.touch(&newer.id).unwrap();

        let current = store
            .conversations
            .find_active_by_user(&user_a)
            .unwrap()
            .unwrap();
        assert_eq!(current.id, newer.id);

        // Closing the newer one promotes the older.
        store.conversations.close(&newer.id, &user_a).unwrap();
        let current = store
            .conversations
            .find_active_by_user(&user_a)
            .unwrap()
            .unwrap();
        assert_eq!(current.id, older.id);
    }

    #[test]
    fn find_by_id_hides_foreign_rows() {
        let (store, user_a, user_b) = seeded();
        let conversation = store.conversations.create(&user_a).unwrap();
        assert!(store
            .conversations
            .find_by_id(&conversation.id, Some(&user_b))
            .unwrap()
            .is_none());
        assert!(store
            .conversations
            .find_by_id(&conversation.id, Some(&user_a))
            .unwrap()
            .is_some());
    }

    #[test]
    fn close_by_non_owner_is_denied_without_side_effects() {
        let (store, user_a, user_b) = seeded();
        let conversation = store.conversations.create(&user_a).unwrap();

        let err = store.conversations.close(&conversation.id, &user_b).unwrap_err();
        assert!(matches!(err, StoreError::AccessDenied { .. }));

        let unchanged = store
            .conversations
            .find_by_id(&conversation.id, None)
            .unwrap()
            .unwrap();
        assert_eq!(unchanged.status, ConversationStatus::Active);
    }

    #[test]
    fn archive_by_non_owner_is_denied() {
        let (store, user_a, user_b) = seeded();
        let conversation = store.conversations.create(&user_a).unwrap();
        assert!(matches!(
            store.conversations.archive(&conversation.id, &user_b),
            Err(StoreError::AccessDenied { .. })
        ));
    }

    #[test]
    fn set_summary_by_non_owner_is_denied() {
        let (store, user_a, user_b) = seeded();
        let conversation = store.conversations.create(&user_a).unwrap();
        assert!(matches!(
            store.conversations.set_summary(&conversation.id, "hola", &user_b),
            Err(StoreError::AccessDenied { .. })
        ));
        let unchanged = store
            .conversations
            .find_by_id(&conversation.id, Some(&user_a))
            .unwrap()
            .unwrap();
        assert!(unchanged.context_summary.is_none());
    }

    #[test]
    fn transitions_require_active() {
        let (store, user_a, _) = seeded();
        let conversation = store.conversations.create(&user_a).unwrap();
        store.conversations.close(&conversation.id, &user_a).unwrap();
        assert!(matches!(
            store.conversations.archive(&conversation.id, &user_a),
            Err(StoreError::InvalidState { .. })
        ));
    }

    #[test]
    fn transition_of_missing_row_is_not_found() {
        let (store, user_a, _) = seeded();
        assert!(matches!(
            store.conversations.close("no-such-id", &user_a),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn counts_by_state() {
        let (store, user_a, _) = seeded();
        let c1 = store.conversations.create(&user_a).unwrap();
        store.conversations.create(&user_a).unwrap();
        store.conversations.close(&c1.id, &user_a).unwrap();
        assert_eq!(
            store.conversations.count_by_state(ConversationStatus::Active).unwrap(),
            1
        );
        assert_eq!(
            store.conversations.count_by_state(ConversationStatus::Closed).unwrap(),
            1
        );
        assert_eq!(store.conversations.count().unwrap(), 2);
    }
}
