use rusqlite::params;
use tracing::debug;
use uuid::Uuid;

use crate::db::{now, Db};
use crate::error::{Result, StoreError};
use crate::types::User;

const USER_COLUMNS: &str = "id, phone_number, display_name, language, created_at, updated_at";

/// Phone-keyed user persistence. All store errors propagate unwrapped.
pub struct UserRepo {
    db: Db,
}

impl UserRepo {
    pub(crate) fn new(db: Db) -> Self {
        Self { db }
    }

    pub fn find_by_phone(&self, phone: &str) -> Result<Option<User>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE phone_number = ?1"),
            params![phone],
            row_to_user,
        ) {
            Ok(user) => Ok(Some(user)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    pub fn find_by_id(&self, id: &str) -> Result<Option<User>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            params![id],
            row_to_user,
        ) {
            Ok(user) => Ok(Some(user)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    /// Atomic create-or-update keyed on the phone number.
    ///
    /// On create, language defaults to `es`. On update only the supplied
    /// fields change; `None` keeps the stored value.
    pub fn upsert(
        &self,
        phone: &str,
        display_name: Option<&str>,
        language: Option<&str>,
    ) -> Result<User> {
        let id = Uuid::now_v7().to_string();
        let ts = now();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO users (id, phone_number, display_name, language, created_at, updated_at)
             VALUES (?1, ?2, ?3, COALESCE(?4, 'es'), ?5, ?5)
             ON CONFLICT(phone_number) DO UPDATE SET
                 display_name = COALESCE(excluded.display_name, users.display_name),
                 language     = COALESCE(?4, users.language),
                 updated_at   = ?5",
            params![id, phone, display_name, language, ts],
        )?;

        // Read back — the row may predate this call.
        let user = db.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE phone_number = ?1"),
            params![phone],
            row_to_user,
        )?;
        debug!(user_id = %user.id, "user upserted");
        Ok(user)
    }

    pub fn count(&self) -> Result<i64> {
        let db = self.db.lock().unwrap();
        Ok(db.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?)
    }
}

/// Map a SELECT row (column order from USER_COLUMNS) to a User.
fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        phone_number: row.get(1)?,
        display_name: row.get(2)?,
        language: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use crate::db::Store;

    fn store() -> Store {
        Store::open(":memory:").unwrap()
    }

    #[test]
    fn upsert_creates_with_default_language() {
        let store = store();
        let user = store.users.upsert("+14155550001", None, None).unwrap();
        assert_eq!(user.phone_number, "+14155550001");
        assert_eq!(user.language, "es");
        assert!(user.display_name.is_none());
        assert_eq!(store.users.count().unwrap(), 1);
    }

    #[test]
    fn upsert_updates_only_supplied_fields() {
        let store = store();
        store.users.upsert("+14155550001", Some("Ana"), None).unwrap();
        let updated = store
            .users
            .upsert("+14155550001", None, Some("en"))
            .unwrap();
        // Name kept, language changed.
        assert_eq!(updated.display_name.as_deref(), Some("Ana"));
        assert_eq!(updated.language, "en");
        assert_eq!(store.users.count().unwrap(), 1);
    }

    #[test]
    fn upsert_preserves_created_at() {
        let store = store();
        let created = store.users.upsert("+14155550001", None, None).unwrap();
        let again = store.users.upsert("+14155550001", Some("Ana"), None).unwrap();
        assert_eq!(created.id, again.id);
        assert_eq!(created.created_at, again.created_at);
    }

    #[test]
    fn find_by_phone_missing_is_none() {
        let store = store();
        assert!(store.users.find_by_phone("+10000000000").unwrap().is_none());
    }

    #[test]
    fn find_by_id_round_trips() {
        let store = store();
        let user = store.users.upsert("+14155550001", None, None).unwrap();
        let found = store.users.find_by_id(&user.id).unwrap().unwrap();
        assert_eq!(found.phone_number, user.phone_number);
    }
}
