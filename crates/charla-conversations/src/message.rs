use std::sync::Arc;

use tracing::{debug, warn};

use charla_cache::KvStore;
use charla_core::types::Role;
use charla_store::{Message, NewMessage, Result, Store, StoreError, TokenStats};

use crate::context::{cache_key, ContextEntry, CONTEXT_WINDOW};

/// Appends turns and exposes the context window.
///
/// Owns both repositories so that the activity bump after an append stays
/// in one place; there is no call back into the conversation service.
pub struct MessageService {
    store: Arc<Store>,
    kv: Arc<dyn KvStore>,
}

impl MessageService {
    pub fn new(store: Arc<Store>, kv: Arc<dyn KvStore>) -> Self {
        Self { store, kv }
    }

    /// Append a user turn, at most once per provider SID.
    ///
    /// A known SID returns the existing row untouched. The probe-then-insert
    /// race resolves through the store's uniqueness constraint: the loser
    /// re-reads the winner's row.
    pub async fn save_user(
        &self,
        conversation_id: &str,
        content: &str,
        provider_sid: Option<&str>,
    ) -> Result<Message> {
        if let Some(sid) = provider_sid {
            if let Some(existing) = self.store.messages.find_by_provider_sid(sid)? {
                debug!(conversation_id, "duplicate provider sid, returning existing turn");
                return Ok(existing);
            }
        }

        let mut new = NewMessage::new(conversation_id, Role::User, content);
        new.provider_sid = provider_sid.map(String::from);
        match self.store.messages.create(new) {
            Ok(message) => {
                self.bump(conversation_id).await?;
                Ok(message)
            }
            Err(StoreError::DuplicateProviderSid { sid }) => {
                // Lost the insert race; the winner's row is authoritative
                // and already bumped the conversation.
                self.store
                    .messages
                    .find_by_provider_sid(&sid)?
                    .ok_or(StoreError::NotFound { id: sid })
            }
            Err(e) => Err(e),
        }
    }

    /// Append an assistant turn with its usage metrics.
    pub async fn save_assistant(
        &self,
        conversation_id: &str,
        content: &str,
        tokens_used: Option<i64>,
        latency_ms: Option<i64>,
    ) -> Result<Message> {
        let mut new = NewMessage::new(conversation_id, Role::Assistant, content);
        new.tokens_used = tokens_used;
        new.latency_ms = latency_ms;
        let message = self.store.messages.create(new)?;
        self.bump(conversation_id).await?;
        Ok(message)
    }

    /// Append a system turn.
    pub async fn save_system(&self, conversation_id: &str, content: &str) -> Result<Message> {
        let message = self
            .store
            .messages
            .create(NewMessage::new(conversation_id, Role::System, content))?;
        self.bump(conversation_id).await?;
        Ok(message)
    }

    /// The last ten `(role, content)` pairs, oldest first.
    ///
    /// Cache-first: an existing context document is read loosely — only the
    /// two consumed fields are checked — and any shape problem falls back
    /// to the store.
    pub async fn recent_context(&self, conversation_id: &str) -> Result<Vec<ContextEntry>> {
        match self.kv.get(&cache_key(conversation_id)).await {
            Ok(Some(raw)) => {
                if let Some(entries) = extract_context(&raw) {
                    debug!(conversation_id, "context served from cache");
                    return Ok(entries);
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!(conversation_id, error = %e, "context cache unavailable, reading store");
            }
        }

        let messages = self
            .store
            .messages
            .find_recent_by_conversation(conversation_id, CONTEXT_WINDOW)?;
        Ok(messages
            .into_iter()
            .map(|m| ContextEntry {
                role: m.role,
                content: m.content,
            })
            .collect())
    }

    pub fn count(&self, conversation_id: &str) -> Result<i64> {
        self.store.messages.count_by_conversation(conversation_id)
    }

    pub fn token_stats(&self, conversation_id: &str) -> Result<TokenStats> {
        self.store.messages.token_stats(conversation_id)
    }

    pub fn exists(&self, provider_sid: &str) -> Result<bool> {
        Ok(self
            .store
            .messages
            .find_by_provider_sid(provider_sid)?
            .is_some())
    }

    /// Prune the conversation to its `keep_n` most recent rows and drop the
    /// cached context. Returns the deleted count.
    pub async fn cleanup_old(&self, conversation_id: &str, keep_n: usize) -> Result<usize> {
        let deleted = self
            .store
            .messages
            .delete_older_than(conversation_id, keep_n)?;
        self.invalidate(conversation_id).await;
        Ok(deleted)
    }

    async fn bump(&self, conversation_id: &str) -> Result<()> {
        self.store.conversations.touch(conversation_id)?;
        self.invalidate(conversation_id).await;
        Ok(())
    }

    async fn invalidate(&self, conversation_id: &str) {
        if let Err(e) = self.kv.del(&cache_key(conversation_id)).await {
            warn!(conversation_id, error = %e, "failed to invalidate context cache");
        }
    }
}

/// Pull `(role, content)` pairs out of a raw context document without full
/// schema validation. Any shape mismatch yields `None`.
fn extract_context(raw: &str) -> Option<Vec<ContextEntry>> {
    let doc: serde_json::Value = serde_json::from_str(raw).ok()?;
    let messages = doc.get("messages")?.as_array()?;
    let mut out = Vec::with_capacity(messages.len());
    for message in messages {
        let role: Role = message.get("role")?.as_str()?.parse().ok()?;
        let content = message.get("content")?.as_str()?.to_string();
        out.push(ContextEntry { role, content });
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use charla_cache::MemoryKv;

    const SID: &str = "SMaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    fn setup() -> (MessageService, Arc<Store>, Arc<MemoryKv>, String) {
        let store = Arc::new(Store::open(":memory:").unwrap());
        let kv = Arc::new(MemoryKv::new());
        let user = store.users.upsert("+14155550001", None, None).unwrap();
        let conversation = store.conversations.create(&user.id).unwrap();
        (
            MessageService::new(store.clone(), kv.clone()),
            store,
            kv,
            conversation.id,
        )
    }

    #[tokio::test]
    async fn save_user_is_idempotent_per_sid() {
        let (svc, store, _kv, conversation) = setup();
        let first = svc.save_user(&conversation, "Hola", Some(SID)).await.unwrap();
        let second = svc
            .save_user(&conversation, "texto distinto", Some(SID))
            .await
            .unwrap();
        // The second call returns the first row; its content is ignored.
        assert_eq!(first.id, second.id);
        assert_eq!(second.content, "Hola");
        assert_eq!(store.messages.count_by_conversation(&conversation).unwrap(), 1);
    }

    #[tokio::test]
    async fn save_user_without_sid_always_appends() {
        let (svc, store, _kv, conversation) = setup();
        svc.save_user(&conversation, "uno", None).await.unwrap();
        svc.save_user(&conversation, "dos", None).await.unwrap();
        assert_eq!(store.messages.count_by_conversation(&conversation).unwrap(), 2);
    }

    #[tokio::test]
    async fn appends_bump_conversation_activity() {
        let (svc, store, _kv, conversation) = setup();
        let before = store
            .conversations
            .find_by_id(&conversation, None)
            .unwrap()
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        svc.save_user(&conversation, "Hola", None).await.unwrap();
        let after = store
            .conversations
            .find_by_id(&conversation, None)
            .unwrap()
            .unwrap();
        assert!(after.last_message_at > before.last_message_at);
    }

    #[tokio::test]
    async fn save_assistant_records_metrics() {
        let (svc, store, _kv, conversation) = setup();
        svc.save_assistant(&conversation, "¡Hola!", Some(150), Some(900))
            .await
            .unwrap();
        let stats = store.messages.token_stats(&conversation).unwrap();
        assert_eq!(stats.total, 150);
        assert_eq!(stats.count, 1);
    }

    #[tokio::test]
    async fn token_stats_grow_by_saved_tokens() {
        let (svc, _store, _kv, conversation) = setup();
        svc.save_assistant(&conversation, "a", Some(100), None).await.unwrap();
        let before = svc.token_stats(&conversation).unwrap();
        svc.save_assistant(&conversation, "b", Some(40), None).await.unwrap();
        let after = svc.token_stats(&conversation).unwrap();
        assert_eq!(after.total - before.total, 40);
    }

    #[tokio::test]
    async fn recent_context_prefers_cache() {
        let (svc, _store, kv, conversation) = setup();
        let doc = serde_json::json!({
            "id": conversation,
            "messages": [
                {"role": "user", "content": "desde la cache"},
            ],
        });
        kv.set_ex(&cache_key(&conversation), &doc.to_string(), 3600)
            .await
            .unwrap();

        let context = svc.recent_context(&conversation).await.unwrap();
        assert_eq!(context.len(), 1);
        assert_eq!(context[0].content, "desde la cache");
    }

    #[tokio::test]
    async fn recent_context_falls_back_on_malformed_cache() {
        let (svc, _store, kv, conversation) = setup();
        svc.save_user(&conversation, "desde la base", None).await.unwrap();
        kv.set_ex(&cache_key(&conversation), "not json", 3600)
            .await
            .unwrap();

        let context = svc.recent_context(&conversation).await.unwrap();
        assert_eq!(context.len(), 1);
        assert_eq!(context[0].content, "desde la base");
    }

    #[tokio::test]
    async fn recent_context_reads_store_on_miss() {
        let (svc, _store, _kv, conversation) = setup();
        for i in 0..12 {
            svc.save_user(&conversation, &format!("m{i}"), None).await.unwrap();
        }
        let context = svc.recent_context(&conversation).await.unwrap();
        assert_eq!(context.len(), 10);
        assert_eq!(context[0].content, "m2");
        assert_eq!(context[9].content, "m11");
    }

    #[tokio::test]
    async fn appends_invalidate_cached_context() {
        let (svc, _store, kv, conversation) = setup();
        kv.set_ex(&cache_key(&conversation), "{}", 3600).await.unwrap();
        svc.save_user(&conversation, "Hola", None).await.unwrap();
        assert!(kv.get(&cache_key(&conversation)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn exists_reflects_sid_presence() {
        let (svc, _store, _kv, conversation) = setup();
        assert!(!svc.exists(SID).unwrap());
        svc.save_user(&conversation, "Hola", Some(SID)).await.unwrap();
        assert!(svc.exists(SID).unwrap());
    }

    #[tokio::test]
    async fn cleanup_old_prunes_and_invalidates() {
        let (svc, store, kv, conversation) = setup();
        for i in 0..15 {
            svc.save_user(&conversation, &format!("m{i}"), None).await.unwrap();
        }
        kv.set_ex(&cache_key(&conversation), "{}", 3600).await.unwrap();

        let deleted = svc.cleanup_old(&conversation, 10).await.unwrap();
        assert_eq!(deleted, 5);
        assert_eq!(store.messages.count_by_conversation(&conversation).unwrap(), 10);
        assert!(kv.get(&cache_key(&conversation)).await.unwrap().is_none());
    }
}
