use std::sync::Arc;

use tracing::{debug, warn};

use charla_cache::KvStore;
use charla_store::{Conversation, Result, Store, StoreError, User};

use crate::context::{
    cache_key, CachedConversation, ContextEntry, ConversationWithMessages, CONTEXT_CACHE_TTL_SECS,
    CONTEXT_WINDOW,
};

/// Resolves users and their current conversation, and owns the context
/// cache: key layout, TTL, invalidation, and schema-validated reads.
pub struct ConversationService {
    store: Arc<Store>,
    kv: Arc<dyn KvStore>,
}

impl ConversationService {
    pub fn new(store: Arc<Store>, kv: Arc<dyn KvStore>) -> Self {
        Self { store, kv }
    }

    /// Upsert the user for `phone` and return their current active
    /// conversation, creating a fresh one when none exists.
    pub fn get_or_create(
        &self,
        phone: &str,
        display_name: Option<&str>,
    ) -> Result<(Conversation, User)> {
        let user = self.store.users.upsert(phone, display_name, None)?;
        if let Some(conversation) = self.store.conversations.find_active_by_user(&user.id)? {
            return Ok((conversation, user));
        }
        let conversation = self.store.conversations.create(&user.id)?;
        Ok((conversation, user))
    }

    /// Cache-first fetch of a conversation with its recent messages.
    ///
    /// A hit must deserialize against the document schema; a failing entry
    /// is deleted and the store consulted. The store fallback trims to the
    /// last ten messages and repopulates the cache.
    pub async fn get_with_context(&self, conversation_id: &str) -> Result<ConversationWithMessages> {
        let key = cache_key(conversation_id);
        match self.kv.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str::<CachedConversation>(&raw) {
                Ok(doc) => {
                    debug!(conversation_id, "context cache hit");
                    return Ok(doc.into());
                }
                Err(e) => {
                    warn!(conversation_id, error = %e, "context cache document failed validation, evicting");
                    if let Err(e) = self.kv.del(&key).await {
                        warn!(conversation_id, error = %e, "failed to evict invalid cache entry");
                    }
                }
            },
            Ok(None) => {}
            Err(e) => {
                // Cache outage never blocks the read path.
                warn!(conversation_id, error = %e, "context cache unavailable, reading store");
            }
        }

        let conversation = self
            .store
            .conversations
            .find_by_id(conversation_id, None)?
            .ok_or_else(|| StoreError::NotFound {
                id: conversation_id.to_string(),
            })?;
        let messages = self
            .store
            .messages
            .find_recent_by_conversation(conversation_id, CONTEXT_WINDOW)?;

        let doc = CachedConversation::from_parts(&conversation, &messages);
        match serde_json::to_string(&doc) {
            Ok(raw) => {
                if let Err(e) = self.kv.set_ex(&key, &raw, CONTEXT_CACHE_TTL_SECS).await {
                    warn!(conversation_id, error = %e, "failed to populate context cache");
                }
            }
            Err(e) => warn!(conversation_id, error = %e, "failed to serialize context document"),
        }

        Ok(ConversationWithMessages {
            conversation,
            messages,
        })
    }

    /// Bump last-activity and drop the cached context.
    pub async fn touch(&self, conversation_id: &str) -> Result<Conversation> {
        let conversation = self.store.conversations.touch(conversation_id)?;
        self.invalidate(conversation_id).await;
        Ok(conversation)
    }

    /// Ownership-checked active → closed transition.
    pub async fn close(&self, conversation_id: &str, as_user: &str) -> Result<Conversation> {
        let conversation = self.store.conversations.close(conversation_id, as_user)?;
        self.invalidate(conversation_id).await;
        Ok(conversation)
    }

    /// Ownership-checked active → archived transition.
    pub async fn archive(&self, conversation_id: &str, as_user: &str) -> Result<Conversation> {
        let conversation = self.store.conversations.archive(conversation_id, as_user)?;
        self.invalidate(conversation_id).await;
        Ok(conversation)
    }

    /// Ownership-checked summary update.
    pub async fn update_summary(
        &self,
        conversation_id: &str,
        summary: &str,
        as_user: &str,
    ) -> Result<Conversation> {
        let conversation = self
            .store
            .conversations
            .set_summary(conversation_id, summary, as_user)?;
        self.invalidate(conversation_id).await;
        Ok(conversation)
    }

    /// The last ten `(role, content)` pairs, oldest first, straight from
    /// the store.
    pub fn recent_context(&self, conversation_id: &str) -> Result<Vec<ContextEntry>> {
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

    /// Drop the cached context document. Cache failures are logged, never
    /// surfaced.
    pub async fn invalidate(&self, conversation_id: &str) {
        if let Err(e) = self.kv.del(&cache_key(conversation_id)).await {
            warn!(conversation_id, error = %e, "failed to invalidate context cache");
        }
    }
}
