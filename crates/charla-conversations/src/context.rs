//! The cached context document and its wire format.

use serde::{Deserialize, Deserializer, Serialize};

use charla_core::types::{ConversationStatus, Role};
use charla_store::{Conversation, Message};

/// Context cache entries expire after an hour.
pub const CONTEXT_CACHE_TTL_SECS: u64 = 3600;
/// Messages kept in the context window.
pub const CONTEXT_WINDOW: usize = 10;

pub fn cache_key(conversation_id: &str) -> String {
    format!("conversation:{conversation_id}:context")
}

/// `(role, content)` pair handed to the LLM layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextEntry {
    pub role: Role,
    pub content: String,
}

/// A conversation together with its recent messages, oldest first.
#[derive(Debug, Clone)]
pub struct ConversationWithMessages {
    pub conversation: Conversation,
    pub messages: Vec<Message>,
}

/// Timestamp field of the cache document.
///
/// Written as RFC3339; accepted back as either an RFC3339 string or a
/// unix-epoch-milliseconds number. Anything else fails the document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct CacheTimestamp(pub String);

impl<'de> Deserialize<'de> for CacheTimestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Millis(i64),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Text(s) => {
                chrono::DateTime::parse_from_rfc3339(&s)
                    .map_err(|e| serde::de::Error::custom(format!("bad timestamp {s:?}: {e}")))?;
                Ok(CacheTimestamp(s))
            }
            Raw::Millis(ms) => {
                let dt = chrono::DateTime::from_timestamp_millis(ms)
                    .ok_or_else(|| serde::de::Error::custom(format!("bad epoch millis {ms}")))?;
                Ok(CacheTimestamp(
                    dt.to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
                ))
            }
        }
    }
}

/// The JSON document stored under `conversation:{id}:context`.
///
/// Typed deserialization doubles as the schema check: a document missing a
/// required field, carrying an unknown role/status, or holding an
/// unparseable timestamp is rejected and evicted by the reader.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedConversation {
    pub id: String,
    pub user_id: String,
    pub status: ConversationStatus,
    pub context_summary: Option<String>,
    pub last_message_at: CacheTimestamp,
    pub created_at: CacheTimestamp,
    pub updated_at: CacheTimestamp,
    pub messages: Vec<CachedMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub created_at: CacheTimestamp,
    #[serde(default)]
    pub tokens_used: Option<i64>,
    #[serde(default)]
    pub latency_ms: Option<i64>,
}

impl CachedConversation {
    pub fn from_parts(conversation: &Conversation, messages: &[Message]) -> Self {
        Self {
            id: conversation.id.clone(),
            user_id: conversation.user_id.clone(),
            status: conversation.status,
            context_summary: conversation.context_summary.clone(),
            last_message_at: CacheTimestamp(conversation.last_message_at.clone()),
            created_at: CacheTimestamp(conversation.created_at.clone()),
            updated_at: CacheTimestamp(conversation.updated_at.clone()),
            messages: messages
                .iter()
                .map(|m| CachedMessage {
                    id: m.id.clone(),
                    role: m.role,
                    content: m.content.clone(),
                    created_at: CacheTimestamp(m.created_at.clone()),
                    tokens_used: m.tokens_used,
                    latency_ms: m.latency_ms,
                })
                .collect(),
        }
    }
}

impl From<CachedConversation> for ConversationWithMessages {
    fn from(doc: CachedConversation) -> Self {
        let conversation = Conversation {
            id: doc.id.clone(),
            user_id: doc.user_id,
            status: doc.status,
            context_summary: doc.context_summary,
            last_message_at: doc.last_message_at.0,
            created_at: doc.created_at.0,
            updated_at: doc.updated_at.0,
        };
        let messages = doc
            .messages
            .into_iter()
            .map(|m| Message {
                id: m.id,
                conversation_id: doc.id.clone(),
                role: m.role,
                content: m.content,
                // Cached copies do not carry provider identity or metadata.
                provider_sid: None,
                metadata: None,
                tokens_used: m.tokens_used,
                latency_ms: m.latency_ms,
                created_at: m.created_at.0,
            })
            .collect();
        Self {
            conversation,
            messages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_doc() -> serde_json::Value {
        json!({
            "id": "c-1",
            "userId": "u-1",
            "status": "active",
            "contextSummary": null,
            "lastMessageAt": "2026-08-01T12:00:00.000000+00:00",
            "createdAt": "2026-08-01T11:00:00.000000+00:00",
            "updatedAt": "2026-08-01T12:00:00.000000+00:00",
            "messages": [
                {
                    "id": "m-1",
                    "role": "user",
                    "content": "Hola",
                    "createdAt": "2026-08-01T12:00:00.000000+00:00",
                    "tokensUsed": null,
                    "latencyMs": null,
                }
            ],
        })
    }

    #[test]
    fn document_round_trips_through_json() {
        let doc: CachedConversation = serde_json::from_value(sample_doc()).unwrap();
        let raw = serde_json::to_string(&doc).unwrap();
        let again: CachedConversation = serde_json::from_str(&raw).unwrap();
        assert_eq!(again.id, "c-1");
        assert_eq!(again.messages.len(), 1);
        assert_eq!(again.messages[0].role, Role::User);
    }

    #[test]
    fn accepts_epoch_millis_timestamps() {
        let mut raw = sample_doc();
        raw["lastMessageAt"] = json!(1_754_042_400_000_i64);
        let doc: CachedConversation = serde_json::from_value(raw).unwrap();
        // Normalised to RFC3339 on read.
        assert!(doc.last_message_at.0.starts_with("2025-08-01T"));
    }

    #[test]
    fn rejects_garbage_timestamps() {
        let mut raw = sample_doc();
        raw["createdAt"] = json!("yesterday");
        assert!(serde_json::from_value::<CachedConversation>(raw).is_err());
    }

    #[test]
    fn rejects_unknown_role() {
        let mut raw = sample_doc();
        raw["messages"][0]["role"] = json!("operator");
        assert!(serde_json::from_value::<CachedConversation>(raw).is_err());
    }

    #[test]
    fn rejects_missing_required_field() {
        let mut raw = sample_doc();
        raw.as_object_mut().unwrap().remove("userId");
        assert!(serde_json::from_value::<CachedConversation>(raw).is_err());
    }

    #[test]
    fn cache_key_shape() {
        assert_eq!(cache_key("abc"), "conversation:abc:context");
    }
}
