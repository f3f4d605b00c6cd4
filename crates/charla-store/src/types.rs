use serde::{Deserialize, Serialize};

use charla_core::types::{ConversationStatus, Role};

/// A messaging endpoint identified by its phone number.
///
/// Created on the first inbound message from the phone; never deleted by
/// the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// UUIDv7 primary key.
    pub id: String,
    /// Canonical `+<digits>` form, unique.
    pub phone_number: String,
    pub display_name: Option<String>,
    /// BCP-47 language tag, defaults to `es`.
    pub language: String,
    /// RFC3339 timestamps.
    pub created_at: String,
    pub updated_at: String,
}

/// A bounded session grouping messages for exactly one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    pub status: ConversationStatus,
    pub context_summary: Option<String>,
    /// Bumped on every appended turn; picks the "current" active
    /// conversation when a user has several.
    pub last_message_at: String,
    pub created_at: String,
    pub updated_at: String,
}

/// A single persisted turn. Append-only; only `metadata` may change later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    /// Provider message id — globally unique when present, the idempotency
    /// key for inbound inserts.
    pub provider_sid: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub tokens_used: Option<i64>,
    pub latency_ms: Option<i64>,
    pub created_at: String,
}

/// Insert payload for `MessageRepo::create`.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    pub provider_sid: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub tokens_used: Option<i64>,
    pub latency_ms: Option<i64>,
}

impl NewMessage {
    pub fn new(conversation_id: impl Into<String>, role: Role, content: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            role,
            content: content.into(),
            provider_sid: None,
            metadata: None,
            tokens_used: None,
            latency_ms: None,
        }
    }
}

/// Aggregate over the rows of a conversation with a non-null token count.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TokenStats {
    pub total: i64,
    pub count: i64,
    pub avg: f64,
}
