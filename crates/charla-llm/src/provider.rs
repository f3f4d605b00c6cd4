use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use charla_core::types::Role;

use crate::error::LlmError;

/// A single turn handed to the completion backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Request to a completion backend.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub system: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Raw response from a completion backend, before metrics are attached.
#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub stop_reason: String,
}

/// Common interface for completion backends; the gateway only ships the
/// Anthropic one, tests script their own.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Backend name for logging and error messages.
    fn name(&self) -> &str;

    async fn complete(&self, req: &CompletionRequest) -> Result<Completion, LlmError>;
}
