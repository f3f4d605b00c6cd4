//! LLM client layer: the completion backend trait, the Anthropic
//! implementation, and the service that validates, truncates, and retries.

pub mod anthropic;
pub mod error;
pub mod provider;
pub mod service;

pub use anthropic::AnthropicBackend;
pub use error::LlmError;
pub use provider::{ChatBackend, ChatMessage, Completion, CompletionRequest};
pub use service::{CompletionMetrics, LlmService, PriceTable};
