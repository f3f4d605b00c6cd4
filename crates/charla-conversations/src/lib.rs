//! Conversation and message services: user/conversation resolution, the
//! context cache, and idempotent turn appends.
//!
//! The cache is reconciled by invalidate-on-write and validate-on-read,
//! never by locking; the relational store stays the source of truth.

pub mod context;
pub mod conversation;
pub mod message;

pub use context::{cache_key, CachedConversation, ContextEntry, ConversationWithMessages};
pub use conversation::ConversationService;
pub use message::MessageService;
