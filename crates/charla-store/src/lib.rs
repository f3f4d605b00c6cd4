//! Durable storage for users, conversations, and messages.
//!
//! One SQLite connection is shared by the three repositories; the store is
//! the source of truth for everything the context cache holds a copy of.

pub mod conversations;
pub mod db;
pub mod error;
pub mod messages;
pub mod types;
pub mod users;

pub use conversations::ConversationRepo;
pub use db::Store;
pub use error::{Result, StoreError};
pub use messages::MessageRepo;
pub use types::{Conversation, Message, NewMessage, TokenStats, User};
pub use users::UserRepo;
