use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("not found: {id}")]
    NotFound { id: String },

    #[error("access denied: conversation {id} belongs to another user")]
    AccessDenied { id: String },

    #[error("conversation {id} is {status}, transition requires active")]
    InvalidState { id: String, status: String },

    #[error("provider sid already recorded: {sid}")]
    DuplicateProviderSid { sid: String },
}

pub type Result<T> = std::result::Result<T, StoreError>;
