use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    /// The caller handed us an unusable message list; never retried.
    #[error("invalid completion request: {0}")]
    InvalidRequest(String),

    #[error("rate limited by upstream")]
    RateLimited,

    #[error("upstream rejected the request: {0}")]
    BadRequest(String),

    #[error("upstream rejected the credentials: {0}")]
    Unauthenticated(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("upstream error: {0}")]
    Upstream(String),
}

impl LlmError {
    /// Retry policy: 429, 5xx, and network-class failures retry; client
    /// errors and everything else do not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LlmError::RateLimited | LlmError::UpstreamUnavailable(_))
    }
}

/// True when a transport error message names a transient network failure.
pub(crate) fn is_network_transient(message: &str) -> bool {
    let lowered = message.to_ascii_lowercase();
    ["timeout", "network", "econnreset"]
        .iter()
        .any(|needle| lowered.contains(needle))
}
