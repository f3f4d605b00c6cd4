//! Key-value store abstraction: atomic rate-limit counters and the
//! short-lived context cache.
//!
//! The store is never authoritative — callers decide how to degrade when
//! it fails (the rate limiter fails open, the context reader bypasses the
//! cache). Two implementations: [`RedisKv`] for deployment and
//! [`MemoryKv`] for development mode and tests.

use async_trait::async_trait;

pub mod error;
pub mod memory;
pub mod redis_kv;

pub use error::{CacheError, Result};
pub use memory::MemoryKv;
pub use redis_kv::RedisKv;

/// Minimal command surface the gateway needs from a key-value store.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Atomically increment the integer at `key`, creating it at 0 first.
    /// Returns the post-increment value.
    async fn incr(&self, key: &str) -> Result<i64>;

    /// Attach a time-to-live to an existing key.
    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<()>;

    /// Remaining time-to-live, `None` when the key is missing or has no
    /// expiry.
    async fn ttl(&self, key: &str) -> Result<Option<u64>>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set `key` to `value` with a time-to-live in one call.
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()>;

    async fn del(&self, key: &str) -> Result<()>;

    /// Liveness probe for the health endpoint.
    async fn ping(&self) -> Result<()>;
}
