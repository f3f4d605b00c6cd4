use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::error::Result;
use crate::KvStore;

struct Entry {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// In-process key-value store with per-key expiry.
///
/// Backs development mode and the test suites; single-node only, so the
/// "atomic" increment is a plain mutation under the map lock.
#[derive(Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop the entry when its expiry has passed, then run `f` on the map.
    fn with_live_entry<T>(
        &self,
        key: &str,
        f: impl FnOnce(&mut HashMap<String, Entry>) -> T,
    ) -> T {
        let mut entries = self.entries.lock().unwrap();
        let now = Utc::now();
        if entries.get(key).map(|e| e.expired(now)).unwrap_or(false) {
            entries.remove(key);
        }
        f(&mut entries)
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn incr(&self, key: &str) -> Result<i64> {
        Ok(self.with_live_entry(key, |entries| {
            let entry = entries.entry(key.to_string()).or_insert(Entry {
                value: "0".to_string(),
                expires_at: None,
            });
            let next = entry.value.parse::<i64>().unwrap_or(0) + 1;
            entry.value = next.to_string();
            next
        }))
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<()> {
        self.with_live_entry(key, |entries| {
            if let Some(entry) = entries.get_mut(key) {
                entry.expires_at = Some(Utc::now() + Duration::seconds(ttl_secs as i64));
            }
        });
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<Option<u64>> {
        Ok(self.with_live_entry(key, |entries| {
            entries.get(key).and_then(|entry| {
                entry.expires_at.map(|at| {
                    let left = (at - Utc::now()).num_seconds();
                    left.max(0) as u64
                })
            })
        }))
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.with_live_entry(key, |entries| entries.get(key).map(|e| e.value.clone())))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        self.with_live_entry(key, |entries| {
            entries.insert(
                key.to_string(),
                Entry {
                    value: value.to_string(),
                    expires_at: Some(Utc::now() + Duration::seconds(ttl_secs as i64)),
                },
            );
        });
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.with_live_entry(key, |entries| {
            entries.remove(key);
        });
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn incr_counts_up_from_one() {
        let kv = MemoryKv::new();
        assert_eq!(kv.incr("counter").await.unwrap(), 1);
        assert_eq!(kv.incr("counter").await.unwrap(), 2);
        assert_eq!(kv.incr("counter").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn expire_attaches_ttl() {
        let kv = MemoryKv::new();
        kv.incr("counter").await.unwrap();
        assert_eq!(kv.ttl("counter").await.unwrap(), None);
        kv.expire("counter", 60).await.unwrap();
        let ttl = kv.ttl("counter").await.unwrap().unwrap();
        assert!(ttl <= 60);
    }

    #[tokio::test]
    async fn set_ex_get_del_round_trip() {
        let kv = MemoryKv::new();
        kv.set_ex("doc", r#"{"a":1}"#, 60).await.unwrap();
        assert_eq!(kv.get("doc").await.unwrap().as_deref(), Some(r#"{"a":1}"#));
        kv.del("doc").await.unwrap();
        assert_eq!(kv.get("doc").await.unwrap(), None);
    }

    #[tokio::test]
    async fn zero_ttl_entry_is_already_expired() {
        let kv = MemoryKv::new();
        kv.set_ex("doc", "value", 0).await.unwrap();
        assert_eq!(kv.get("doc").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_counter_restarts_from_one() {
        let kv = MemoryKv::new();
        kv.incr("counter").await.unwrap();
        kv.expire("counter", 0).await.unwrap();
        assert_eq!(kv.incr("counter").await.unwrap(), 1);
    }
}
