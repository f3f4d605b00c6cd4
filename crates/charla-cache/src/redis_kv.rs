use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::error::Result;
use crate::KvStore;

/// Redis-backed key-value store.
///
/// `ConnectionManager` multiplexes one connection and reconnects on
/// failure; the handle is cheap to clone per command.
pub struct RedisKv {
    manager: ConnectionManager,
}

impl RedisKv {
    /// Connect to the store at `url` (e.g. `redis://localhost:6379`).
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl KvStore for RedisKv {
    async fn incr(&self, key: &str) -> Result<i64> {
        let mut conn = self.manager.clone();
        Ok(conn.incr(key, 1).await?)
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.expire::<_, ()>(key, ttl_secs as i64).await?;
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<Option<u64>> {
        let mut conn = self.manager.clone();
        let ttl: i64 = conn.ttl(key).await?;
        // Redis: -2 missing key, -1 no expiry.
        Ok(if ttl >= 0 { Some(ttl as u64) } else { None })
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.manager.clone();
        Ok(conn.get(key).await?)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl_secs).await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.manager.clone();
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(())
    }
}
