use super::CodeStore;
use crate::error::{IceyError, Result};
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::time::Duration;

// INCR on a missing key would recreate it without a TTL.
const INCR_EXISTING: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return redis.call('INCR', KEYS[1])
end
return false
"#;

/// Code store backed by a shared Redis instance.
#[derive(Clone)]
pub struct RedisCodeStore {
    conn: ConnectionManager,
    incr_existing: redis::Script,
}

impl RedisCodeStore {
    pub async fn new(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| IceyError::Config(format!("invalid redis url {}: {}", url, e)))?;
        let conn = ConnectionManager::new(client).await?;
        tracing::info!("Connected to redis code store at {}", url);
        Ok(Self {
            conn,
            incr_existing: redis::Script::new(INCR_EXISTING),
        })
    }
}

#[async_trait]
impl CodeStore for RedisCodeStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(key).await?;
        Ok(exists)
    }

    async fn get(&self, key: &str) -> Result<Option<i64>> {
        let mut conn = self.conn.clone();
        let value: Option<i64> = conn.get(key).await?;
        Ok(value)
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn.clone();
        let value: i64 = conn.incr(key, 1i64).await?;
        Ok(value)
    }

    async fn incr_existing(&self, key: &str) -> Result<Option<i64>> {
        let mut conn = self.conn.clone();
        let value: Option<i64> = self
            .incr_existing
            .key(key)
            .invoke_async(&mut conn)
            .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: i64, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let seconds = ttl.as_secs().max(1);
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(seconds)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }
}
