use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Connection, Pool};
use redis::AsyncCommands;
use tracing::debug;

use crate::{LockError, LockStore};

/// Redis-backed lock store: `SET key value NX PX ttl` / `DEL key`.
pub struct RedisLockStore {
    pool: Pool,
}

impl RedisLockStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn get_connection(&self) -> Result<Connection, LockError> {
        self.pool
            .get()
            .await
            .map_err(|e| LockError::StoreUnavailable(format!("Failed to get Redis connection: {}", e)))
    }
}

#[async_trait]
impl LockStore for RedisLockStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, LockError> {
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        if ttl_ms == 0 {
            return Err(LockError::InvalidLease(ttl));
        }

        let mut conn = self.get_connection().await?;

        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;

        let acquired = reply.is_some();
        debug!("SET NX {} -> {}", key, acquired);
        Ok(acquired)
    }

    async fn delete(&self, key: &str) -> Result<(), LockError> {
        let mut conn = self.get_connection().await?;
        let _: i64 = conn.del(key).await?;
        debug!("DEL {}", key);
        Ok(())
    }
}
