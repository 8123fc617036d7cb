use deadpool_redis::{Config, Pool, Runtime};
use thiserror::Error;
use tracing::info;

use shared_config::AppConfig;

#[derive(Error, Debug)]
pub enum RedisPoolError {
    #[error("Failed to create Redis pool: {0}")]
    Create(String),

    #[error("Failed to connect to Redis: {0}")]
    Connect(String),

    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
}

/// Builds the process-wide Redis pool and verifies it with a PING.
///
/// The returned pool is shared by the lock store and the event streams; the
/// caller owns its lifecycle and closes it on shutdown.
pub async fn connect_redis_pool(config: &AppConfig) -> Result<Pool, RedisPoolError> {
    let redis_url = config.redis_url().to_string();

    let cfg = Config::from_url(redis_url);
    let pool = cfg
        .create_pool(Some(Runtime::Tokio1))
        .map_err(|e| RedisPoolError::Create(e.to_string()))?;

    let mut conn = pool
        .get()
        .await
        .map_err(|e| RedisPoolError::Connect(e.to_string()))?;

    let _: String = ::redis::cmd("PING").query_async(&mut conn).await?;
    info!("Redis connection pool initialized successfully");

    Ok(pool)
}
