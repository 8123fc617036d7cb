use std::time::Duration;

use async_trait::async_trait;

use crate::LockError;

/// Shared key-value store backing the lock manager.
///
/// Implementations must make `set_if_absent` atomic: of any number of
/// concurrent callers for the same absent key, exactly one sees `true`.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Creates `key = value` only if the key is absent, expiring after `ttl`.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, LockError>;

    /// Removes the key whoever holds it.
    async fn delete(&self, key: &str) -> Result<(), LockError>;
}
