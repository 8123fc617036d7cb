use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::{LockError, LockStore};

struct Entry {
    value: String,
    expires_at: Instant,
}

/// Single-process lock store with the same semantics as the Redis one.
///
/// Expiry follows the tokio clock, so paused-time tests can step over a lease.
#[derive(Default)]
pub struct InMemoryLockStore {
    entries: Mutex<HashMap<String, Entry>>,
    unavailable: AtomicBool,
}

impl InMemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call fail as if the store were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Current live holder of `key`, if any.
    pub async fn holder(&self, key: &str) -> Option<String> {
        let entries = self.entries.lock().await;
        entries
            .get(key)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.value.clone())
    }

    pub async fn live_keys(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        entries.values().filter(|entry| entry.expires_at > now).count()
    }

    fn check_available(&self) -> Result<(), LockError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LockError::StoreUnavailable("in-memory lock store switched off".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LockStore for InMemoryLockStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, LockError> {
        self.check_available()?;
        if ttl.is_zero() {
            return Err(LockError::InvalidLease(ttl));
        }

        let now = Instant::now();
        let mut entries = self.entries.lock().await;

        if let Some(existing) = entries.get(key) {
            if existing.expires_at > now {
                return Ok(false);
            }
            debug!("Lease on {} expired, taking over", key);
        }

        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<(), LockError> {
        self.check_available()?;
        let mut entries = self.entries.lock().await;
        entries.remove(key);
        Ok(())
    }
}
