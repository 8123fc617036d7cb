use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::{LeaseInfo, LockError, LockStore};

/// Acquire/release semantics for named resources on top of a [`LockStore`].
///
/// This is a lease, not a linearizable lock: once the lease elapses another
/// caller may acquire the same key even if the first holder is still running.
/// There is no renewal.
#[derive(Clone)]
pub struct DistributedLockManager {
    store: Arc<dyn LockStore>,
}

impl DistributedLockManager {
    pub fn new(store: Arc<dyn LockStore>) -> Self {
        Self { store }
    }

    /// Returns `true` iff this caller now holds the lease on `resource_key`.
    ///
    /// `false` means contention and is not an error. Store failures are.
    pub async fn acquire(&self, resource_key: &str, lease: Duration) -> Result<bool, LockError> {
        Ok(self.try_lease(resource_key, lease).await?.map(LeaseGuard::disarm).is_some())
    }

    /// Clears the entry unconditionally.
    pub async fn release(&self, resource_key: &str) -> Result<(), LockError> {
        self.store.delete(resource_key).await?;
        debug!("Lease released on {}", resource_key);
        Ok(())
    }

    /// Scoped form of [`acquire`](Self::acquire): the returned guard must be
    /// released with [`LeaseGuard::release`]; if it is dropped instead (panic,
    /// cancelled task) release is spawned in the background.
    pub async fn try_lease(
        &self,
        resource_key: &str,
        lease: Duration,
    ) -> Result<Option<LeaseGuard>, LockError> {
        if lease.is_zero() {
            return Err(LockError::InvalidLease(lease));
        }

        let info = LeaseInfo::new(resource_key, lease);
        let acquired = self
            .store
            .set_if_absent(resource_key, &info.holder_token, lease)
            .await?;

        if !acquired {
            debug!("Lease on {} is held by another caller", resource_key);
            return Ok(None);
        }

        debug!("Lease acquired on {} for {:?}", resource_key, lease);
        Ok(Some(LeaseGuard {
            store: Arc::clone(&self.store),
            info,
            armed: true,
        }))
    }
}

/// A held lease. Release is idempotent from the caller's point of view.
pub struct LeaseGuard {
    store: Arc<dyn LockStore>,
    info: LeaseInfo,
    armed: bool,
}

impl LeaseGuard {
    pub fn info(&self) -> &LeaseInfo {
        &self.info
    }

    pub fn key(&self) -> &str {
        &self.info.resource_key
    }

    /// Deletes the lock entry. Failures are logged; the lease expiry bounds
    /// how long a failed release can block the slot.
    pub async fn release(mut self) {
        self.armed = false;
        if let Err(e) = self.store.delete(&self.info.resource_key).await {
            warn!(
                "Failed to release lease on {} (expires at {}): {}",
                self.info.resource_key,
                self.info.expires_at(),
                e
            );
        } else {
            debug!("Lease released on {}", self.info.resource_key);
        }
    }

    /// Keeps the entry in the store and forgets the guard. Used by the plain
    /// `acquire` contract where the caller releases by key.
    fn disarm(mut self) -> LeaseInfo {
        self.armed = false;
        self.info.clone()
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let store = Arc::clone(&self.store);
        let key = self.info.resource_key.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!("Lease guard on {} dropped without release, releasing in background", key);
                handle.spawn(async move {
                    if let Err(e) = store.delete(&key).await {
                        warn!("Background release of {} failed: {}", key, e);
                    }
                });
            }
            Err(_) => {
                warn!("Lease guard on {} dropped outside a runtime, relying on expiry", key);
            }
        }
    }
}
