use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Default slot lease. Must exceed the worst-case critical section.
pub const DEFAULT_LEASE: Duration = Duration::from_secs(30);

/// Lease held by this process on a named resource.
#[derive(Debug, Clone)]
pub struct LeaseInfo {
    pub resource_key: String,
    pub holder_token: String,
    pub lease: Duration,
    pub acquired_at: DateTime<Utc>,
}

impl LeaseInfo {
    pub fn new(resource_key: impl Into<String>, lease: Duration) -> Self {
        Self {
            resource_key: resource_key.into(),
            holder_token: format!("booking_{}", Uuid::new_v4()),
            lease,
            acquired_at: Utc::now(),
        }
    }

    /// Wall-clock instant after which the store drops the entry on its own.
    pub fn expires_at(&self) -> DateTime<Utc> {
        let lease = chrono::Duration::from_std(self.lease).unwrap_or(chrono::Duration::zero());
        self.acquired_at + lease
    }
}
