use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One state-transition notification as it travels through the broker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub topic: String,
    /// Partitioning key; all events for one entity share it.
    pub key: String,
    pub event_type: String,
    pub payload: Value,
    pub emitted_at: DateTime<Utc>,
    pub emitted_at_logical: u64,
}

impl EventEnvelope {
    pub fn new(
        topic: impl Into<String>,
        key: impl Into<String>,
        event_type: impl Into<String>,
        payload: Value,
        clock: &LogicalClock,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            topic: topic.into(),
            key: key.into(),
            event_type: event_type.into(),
            payload,
            emitted_at: Utc::now(),
            emitted_at_logical: clock.tick(),
        }
    }
}

/// Per-process monotonic stamp for `emitted_at_logical`.
///
/// Seeded from wall-clock milliseconds so stamps from a restarted process
/// keep increasing, and never goes backwards within a process.
#[derive(Debug)]
pub struct LogicalClock {
    last: AtomicU64,
}

impl LogicalClock {
    pub fn new() -> Self {
        Self {
            last: AtomicU64::new(0),
        }
    }

    pub fn tick(&self) -> u64 {
        let now = u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default();
        let mut current = self.last.load(Ordering::Relaxed);
        loop {
            let next = now.max(current + 1);
            match self
                .last
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(observed) => current = observed,
            }
        }
    }
}

impl Default for LogicalClock {
    fn default() -> Self {
        Self::new()
    }
}
