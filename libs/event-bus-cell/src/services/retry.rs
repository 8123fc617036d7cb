use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, warn};

use crate::{EventEnvelope, EventHandler, EventPublisher, PublishError, Subscription};

/// Retries transport failures with exponential backoff before giving up.
///
/// A retry after an ambiguous failure can deliver the same event twice; that
/// is within the at-least-once contract.
pub struct RetryingPublisher {
    inner: Arc<dyn EventPublisher>,
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryingPublisher {
    pub fn new(inner: Arc<dyn EventPublisher>, max_attempts: u32) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_millis(100),
        }
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1 << attempt.saturating_sub(1).min(6))
    }
}

#[async_trait]
impl EventPublisher for RetryingPublisher {
    async fn publish(&self, topic: &str, event: &EventEnvelope) -> Result<(), PublishError> {
        let mut attempt = 1;
        loop {
            match self.inner.publish(topic, event).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    warn!(
                        "Publish of {} to {} failed, retrying attempt {}/{}: {}",
                        event.event_type,
                        topic,
                        attempt + 1,
                        self.max_attempts,
                        e
                    );
                    tokio::time::sleep(self.backoff(attempt)).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(
                        "Giving up publishing {} to {} after {} attempt(s): {}",
                        event.event_type, topic, attempt, e
                    );
                    return Err(e);
                }
            }
        }
    }

    async fn publish_batch(&self, topic: &str, events: &[EventEnvelope]) -> Result<(), PublishError> {
        let mut attempt = 1;
        loop {
            match self.inner.publish_batch(topic, events).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    warn!("Batch publish to {} failed, retrying: {}", topic, e);
                    tokio::time::sleep(self.backoff(attempt)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn subscribe(
        &self,
        topic: &str,
        consumer_group: &str,
        handler: EventHandler,
    ) -> Result<Subscription, PublishError> {
        self.inner.subscribe(topic, consumer_group, handler).await
    }
}
