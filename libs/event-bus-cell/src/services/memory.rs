use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, RwLock};
use tracing::debug;

use crate::services::publisher::{dispatch, ensure_topic};
use crate::{EventEnvelope, EventHandler, EventPublisher, PublishError, Subscription};

/// Subscribers sharing one consumer group. Each event goes to exactly one
/// of them, in turn.
#[derive(Default)]
struct GroupMembers {
    senders: Vec<mpsc::UnboundedSender<EventEnvelope>>,
    next: usize,
}

impl GroupMembers {
    /// Hands the event to the next live member, dropping closed ones on the
    /// way. Returns false once no member is left.
    fn deliver(&mut self, event: &EventEnvelope) -> bool {
        while !self.senders.is_empty() {
            let index = self.next % self.senders.len();
            if self.senders[index].send(event.clone()).is_ok() {
                self.next = index + 1;
                return true;
            }
            self.senders.remove(index);
        }
        false
    }
}

type GroupSenders = HashMap<String, GroupMembers>;

/// In-process bus for tests and single-process setups.
///
/// Records every accepted event, fans each one out to every consumer group,
/// and can be told to fail publishes. Subscribers in the same group share
/// its events round-robin, like consumers of a Redis stream group.
#[derive(Default)]
pub struct InMemoryEventBus {
    published: RwLock<Vec<EventEnvelope>>,
    subscribers: RwLock<HashMap<String, GroupSenders>>,
    fail_next: AtomicU32,
    failing: AtomicBool,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `count` publishes fail with a transport error.
    pub fn fail_next(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Every publish fails until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn published(&self) -> Vec<EventEnvelope> {
        self.published.read().await.clone()
    }

    pub async fn published_on(&self, topic: &str) -> Vec<EventEnvelope> {
        self.published
            .read()
            .await
            .iter()
            .filter(|event| event.topic == topic)
            .cloned()
            .collect()
    }

    fn injected_failure(&self, topic: &str) -> Result<(), PublishError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PublishError::transport(topic, "broker unavailable"));
        }
        let consumed = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1));
        if consumed.is_ok() {
            return Err(PublishError::transport(topic, "injected publish failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventBus {
    async fn publish(&self, topic: &str, event: &EventEnvelope) -> Result<(), PublishError> {
        ensure_topic(topic, event)?;
        self.injected_failure(topic)?;

        self.published.write().await.push(event.clone());

        let mut subscribers = self.subscribers.write().await;
        if let Some(groups) = subscribers.get_mut(topic) {
            groups.retain(|group, members| {
                let delivered = members.deliver(event);
                if !delivered {
                    debug!("Consumer group {} on {} is gone", group, topic);
                }
                delivered
            });
        }

        debug!("Event {} published to {}", event.event_type, topic);
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        consumer_group: &str,
        handler: EventHandler,
    ) -> Result<Subscription, PublishError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<EventEnvelope>();
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        self.subscribers
            .write()
            .await
            .entry(topic.to_string())
            .or_default()
            .entry(consumer_group.to_string())
            .or_default()
            .senders
            .push(tx);

        let group = consumer_group.to_string();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    next = rx.recv() => match next {
                        Some(event) => dispatch(&handler, &group, event).await,
                        None => break,
                    },
                }
            }
        });

        Ok(Subscription::new(topic, consumer_group, shutdown_tx, task))
    }
}
