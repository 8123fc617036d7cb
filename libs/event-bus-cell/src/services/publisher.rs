use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::{EventEnvelope, PublishError};

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Callback invoked once per delivered message.
pub type EventHandler =
    Arc<dyn Fn(EventEnvelope) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync>;

pub fn handler_fn<F, Fut>(f: F) -> EventHandler
where
    F: Fn(EventEnvelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(move |event| f(event).boxed())
}

/// Delivers lifecycle notifications to named topics.
///
/// Each `publish` is at-least-once towards the broker once it returns `Ok`.
/// There is no deduplication and no atomicity with any database write.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, topic: &str, event: &EventEnvelope) -> Result<(), PublishError>;

    async fn publish_batch(&self, topic: &str, events: &[EventEnvelope]) -> Result<(), PublishError> {
        for event in events {
            self.publish(topic, event).await?;
        }
        Ok(())
    }

    /// Registers `handler` for `topic` within `consumer_group`. Every group
    /// receives its own copy of each message.
    async fn subscribe(
        &self,
        topic: &str,
        consumer_group: &str,
        handler: EventHandler,
    ) -> Result<Subscription, PublishError>;
}

pub(crate) fn ensure_topic(topic: &str, event: &EventEnvelope) -> Result<(), PublishError> {
    if event.topic != topic {
        return Err(PublishError::TopicMismatch {
            topic: topic.to_string(),
            event_topic: event.topic.clone(),
        });
    }
    Ok(())
}

/// Runs one handler invocation. Errors and panics are logged and swallowed so
/// the subscriber loop keeps going; the message is not redelivered.
pub(crate) async fn dispatch(handler: &EventHandler, consumer_group: &str, event: EventEnvelope) {
    let event_id = event.event_id;
    let event_type = event.event_type.clone();

    match AssertUnwindSafe((handler.as_ref())(event)).catch_unwind().await {
        Ok(Ok(())) => debug!("{} handled {} ({})", consumer_group, event_type, event_id),
        Ok(Err(e)) => error!(
            "Handler in group {} failed on {} ({}): {}",
            consumer_group, event_type, event_id, e
        ),
        Err(_) => error!(
            "Handler in group {} panicked on {} ({})",
            consumer_group, event_type, event_id
        ),
    }
}

/// Handle to a running subscriber loop.
pub struct Subscription {
    topic: String,
    consumer_group: String,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Subscription {
    pub(crate) fn new(
        topic: &str,
        consumer_group: &str,
        shutdown: watch::Sender<bool>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            topic: topic.to_string(),
            consumer_group: consumer_group.to_string(),
            shutdown,
            task,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn consumer_group(&self) -> &str {
        &self.consumer_group
    }

    /// Stops the loop after the message in flight and waits for it to exit.
    pub async fn close(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!("Subscriber loop for {} ended abnormally: {}", self.topic, e);
        }
        info!("Unsubscribed {} from {}", self.consumer_group, self.topic);
    }
}
