use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Connection, Pool};
use redis::streams::{StreamMaxlen, StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::services::publisher::{dispatch, ensure_topic};
use crate::{EventEnvelope, EventHandler, EventPublisher, PublishError, Subscription};

const FIELD_KEY: &str = "key";
const FIELD_EVENT_TYPE: &str = "event_type";
const FIELD_PAYLOAD: &str = "payload";

/// Event bus on Redis Streams: one stream per topic, consumer groups via
/// `XREADGROUP`, and an `XACK` after every handler invocation.
pub struct RedisStreamEventBus {
    pool: Pool,
    max_len: usize,
    block: Duration,
    read_count: usize,
}

impl RedisStreamEventBus {
    pub fn new(pool: Pool, max_len: usize) -> Self {
        Self {
            pool,
            max_len,
            block: Duration::from_secs(1),
            read_count: 16,
        }
    }

    /// How long one `XREADGROUP` call may block; also bounds how quickly a
    /// closed subscription notices the shutdown.
    pub fn with_block(mut self, block: Duration) -> Self {
        self.block = block;
        self
    }

    async fn get_connection(pool: &Pool, topic: &str) -> Result<Connection, PublishError> {
        pool.get()
            .await
            .map_err(|e| PublishError::transport(topic, format!("Failed to get Redis connection: {}", e)))
    }

    async fn ensure_group(&self, topic: &str, consumer_group: &str) -> Result<(), PublishError> {
        let mut conn = Self::get_connection(&self.pool, topic).await?;

        let created: redis::RedisResult<()> = conn.xgroup_create_mkstream(topic, consumer_group, "$").await;
        match created {
            Ok(()) => {
                info!("Created consumer group {} on {}", consumer_group, topic);
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => {
                debug!("Consumer group {} already exists on {}", consumer_group, topic);
                Ok(())
            }
            Err(e) => Err(PublishError::SubscriptionFailed {
                topic: topic.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

#[async_trait]
impl EventPublisher for RedisStreamEventBus {
    async fn publish(&self, topic: &str, event: &EventEnvelope) -> Result<(), PublishError> {
        ensure_topic(topic, event)?;
        let payload = serde_json::to_string(event)?;
        let mut conn = Self::get_connection(&self.pool, topic).await?;

        let entry_id: String = conn
            .xadd_maxlen(
                topic,
                StreamMaxlen::Approx(self.max_len),
                "*",
                &[
                    (FIELD_KEY, event.key.as_str()),
                    (FIELD_EVENT_TYPE, event.event_type.as_str()),
                    (FIELD_PAYLOAD, payload.as_str()),
                ],
            )
            .await
            .map_err(|e| PublishError::transport(topic, e))?;

        debug!("Event {} published to {} as {}", event.event_type, topic, entry_id);
        Ok(())
    }

    async fn publish_batch(&self, topic: &str, events: &[EventEnvelope]) -> Result<(), PublishError> {
        if events.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for event in events {
            ensure_topic(topic, event)?;
            let payload = serde_json::to_string(event)?;
            pipe.xadd_maxlen(
                topic,
                StreamMaxlen::Approx(self.max_len),
                "*",
                &[
                    (FIELD_KEY, event.key.as_str()),
                    (FIELD_EVENT_TYPE, event.event_type.as_str()),
                    (FIELD_PAYLOAD, payload.as_str()),
                ],
            )
            .ignore();
        }

        let mut conn = Self::get_connection(&self.pool, topic).await?;
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| PublishError::transport(topic, e))?;

        debug!("Batch of {} events published to {}", events.len(), topic);
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        consumer_group: &str,
        handler: EventHandler,
    ) -> Result<Subscription, PublishError> {
        self.ensure_group(topic, consumer_group).await?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let consumer_loop = ConsumerLoop {
            pool: self.pool.clone(),
            topic: topic.to_string(),
            consumer_group: consumer_group.to_string(),
            consumer_name: format!("{}-{}", consumer_group, Uuid::new_v4()),
            options_count: self.read_count,
            block_ms: usize::try_from(self.block.as_millis()).unwrap_or(usize::MAX),
            handler,
        };

        let task = tokio::spawn(consumer_loop.run(shutdown_rx));

        info!("Subscribed to topic: {} with group: {}", topic, consumer_group);
        Ok(Subscription::new(topic, consumer_group, shutdown_tx, task))
    }
}

struct ConsumerLoop {
    pool: Pool,
    topic: String,
    consumer_group: String,
    consumer_name: String,
    options_count: usize,
    block_ms: usize,
    handler: EventHandler,
}

impl ConsumerLoop {
    async fn run(self, shutdown: watch::Receiver<bool>) {
        debug!("Consumer loop started: {}", self.consumer_name);

        loop {
            if *shutdown.borrow() {
                debug!("Consumer {} received shutdown signal", self.consumer_name);
                break;
            }

            match self.poll_once().await {
                Ok(0) => {}
                Ok(handled) => debug!("Consumer {} handled {} messages", self.consumer_name, handled),
                Err(e) => {
                    error!("Consumer {} failed to read from {}: {}", self.consumer_name, self.topic, e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }

        debug!("Consumer loop ended: {}", self.consumer_name);
    }

    async fn poll_once(&self) -> Result<usize, PublishError> {
        let mut conn = RedisStreamEventBus::get_connection(&self.pool, &self.topic).await?;

        let options = StreamReadOptions::default()
            .group(&self.consumer_group, &self.consumer_name)
            .count(self.options_count)
            .block(self.block_ms);

        let reply: Option<StreamReadReply> = conn
            .xread_options(&[self.topic.as_str()], &[">"], &options)
            .await
            .map_err(|e| PublishError::transport(&self.topic, e))?;

        let Some(reply) = reply else {
            return Ok(0);
        };

        let mut handled = 0;
        for stream in reply.keys {
            for message in stream.ids {
                match message.get::<String>(FIELD_PAYLOAD) {
                    Some(raw) => match serde_json::from_str::<EventEnvelope>(&raw) {
                        Ok(event) => dispatch(&self.handler, &self.consumer_group, event).await,
                        Err(e) => warn!("Dropping malformed message {} on {}: {}", message.id, self.topic, e),
                    },
                    None => warn!("Dropping message {} on {} without payload", message.id, self.topic),
                }

                // Acked whatever the handler did: failures are not redelivered.
                let acked: redis::RedisResult<i64> =
                    conn.xack(&self.topic, &self.consumer_group, &[message.id.as_str()]).await;
                if let Err(e) = acked {
                    warn!("Failed to ack {} on {}: {}", message.id, self.topic, e);
                }
                handled += 1;
            }
        }

        Ok(handled)
    }
}
