use thiserror::Error;

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Publish failed for topic '{topic}': {reason}")]
    Transport { topic: String, reason: String },

    #[error("Subscription failed for topic '{topic}': {reason}")]
    SubscriptionFailed { topic: String, reason: String },

    #[error("Event addressed to '{event_topic}' published on '{topic}'")]
    TopicMismatch { topic: String, event_topic: String },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl PublishError {
    /// Only transport failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PublishError::Transport { .. })
    }

    pub(crate) fn transport(topic: &str, reason: impl ToString) -> Self {
        PublishError::Transport {
            topic: topic.to_string(),
            reason: reason.to_string(),
        }
    }
}
