use crate::endpoint::Endpoint;

/// Something a session can subscribe to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Subscription {
    /// Deliver messages published to matching topics directly to this
    /// session.
    Topic(String),

    /// Spool guaranteed messages published to matching topics to a queue.
    QueueMapping {
        /// The queue receiving the messages.
        queue: Endpoint,
        /// The topic (or wildcard pattern) mapped to the queue.
        topic: String,
    },
}

impl Subscription {
    /// Creates a direct topic subscription.
    pub fn topic(topic: impl Into<String>) -> Self {
        Self::Topic(topic.into())
    }

    /// Creates a topic-to-queue mapping.
    pub fn queue_mapping(queue: Endpoint, topic: impl Into<String>) -> Self {
        Self::QueueMapping {
            queue,
            topic: topic.into(),
        }
    }

    /// The topic or topic pattern subscribed to.
    #[must_use]
    pub fn pattern(&self) -> &str {
        match self {
            Self::Topic(topic) | Self::QueueMapping { topic, .. } => topic,
        }
    }
}

/// Returns whether `topic` matches the subscription `pattern`.
///
/// Levels are separated by `/`. A `*` level matches exactly one level and a
/// trailing `>` matches one or more remaining levels.
#[must_use]
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    let mut pattern_levels = pattern.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (pattern_levels.next(), topic_levels.next()) {
            (Some(">"), Some(_)) => return pattern_levels.next().is_none(),
            (Some("*"), Some(_)) => {}
            (Some(expected), Some(actual)) if expected == actual => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
