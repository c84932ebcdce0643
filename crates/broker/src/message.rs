use std::fmt;
use std::time::Instant;

use bytes::Bytes;

use crate::token::CorrelationToken;

/// Where a message is published to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Destination {
    /// A topic, delivered to matching subscribers and mapped queues.
    Topic(String),

    /// A named queue.
    Queue(String),
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Topic(topic) => write!(f, "topic:{topic}"),
            Self::Queue(queue) => write!(f, "queue:{queue}"),
        }
    }
}

/// How the broker should treat a published message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum DeliveryMode {
    /// Best effort, never spooled and never acknowledged.
    #[default]
    Direct,

    /// Spooled, acknowledged, but not durable across broker restarts.
    NonPersistent,

    /// Spooled durably and acknowledged once stored.
    Persistent,
}

impl DeliveryMode {
    /// Whether messages sent in this mode are spooled and acknowledged.
    #[must_use]
    pub const fn is_guaranteed(self) -> bool {
        matches!(self, Self::NonPersistent | Self::Persistent)
    }
}

/// A message to publish.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Where the message goes.
    pub destination: Destination,

    /// The message body.
    pub payload: Bytes,

    /// How the broker should treat the message.
    pub delivery_mode: DeliveryMode,

    /// Token echoed back on the acknowledgement event.
    pub correlation_token: Option<CorrelationToken>,
}

impl OutboundMessage {
    /// Creates a direct message.
    pub fn new(destination: Destination, payload: impl Into<Bytes>) -> Self {
        Self {
            destination,
            payload: payload.into(),
            delivery_mode: DeliveryMode::Direct,
            correlation_token: None,
        }
    }

    /// Sets the delivery mode.
    #[must_use]
    pub const fn with_delivery_mode(mut self, delivery_mode: DeliveryMode) -> Self {
        self.delivery_mode = delivery_mode;
        self
    }

    /// Shorthand for [`DeliveryMode::Persistent`].
    #[must_use]
    pub const fn persistent(self) -> Self {
        self.with_delivery_mode(DeliveryMode::Persistent)
    }
}

/// A message received directly on a session, either through a topic
/// subscription or as the reply to a request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceivedMessage {
    /// Where the message was published to.
    pub destination: Destination,

    /// The message body.
    pub payload: Bytes,
}

/// Broker-assigned identifier of a message delivered on a flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeliveryId(u64);

impl DeliveryId {
    /// Wraps a raw identifier.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw identifier.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A guaranteed message pushed to a consuming flow, outstanding until it is
/// acknowledged by its [`DeliveryId`].
#[derive(Clone, Debug)]
pub struct InFlightMessage {
    /// The message body.
    pub payload: Bytes,

    /// Identifier used to acknowledge the message.
    pub delivery_id: DeliveryId,

    /// When the flow received the message.
    pub received_at: Instant,

    /// Where the message was originally published to.
    pub destination: Destination,

    /// Whether the broker delivered this message before without it being
    /// acknowledged.
    pub redelivered: bool,
}
