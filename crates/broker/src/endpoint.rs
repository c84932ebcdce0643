use std::fmt;

use crate::session::Confirmation;

/// A durable resource on the broker that guaranteed messages are spooled to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// A named queue.
    Queue(String),

    /// A durable topic endpoint, holding messages for a single subscriber.
    ///
    /// Passed through to the broker as is. A broker without separate topic
    /// endpoints may treat it as a queue of the same name.
    TopicEndpoint(String),
}

impl Endpoint {
    /// Creates a queue endpoint.
    pub fn queue(name: impl Into<String>) -> Self {
        Self::Queue(name.into())
    }

    /// The endpoint name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Queue(name) | Self::TopicEndpoint(name) => name,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queue(name) => write!(f, "queue:{name}"),
            Self::TopicEndpoint(name) => write!(f, "topic-endpoint:{name}"),
        }
    }
}

/// What non-owner clients may do with an endpoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Permission {
    /// No access.
    None,

    /// Browse only.
    ReadOnly,

    /// Browse and consume.
    #[default]
    Consume,

    /// Consume and change topic subscriptions.
    ModifyTopic,

    /// Full control, including deletion.
    Delete,
}

/// How many flows may consume from an endpoint at once.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum AccessType {
    /// A single active flow.
    #[default]
    Exclusive,

    /// Any number of flows, messages shared between them.
    NonExclusive,
}

/// Properties applied to an endpoint when it is provisioned.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EndpointProperties {
    /// Permission for non-owner clients. Enforcement is up to the broker;
    /// this crate only carries it.
    pub permission: Permission,

    /// Exclusive or shared consumption.
    pub access_type: AccessType,

    /// Largest accepted payload, unlimited when unset.
    pub max_message_size: Option<usize>,
}

/// Options for a provision request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProvisionFlags {
    /// Succeed if the endpoint already exists instead of failing.
    pub ignore_if_exists: bool,

    /// Whether to wait for the broker's confirmation event.
    pub confirmation: Confirmation,
}

impl Default for ProvisionFlags {
    fn default() -> Self {
        Self {
            ignore_if_exists: true,
            confirmation: Confirmation::Broker,
        }
    }
}
