use std::error::Error;
use std::fmt::Debug;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::endpoint::{Endpoint, EndpointProperties};
use crate::event::SessionEvent;
use crate::flow::{Flow, FlowOptions};
use crate::message::{OutboundMessage, ReceivedMessage};
use crate::subscription::Subscription;
use crate::token::CorrelationToken;

/// Marker trait for session errors
pub trait SessionError: Debug + Error + Send + Sync + 'static {}

/// Stream of session events, in the order the broker emitted them.
pub type EventStream = Pin<Box<dyn Stream<Item = SessionEvent> + Send>>;

/// Stream of messages delivered directly to a session.
pub type MessageStream = Pin<Box<dyn Stream<Item = ReceivedMessage> + Send>>;

/// Immediate status of a broker call. Failures are reported as errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReturnCode {
    /// The call completed.
    Ok,

    /// The call was accepted; its outcome arrives later as an event.
    InProgress,

    /// The call could not be accepted right now without blocking.
    WouldBlock,
}

/// Whether an operation completes on local acceptance or on the broker's
/// confirmation event.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Confirmation {
    /// Complete as soon as the broker call returns.
    Local,

    /// Complete when the broker's confirmation (or failure) event arrives.
    #[default]
    Broker,
}

/// Optional features a broker may or may not support on a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Publishing guaranteed messages.
    PubGuaranteed,

    /// Consuming guaranteed messages through flows.
    SubFlowGuaranteed,

    /// Provisioning endpoints from the client.
    EndpointManagement,

    /// Adding topic subscriptions to queues.
    QueueSubscriptions,
}

/// A connection-scoped handle to the broker.
///
/// Calls return an immediate status. Operations issued with a correlation
/// token additionally report their outcome later on the [`EventStream`],
/// carrying the same token.
#[async_trait]
pub trait Session
where
    Self: Debug + Send + Sync + 'static,
{
    /// The error type for the session.
    type Error: SessionError;

    /// The flow type created by the session.
    type Flow: Flow;

    /// Takes the session's event stream. Can only be taken once.
    fn events(&self) -> Result<EventStream, Self::Error>;

    /// Takes the stream of directly delivered messages. Can only be taken
    /// once.
    fn messages(&self) -> Result<MessageStream, Self::Error>;

    /// Whether the broker supports `capability` on this session.
    fn is_capable(&self, capability: Capability) -> bool;

    /// Connects the session.
    async fn connect(&self) -> Result<ReturnCode, Self::Error>;

    /// Publishes a message. Guaranteed messages carrying a correlation token
    /// are acknowledged or rejected later with that token.
    async fn send(&self, message: OutboundMessage) -> Result<ReturnCode, Self::Error>;

    /// Adds a subscription. With a token, the outcome is also reported as a
    /// subscribe event; without one, the immediate result is final.
    async fn subscribe(
        &self,
        subscription: &Subscription,
        token: Option<CorrelationToken>,
    ) -> Result<ReturnCode, Self::Error>;

    /// Creates a durable endpoint. With a token, the outcome is also reported
    /// as a provision event; without one, the immediate result is final.
    async fn provision(
        &self,
        endpoint: &Endpoint,
        properties: &EndpointProperties,
        ignore_if_exists: bool,
        token: Option<CorrelationToken>,
    ) -> Result<ReturnCode, Self::Error>;

    /// Sends a request and waits for its reply. Does not time out by itself.
    async fn request(&self, message: OutboundMessage) -> Result<ReceivedMessage, Self::Error>;

    /// Binds a consuming flow to an endpoint.
    async fn create_flow(
        &self,
        endpoint: &Endpoint,
        options: FlowOptions,
    ) -> Result<Self::Flow, Self::Error>;

    /// Disconnects the session.
    async fn disconnect(&self) -> Result<(), Self::Error>;
}
