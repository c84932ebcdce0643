//! Abstract interface for a guaranteed-delivery message broker.
//!
//! The broker itself (wire protocol, spooling, redelivery policy) is a black
//! box. This crate describes the operations a session and a consuming flow
//! expose, and the events the broker reports back asynchronously.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Connection properties for opening a session.
pub mod config;

/// Queues and other durable resources that can be provisioned.
pub mod endpoint;

/// Session events reported by the broker.
pub mod event;

/// Consuming flows bound to a queue.
pub mod flow;

/// Outbound and inbound message types.
pub mod message;

/// Sessions: the connection-scoped handle to the broker.
pub mod session;

/// Subscriptions and topic matching.
pub mod subscription;

/// Correlation tokens that tie a request to its completion event.
pub mod token;

/// Delivery windows bounding unacknowledged messages on a flow.
pub mod window;

pub use config::ConnectionProperties;
pub use endpoint::{AccessType, Endpoint, EndpointProperties, Permission, ProvisionFlags};
pub use event::{SessionEvent, SessionEventKind};
pub use flow::{AckMode, DeliveryStream, Flow, FlowError, FlowOptions};
pub use message::{
    DeliveryId, DeliveryMode, Destination, InFlightMessage, OutboundMessage, ReceivedMessage,
};
pub use session::{
    Capability, Confirmation, EventStream, MessageStream, ReturnCode, Session, SessionError,
};
pub use subscription::{Subscription, topic_matches};
pub use token::CorrelationToken;
pub use window::DeliveryWindow;

// Re-export dependencies that are part of our public API
pub use bytes::Bytes;
