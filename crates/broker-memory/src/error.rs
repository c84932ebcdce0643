use courier_broker::{Capability, DeliveryId, FlowError, SessionError};
use thiserror::Error;

/// Errors returned by the in-memory broker.
#[derive(Debug, Error)]
pub enum Error {
    /// The VPN or credentials were refused.
    #[error("connect refused: {0}")]
    ConnectRefused(String),

    /// The flow has been closed.
    #[error("flow is closed")]
    FlowClosed,

    /// The message is larger than the queue accepts.
    #[error("message of {size} bytes exceeds the {max} byte limit of {queue}")]
    MessageTooLarge {
        /// The queue that refused the message.
        queue: String,
        /// The message size.
        size: usize,
        /// The queue's limit.
        max: usize,
    },

    /// The session does not support the capability.
    #[error("capability not supported: {0:?}")]
    MissingCapability(Capability),

    /// The session is not connected.
    #[error("session is not connected")]
    NotConnected,

    /// The endpoint already exists.
    #[error("endpoint already exists: {0}")]
    QueueExists(String),

    /// An exclusive queue already has a flow bound.
    #[error("exclusive queue already has a flow bound: {0}")]
    QueueInUse(String),

    /// The queue does not exist.
    #[error("unknown queue: {0}")]
    QueueNotFound(String),

    /// A take-once stream was already taken.
    #[error("{0} stream already taken")]
    StreamTaken(&'static str),

    /// The broker could not be reached within the allowed retries.
    #[error("broker unreachable: {0}")]
    Unreachable(String),

    /// The delivery id is not outstanding on the flow.
    #[error("unknown delivery: {0}")]
    UnknownDelivery(DeliveryId),
}

impl SessionError for Error {}

impl FlowError for Error {}
