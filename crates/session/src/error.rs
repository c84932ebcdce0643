use std::time::Duration;

use courier_broker::Capability;
use thiserror::Error;

/// The result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to callers of the correlation bridge.
///
/// Broker-reported failures carry the broker's diagnostic text.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// `connect` was called on a session that is already connected.
    #[error("session is already connected")]
    AlreadyConnected,

    /// The broker refused or failed the connection.
    #[error("connect failed: {0}")]
    ConnectFailure(String),

    /// `connect` was called while a previous connect is still pending.
    #[error("connect already in progress")]
    ConnectInProgress,

    /// The session lacks a capability the caller requires.
    #[error("session lacks capability {0:?}")]
    MissingCapability(Capability),

    /// A request/reply exchange did not complete in time.
    #[error("operation timed out after {0:?}")]
    OperationTimeout(Duration),

    /// The broker failed to create an endpoint.
    #[error("provision failed: {0}")]
    ProvisionFailure(String),

    /// The broker refused a published message.
    #[error("send rejected: {0}")]
    SendRejected(String),

    /// A session-level call failed outside any correlated operation.
    #[error("session error: {0}")]
    Session(String),

    /// The bridge shut down, or the broker's event stream ended, before the
    /// operation completed.
    #[error("session closed")]
    SessionClosed,

    /// The broker refused a subscription.
    #[error("subscribe rejected: {0}")]
    SubscribeRejected(String),
}
