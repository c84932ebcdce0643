use courier_broker::DeliveryId;
use thiserror::Error;

/// The result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the dispatcher.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// `start` was called more than once.
    #[error("dispatcher already started")]
    AlreadyStarted,

    /// The flow refused a call.
    #[error("flow error: {0}")]
    Flow(String),

    /// Processing one message failed. Local to that message and worker.
    #[error("processing {delivery_id} failed: {reason}")]
    ProcessingFailure {
        /// The message that failed.
        delivery_id: DeliveryId,
        /// What the processor reported.
        reason: String,
    },
}
