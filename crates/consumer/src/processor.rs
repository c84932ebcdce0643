use std::error::Error;
use std::fmt::Debug;

use async_trait::async_trait;
use courier_broker::InFlightMessage;

/// Marker trait for processor errors
pub trait ProcessorError: Debug + Error + Send + Sync + 'static {}

/// Application logic run by the dispatcher's workers, once per message.
///
/// Returning an error (or panicking) marks the message as failed; the worker
/// moves on to the next one either way.
#[async_trait]
pub trait MessageProcessor
where
    Self: Debug + Send + Sync + 'static,
{
    /// The error type for the processor.
    type Error: ProcessorError;

    /// Processes one delivered message.
    async fn process(&self, message: &InFlightMessage) -> Result<(), Self::Error>;
}
