use std::error::Error;
use std::fmt::Debug;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::message::{DeliveryId, InFlightMessage};
use crate::window::DeliveryWindow;

/// Marker trait for flow errors
pub trait FlowError: Debug + Error + Send + Sync + 'static {}

/// Stream of messages pushed to a flow, in delivery order.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = InFlightMessage> + Send>>;

/// How deliveries on a flow are acknowledged.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum AckMode {
    /// The application acknowledges each message by its delivery id.
    /// Acknowledgements are per message, not cumulative.
    #[default]
    Client,

    /// The broker considers a message acknowledged once pushed.
    Auto,
}

/// Options fixed when a flow is created.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlowOptions {
    /// Acknowledgement mode.
    pub ack_mode: AckMode,

    /// Maximum outstanding unacknowledged messages.
    pub window: DeliveryWindow,
}

/// A consuming flow bound to one endpoint.
///
/// While started, the broker pushes messages as long as fewer than
/// [`DeliveryWindow::capacity`] are unacknowledged.
#[async_trait]
pub trait Flow
where
    Self: Debug + Send + Sync + 'static,
{
    /// The error type for the flow.
    type Error: FlowError;

    /// The delivery window the flow was created with.
    fn window(&self) -> DeliveryWindow;

    /// Takes the stream of deliveries. Can only be taken once.
    fn deliveries(&self) -> Result<DeliveryStream, Self::Error>;

    /// Starts (or resumes) delivery.
    async fn start(&self) -> Result<(), Self::Error>;

    /// Stops delivery. Outstanding messages stay outstanding.
    async fn stop(&self) -> Result<(), Self::Error>;

    /// Acknowledges one delivered message.
    async fn ack(&self, delivery_id: DeliveryId) -> Result<(), Self::Error>;

    /// Unbinds the flow. Unacknowledged messages become eligible for
    /// redelivery.
    async fn close(&self) -> Result<(), Self::Error>;
}
