use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use courier_broker::{
    DeliveryId, DeliveryStream, DeliveryWindow, Flow, FlowOptions, InFlightMessage,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

use crate::MemoryBroker;
use crate::error::Error;
use crate::state::FlowSnapshot;

#[derive(Debug)]
struct FlowShared {
    broker: MemoryBroker,
    id: u64,
    queue: String,
    window: DeliveryWindow,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<InFlightMessage>>>,
    closed: AtomicBool,
}

impl FlowShared {
    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.broker.state().close_flow(self.id);
        }
    }
}

impl Drop for FlowShared {
    fn drop(&mut self) {
        self.close();
    }
}

/// A flow bound to a queue on a [`MemoryBroker`].
///
/// Clones share the same binding; the flow is unbound when closed or when the
/// last clone is dropped.
#[derive(Clone, Debug)]
pub struct MemoryFlow {
    inner: Arc<FlowShared>,
}

impl MemoryFlow {
    pub(crate) fn bind(
        broker: MemoryBroker,
        queue: &str,
        options: FlowOptions,
    ) -> Result<Self, Error> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = broker
            .state()
            .bind_flow(queue, options.window, options.ack_mode, sender)?;

        Ok(Self {
            inner: Arc::new(FlowShared {
                broker,
                id,
                queue: queue.to_string(),
                window: options.window,
                receiver: Mutex::new(Some(receiver)),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// The queue the flow is bound to.
    #[must_use]
    pub fn queue(&self) -> &str {
        &self.inner.queue
    }

    /// Messages pushed and not yet acknowledged.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.snapshot().outstanding
    }

    /// Highest number of unacknowledged messages seen at once.
    #[must_use]
    pub fn max_outstanding(&self) -> usize {
        self.snapshot().max_outstanding
    }

    /// Delivery ids acknowledged so far, in acknowledgement order.
    #[must_use]
    pub fn acknowledged(&self) -> Vec<DeliveryId> {
        self.snapshot().acknowledged
    }

    /// Current bookkeeping for the flow. Empty once the flow is closed.
    #[must_use]
    pub fn snapshot(&self) -> FlowSnapshot {
        self.inner
            .broker
            .state()
            .flow_snapshot(self.inner.id)
            .unwrap_or_default()
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.inner.closed.load(Ordering::SeqCst) {
            Err(Error::FlowClosed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Flow for MemoryFlow {
    type Error = Error;

    fn window(&self) -> DeliveryWindow {
        self.inner.window
    }

    fn deliveries(&self) -> Result<DeliveryStream, Self::Error> {
        let receiver = self
            .inner
            .receiver
            .lock()
            .take()
            .ok_or(Error::StreamTaken("delivery"))?;

        Ok(Box::pin(UnboundedReceiverStream::new(receiver)))
    }

    async fn start(&self) -> Result<(), Self::Error> {
        self.ensure_open()?;
        debug!("starting flow {} on {}", self.inner.id, self.inner.queue);
        self.inner.broker.state().set_started(self.inner.id, true)
    }

    async fn stop(&self) -> Result<(), Self::Error> {
        self.ensure_open()?;
        debug!("stopping flow {} on {}", self.inner.id, self.inner.queue);
        self.inner.broker.state().set_started(self.inner.id, false)
    }

    async fn ack(&self, delivery_id: DeliveryId) -> Result<(), Self::Error> {
        self.ensure_open()?;
        self.inner.broker.state().ack(self.inner.id, delivery_id)
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.inner.close();
        Ok(())
    }
}
