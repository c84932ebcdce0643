use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use courier_broker::{DeliveryStream, Flow, InFlightMessage};
use futures::{FutureExt, StreamExt};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, error, info, warn};

use crate::config::{DispatcherConfig, FailurePolicy};
use crate::error::{Error, Result};
use crate::processor::MessageProcessor;
use crate::stats::DispatcherStats;

/// Lifecycle of a dispatcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatcherState {
    /// Constructed; the flow is bound but not receiving.
    Created,

    /// The flow is receiving and workers are running.
    Started,

    /// No new messages are pulled; in-flight messages are finishing.
    Draining,

    /// Terminal. The flow has been stopped and closed.
    Stopped,
}

/// A fixed pool of workers draining one flow.
///
/// Deliveries are moved off the flow into a local bounded queue by a pump
/// task that never runs processing itself. Each worker pulls a message, runs
/// the [`MessageProcessor`] and acknowledges the message by its delivery id.
/// Acknowledgements are per message and may be out of delivery order.
///
/// Dropping the dispatcher cancels it; the pool drains in the background and
/// releases the flow.
#[derive(Debug)]
pub struct Dispatcher<F, P>
where
    F: Flow,
    P: MessageProcessor,
{
    flow: Arc<F>,
    processor: Arc<P>,
    config: DispatcherConfig,
    state: Arc<Mutex<DispatcherState>>,
    stats: Arc<DispatcherStats>,
    shutdown_token: CancellationToken,
    task_tracker: TaskTracker,
}

impl<F, P> Dispatcher<F, P>
where
    F: Flow,
    P: MessageProcessor,
{
    /// Creates a dispatcher over `flow`. Nothing runs until [`start`].
    ///
    /// [`start`]: Self::start
    pub fn new(flow: F, processor: P, config: DispatcherConfig) -> Self {
        let capacity = flow.window().capacity();
        if capacity < config.workers.get() {
            warn!(
                "delivery window of {capacity} is smaller than {} workers; some workers will idle",
                config.workers
            );
        }

        Self {
            flow: Arc::new(flow),
            processor: Arc::new(processor),
            config,
            state: Arc::new(Mutex::new(DispatcherState::Created)),
            stats: Arc::new(DispatcherStats::default()),
            shutdown_token: CancellationToken::new(),
            task_tracker: TaskTracker::new(),
        }
    }

    /// Ties the dispatcher's cancellation to `parent`: cancelling `parent`
    /// drains and stops this dispatcher.
    #[must_use]
    pub fn with_cancellation_token(mut self, parent: &CancellationToken) -> Self {
        self.shutdown_token = parent.child_token();
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> DispatcherState {
        *self.state.lock()
    }

    /// Live counters.
    pub fn stats(&self) -> &DispatcherStats {
        &self.stats
    }

    /// The token that drains the dispatcher when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Spawns the pump and workers, then starts the flow.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyStarted`] on a second call, or
    /// [`Error::Flow`] if the flow's deliveries cannot be taken or the flow
    /// fails to start.
    pub async fn start(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state != DispatcherState::Created {
                return Err(Error::AlreadyStarted);
            }
            *state = DispatcherState::Started;
        }

        let deliveries = match self.flow.deliveries() {
            Ok(deliveries) => deliveries,
            Err(e) => {
                *self.state.lock() = DispatcherState::Stopped;
                self.task_tracker.close();
                return Err(Error::Flow(e.to_string()));
            }
        };

        let capacity = self.flow.window().capacity();
        let (sender, receiver) = flume::bounded(capacity);

        self.task_tracker.spawn(
            pump(
                deliveries,
                sender,
                Arc::clone(&self.stats),
                self.shutdown_token.clone(),
            )
            .in_current_span(),
        );

        let workers = TaskTracker::new();
        for id in 0..self.config.workers.get() {
            workers.spawn(
                work(
                    id,
                    Arc::clone(&self.flow),
                    Arc::clone(&self.processor),
                    receiver.clone(),
                    Held {
                        policy: self.config.failure_policy,
                        capacity: u64::try_from(capacity).unwrap_or(u64::MAX),
                    },
                    Arc::clone(&self.stats),
                    self.shutdown_token.clone(),
                )
                .in_current_span(),
            );
        }
        workers.close();
        drop(receiver);

        let flow = Arc::clone(&self.flow);
        let state = Arc::clone(&self.state);
        let shutdown_token = self.shutdown_token.clone();
        let lifecycle = async move {
            tokio::select! {
                () = shutdown_token.cancelled() => {
                    info!("dispatcher cancelled, draining in-flight messages");
                }
                () = workers.wait() => {
                    info!("delivery stream ended, draining");
                }
            }

            *state.lock() = DispatcherState::Draining;
            workers.wait().await;

            if let Err(e) = flow.stop().await {
                warn!("failed to stop flow: {e}");
            }
            if let Err(e) = flow.close().await {
                warn!("failed to close flow: {e}");
            }

            *state.lock() = DispatcherState::Stopped;
            info!("dispatcher stopped");
        };
        self.task_tracker.spawn(lifecycle.in_current_span());

        self.task_tracker.close();

        if let Err(e) = self.flow.start().await {
            error!("failed to start flow: {e}");
            self.shutdown_token.cancel();
            return Err(Error::Flow(e.to_string()));
        }

        info!(
            "dispatcher started with {} worker(s) and a window of {capacity}",
            self.config.workers
        );

        Ok(())
    }

    /// Cancels the dispatcher and waits for it to stop.
    pub async fn shutdown(&self) {
        info!("dispatcher shutting down...");

        self.shutdown_token.cancel();
        {
            let mut state = self.state.lock();
            if *state == DispatcherState::Created {
                *state = DispatcherState::Stopped;
                self.task_tracker.close();
            }
        }
        self.task_tracker.wait().await;
    }

    /// Waits until the dispatcher has stopped.
    pub async fn wait(&self) {
        self.task_tracker.wait().await;
    }
}

impl<F, P> Drop for Dispatcher<F, P>
where
    F: Flow,
    P: MessageProcessor,
{
    fn drop(&mut self) {
        self.shutdown_token.cancel();
    }
}

/// How a worker treats failed messages, with the window size they count
/// against.
#[derive(Clone, Copy)]
struct Held {
    policy: FailurePolicy,
    capacity: u64,
}

async fn pump(
    mut deliveries: DeliveryStream,
    queue: flume::Sender<InFlightMessage>,
    stats: Arc<DispatcherStats>,
    shutdown_token: CancellationToken,
) {
    loop {
        let delivery = tokio::select! {
            biased;
            () = shutdown_token.cancelled() => break,
            delivery = deliveries.next() => delivery,
        };
        let Some(message) = delivery else {
            debug!("delivery stream ended");
            break;
        };
        stats.record_received();

        match queue.try_send(message) {
            Ok(()) => {}
            // The window bounds outstanding messages, so this only happens
            // if the flow over-delivers.
            Err(flume::TrySendError::Full(message)) => {
                warn!(
                    "local queue full, holding {} until a worker frees a slot",
                    message.delivery_id
                );
                tokio::select! {
                    biased;
                    () = shutdown_token.cancelled() => break,
                    sent = queue.send_async(message) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
            Err(flume::TrySendError::Disconnected(_)) => break,
        }
    }
}

async fn work<F, P>(
    id: usize,
    flow: Arc<F>,
    processor: Arc<P>,
    queue: flume::Receiver<InFlightMessage>,
    held: Held,
    stats: Arc<DispatcherStats>,
    shutdown_token: CancellationToken,
) where
    F: Flow,
    P: MessageProcessor,
{
    loop {
        // Cancellation is checked first: once cancelled, nothing more is
        // pulled even if the queue still holds messages.
        let message = tokio::select! {
            biased;
            () = shutdown_token.cancelled() => break,
            received = queue.recv_async() => match received {
                Ok(message) => message,
                Err(_) => break,
            },
        };
        stats.record_pulled();

        let delivery_id = message.delivery_id;
        let outcome = AssertUnwindSafe(processor.process(&message))
            .catch_unwind()
            .await;

        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(panic) => Some(panic_reason(panic.as_ref())),
        };

        if let Some(reason) = failure {
            let failed = stats.record_failed();
            let failure = Error::ProcessingFailure {
                delivery_id,
                reason,
            };

            match held.policy {
                FailurePolicy::LeaveUnacknowledged => {
                    warn!("worker {id}: {failure}; leaving it for redelivery");
                    if failed == held.capacity {
                        warn!(
                            "{failed} unacknowledged failure(s) fill the delivery window of {}; \
                             the flow receives nothing more until it is closed",
                            held.capacity
                        );
                    }
                    continue;
                }
                FailurePolicy::Acknowledge => {
                    warn!("worker {id}: {failure}; acknowledging it anyway");
                }
            }
        }

        match flow.ack(delivery_id).await {
            Ok(()) => stats.record_acknowledged(),
            Err(e) => error!("worker {id} failed to acknowledge {delivery_id}: {e}"),
        }
    }

    debug!("worker {id} exited");
}

fn panic_reason(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|reason| (*reason).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .map_or_else(
            || "processor panicked".to_string(),
            |reason| format!("processor panicked: {reason}"),
        )
}
