use std::num::NonZeroUsize;

use courier_broker::DeliveryWindow;

/// What happens to a message whose processing failed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Log and count the failure, and leave the message unacknowledged so the
    /// broker redelivers it once the flow is released.
    ///
    /// Each such message holds a slot of the delivery window until then.
    /// Once failures fill the window the flow receives nothing more, which
    /// is logged as a warning.
    #[default]
    LeaveUnacknowledged,

    /// Log and count the failure, then acknowledge the message anyway. The
    /// message is discarded.
    Acknowledge,
}

/// Configuration for a [`Dispatcher`](crate::Dispatcher).
#[derive(Clone, Copy, Debug)]
pub struct DispatcherConfig {
    /// Number of concurrent workers. Fixed for the dispatcher's lifetime.
    pub workers: NonZeroUsize,

    /// Handling of failed messages.
    pub failure_policy: FailurePolicy,
}

impl DispatcherConfig {
    /// Creates a config with `workers` workers and the default failure policy.
    #[must_use]
    pub fn new(workers: NonZeroUsize) -> Self {
        Self {
            workers,
            failure_policy: FailurePolicy::default(),
        }
    }

    /// The delivery window to create the flow with: two messages per worker,
    /// one in hand and one buffered.
    #[must_use]
    pub const fn window(&self) -> DeliveryWindow {
        DeliveryWindow::for_workers(self.workers)
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self::new(NonZeroUsize::MIN)
    }
}
