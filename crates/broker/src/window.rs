use std::num::NonZeroUsize;

const TWO: NonZeroUsize = NonZeroUsize::MIN.saturating_add(1);

/// The maximum number of unacknowledged messages a broker keeps outstanding
/// on one flow.
///
/// Capacity is fixed when the flow is created. The outstanding count is owned
/// by the broker; consumers only free capacity by acknowledging.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DeliveryWindow {
    capacity: NonZeroUsize,
}

impl DeliveryWindow {
    /// Creates a window of the given capacity.
    #[must_use]
    pub const fn new(capacity: NonZeroUsize) -> Self {
        Self { capacity }
    }

    /// The conventional window for `workers` concurrent workers: one message
    /// in hand per worker plus one buffered.
    #[must_use]
    pub const fn for_workers(workers: NonZeroUsize) -> Self {
        Self {
            capacity: workers.saturating_mul(TWO),
        }
    }

    /// The maximum number of outstanding messages.
    #[must_use]
    pub const fn capacity(self) -> usize {
        self.capacity.get()
    }

    /// Whether another message may be pushed while `outstanding` are unacked.
    #[must_use]
    pub const fn has_room(self, outstanding: usize) -> bool {
        outstanding < self.capacity.get()
    }
}

impl Default for DeliveryWindow {
    fn default() -> Self {
        Self::for_workers(NonZeroUsize::MIN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_workers_doubles() {
        let window = DeliveryWindow::for_workers(NonZeroUsize::new(4).unwrap());
        assert_eq!(window.capacity(), 8);
    }

    #[test]
    fn test_has_room() {
        let window = DeliveryWindow::new(NonZeroUsize::new(2).unwrap());
        assert!(window.has_room(0));
        assert!(window.has_room(1));
        assert!(!window.has_room(2));
    }
}
