use std::sync::atomic::{AtomicU64, Ordering};

/// Counters maintained by a running dispatcher.
#[derive(Debug, Default)]
pub struct DispatcherStats {
    received: AtomicU64,
    pulled: AtomicU64,
    acknowledged: AtomicU64,
    failed: AtomicU64,
}

impl DispatcherStats {
    /// Messages handed from the flow to the local queue.
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::SeqCst)
    }

    /// Messages taken off the local queue by a worker.
    pub fn pulled(&self) -> u64 {
        self.pulled.load(Ordering::SeqCst)
    }

    /// Messages acknowledged to the broker.
    pub fn acknowledged(&self) -> u64 {
        self.acknowledged.load(Ordering::SeqCst)
    }

    /// Messages whose processing failed or panicked.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::SeqCst)
    }

    pub(crate) fn record_received(&self) {
        self.received.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_pulled(&self) {
        self.pulled.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_acknowledged(&self) {
        self.acknowledged.fetch_add(1, Ordering::SeqCst);
    }

    /// Returns the failure count including this one.
    pub(crate) fn record_failed(&self) -> u64 {
        self.failed.fetch_add(1, Ordering::SeqCst) + 1
    }
}
