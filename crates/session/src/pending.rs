use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use courier_broker::ReturnCode;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{Error, Result};

type Slot = oneshot::Sender<Result<ReturnCode>>;

/// Creates a single-assignment completion cell.
///
/// The [`Completer`] may be cloned and handed to every path that can finish
/// the operation; the [`PendingOperation`] is awaited by the caller.
#[must_use]
pub fn pending_operation() -> (Completer, PendingOperation) {
    let (sender, receiver) = oneshot::channel();

    (
        Completer {
            slot: Arc::new(Mutex::new(Some(sender))),
        },
        PendingOperation { receiver },
    )
}

/// The write side of a pending operation.
#[derive(Clone, Debug)]
pub struct Completer {
    slot: Arc<Mutex<Option<Slot>>>,
}

impl Completer {
    /// Completes the operation. Only the first call across all clones takes
    /// effect; it returns `true`. Later calls return `false` and do nothing.
    pub fn complete(&self, result: Result<ReturnCode>) -> bool {
        let Some(sender) = self.slot.lock().take() else {
            return false;
        };

        // The caller may have stopped waiting; the operation still counts as
        // completed.
        let _ = sender.send(result);
        true
    }

    /// Whether the operation has been completed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.slot.lock().is_none()
    }
}

/// The read side of a pending operation.
///
/// Resolves with the first result passed to [`Completer::complete`], or with
/// [`Error::SessionClosed`] if every completer is dropped first.
#[derive(Debug)]
pub struct PendingOperation {
    receiver: oneshot::Receiver<Result<ReturnCode>>,
}

impl Future for PendingOperation {
    type Output = Result<ReturnCode>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(Error::SessionClosed)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_second_completion_is_noop() {
        let (completer, pending) = pending_operation();

        assert!(!completer.is_completed());
        assert!(completer.complete(Ok(ReturnCode::Ok)));
        assert!(!completer.complete(Err(Error::SendRejected("late".into()))));
        assert!(completer.is_completed());

        assert_eq!(pending.await, Ok(ReturnCode::Ok));
    }

    #[tokio::test]
    async fn test_dropped_completer_closes_operation() {
        let (completer, pending) = pending_operation();
        drop(completer);

        assert_eq!(pending.await, Err(Error::SessionClosed));
    }

    #[tokio::test]
    async fn test_completing_after_caller_gave_up() {
        let (completer, pending) = pending_operation();
        drop(pending);

        assert!(completer.complete(Ok(ReturnCode::Ok)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_completers_resolve_once() {
        let (completer, pending) = pending_operation();
        let wins = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let completer = completer.clone();
                let wins = Arc::clone(&wins);
                tokio::spawn(async move {
                    let result = if i % 2 == 0 {
                        Ok(ReturnCode::Ok)
                    } else {
                        Err(Error::SendRejected(format!("racer {i}")))
                    };
                    if completer.complete(result) {
                        wins.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(wins.load(Ordering::SeqCst), 1);
        assert_ne!(pending.await, Err(Error::SessionClosed));
    }
}
