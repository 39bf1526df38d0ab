//! Single-assignment result cell.

use crate::error::{ReactorFailure, WorkflowError};
use tokio::sync::watch;

/// Terminal outcome of a workflow.
#[derive(Debug, Clone)]
pub enum Settlement<R> {
    Success(R),
    Failure(ReactorFailure),
    Cancelled,
}

impl<R> Settlement<R> {
    /// Converts into the value returned to result awaiters.
    pub fn into_result(self) -> Result<R, WorkflowError> {
        match self {
            Settlement::Success(value) => Ok(value),
            Settlement::Failure(failure) => Err(WorkflowError::Failed(failure)),
            Settlement::Cancelled => Err(WorkflowError::Cancelled),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Settlement::Failure(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Settlement::Cancelled)
    }
}

/// Holds a workflow's settlement. The first `settle` wins; later ones are
/// rejected without touching the stored outcome.
pub(crate) struct ResultCell<R> {
    tx: watch::Sender<Option<Settlement<R>>>,
}

impl<R: Clone> ResultCell<R> {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    /// Stores the outcome. Returns false if the cell was already settled.
    pub(crate) fn settle(&self, outcome: Settlement<R>) -> bool {
        let mut outcome = Some(outcome);
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = outcome.take();
            true
        })
    }

    /// Waits until the cell is settled and returns a copy of the outcome.
    pub(crate) async fn wait(&self) -> Settlement<R> {
        let mut rx = self.tx.subscribe();
        loop {
            if let Some(settlement) = rx.borrow_and_update().as_ref().cloned() {
                return settlement;
            }
            // The sender lives in `self`, so this only fails if it is being torn down.
            if rx.changed().await.is_err() {
                return Settlement::Cancelled;
            }
        }
    }

    pub(crate) fn peek(&self) -> Option<Settlement<R>> {
        self.tx.borrow().as_ref().cloned()
    }

    pub(crate) fn is_settled(&self) -> bool {
        self.tx.borrow().is_some()
    }

    pub(crate) fn is_failed(&self) -> bool {
        self.tx.borrow().as_ref().is_some_and(Settlement::is_failure)
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.tx.borrow().as_ref().is_some_and(Settlement::is_cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReactorError;
    use tokio_test::{assert_pending, assert_ready, task};

    #[test]
    fn test_settles_exactly_once() {
        let cell = ResultCell::new();
        assert!(!cell.is_settled());

        assert!(cell.settle(Settlement::Success("first")));
        assert!(!cell.settle(Settlement::Success("second")));
        assert!(!cell.settle(Settlement::Cancelled));

        assert!(cell.is_settled());
        assert!(!cell.is_failed());
        assert!(matches!(cell.peek(), Some(Settlement::Success("first"))));
    }

    #[test]
    fn test_wait_pending_until_settled() {
        let cell = ResultCell::<u32>::new();
        let mut waiter = task::spawn(cell.wait());
        assert_pending!(waiter.poll());

        cell.settle(Settlement::Success(9));
        assert!(waiter.is_woken());
        assert_eq!(assert_ready!(waiter.poll()).into_result().unwrap(), 9);
    }

    #[tokio::test]
    async fn test_every_waiter_sees_same_outcome() {
        let cell = ResultCell::<u32>::new();
        let failure = ReactorFailure::from_error(ReactorError::msg("RuntimeError", "nope"));
        cell.settle(Settlement::Failure(failure));

        for _ in 0..3 {
            let err = cell.wait().await.into_result().unwrap_err();
            assert_eq!(err.to_string(), "threw RuntimeError: nope");
        }
        assert!(cell.is_failed());
        assert!(!cell.is_cancelled());
    }

    #[test]
    fn test_cancelled_settlement() {
        let cell = ResultCell::<()>::new();
        cell.settle(Settlement::Cancelled);
        assert!(cell.is_cancelled());
        assert!(cell.peek().unwrap().into_result().unwrap_err().is_cancelled());
    }
}
