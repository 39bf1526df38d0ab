//! Per-workflow event buffer and the reactor-facing event source.

use crate::error::Cancelled;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

struct Queue<E> {
    items: VecDeque<E>,
    closed: bool,
}

/// Unbounded FIFO of events with a single logical consumer.
///
/// Producers never block. A consumer that finds the queue empty parks on a
/// `Notify`; `notify_one` stores a permit when nobody is parked, so a send
/// racing the emptiness check is never lost.
pub(crate) struct EventBuffer<E> {
    queue: Mutex<Queue<E>>,
    notify: Notify,
    backlog_warn: usize,
}

impl<E> EventBuffer<E> {
    pub(crate) fn new(backlog_warn: usize) -> Self {
        Self {
            queue: Mutex::new(Queue {
                items: VecDeque::new(),
                closed: false,
            }),
            notify: Notify::new(),
            backlog_warn,
        }
    }

    /// Enqueues an event. Returns false if the buffer is closed.
    pub(crate) fn send(&self, event: E) -> bool {
        let pending = {
            let mut queue = self.queue.lock();
            if queue.closed {
                return false;
            }
            queue.items.push_back(event);
            queue.items.len()
        };

        if self.backlog_warn > 0 && pending == self.backlog_warn {
            tracing::warn!(pending, "event backlog reached warning threshold");
        }

        self.notify.notify_one();
        true
    }

    pub(crate) fn try_receive(&self) -> Option<E> {
        self.queue.lock().items.pop_front()
    }

    /// Waits for the oldest event.
    pub(crate) async fn receive(&self) -> E {
        loop {
            if let Some(event) = self.try_receive() {
                return event;
            }
            self.notify.notified().await;
        }
    }

    pub(crate) fn pending(&self) -> usize {
        self.queue.lock().items.len()
    }

    /// Rejects further sends and drops anything still queued.
    pub(crate) fn close(&self) {
        let dropped = {
            let mut queue = self.queue.lock();
            queue.closed = true;
            std::mem::take(&mut queue.items)
        };
        if !dropped.is_empty() {
            tracing::debug!(dropped = dropped.len(), "dropping unconsumed events");
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.queue.lock().closed
    }
}

type CancelHook = Box<dyn FnOnce() + Send + 'static>;

/// The reactor's view of its workflow's events and cancellation.
///
/// Every wait offered here races the workflow's cancellation token, so a
/// cancelled workflow unblocks its invocation with [`Cancelled`].
pub struct EventSource<E> {
    buffer: Arc<EventBuffer<E>>,
    token: CancellationToken,
    hooks: Mutex<Vec<CancelHook>>,
}

impl<E: Send + 'static> EventSource<E> {
    pub(crate) fn new(buffer: Arc<EventBuffer<E>>, token: CancellationToken) -> Self {
        Self {
            buffer,
            token,
            hooks: Mutex::new(Vec::new()),
        }
    }

    /// Waits for the oldest buffered event.
    pub async fn receive(&self) -> Result<E, Cancelled> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Cancelled),
            event = self.buffer.receive() => Ok(event),
        }
    }

    /// Takes the oldest buffered event without waiting.
    pub fn try_receive(&self) -> Option<E> {
        self.buffer.try_receive()
    }

    /// Enqueues an event for a later invocation of this same workflow.
    pub fn send(&self, event: E) {
        if !self.buffer.send(event) {
            tracing::trace!("event sent to a terminated workflow was dropped");
        }
    }

    /// Number of events waiting to be received.
    pub fn pending(&self) -> usize {
        self.buffer.pending()
    }

    /// Awaits `fut` unless the workflow is cancelled first.
    pub async fn race<F: Future>(&self, fut: F) -> Result<F::Output, Cancelled> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Cancelled),
            output = fut => Ok(output),
        }
    }

    /// Check if the workflow has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Completes when the workflow is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// A child token for nested work; cancelled together with the workflow.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Registers a callback to run if the workflow is cancelled while the
    /// current invocation is active.
    ///
    /// Callbacks run after the invocation has been dropped and before the
    /// workflow's result is settled. They are discarded once the invocation
    /// returns a reaction.
    pub fn on_cancel(&self, hook: impl FnOnce() + Send + 'static) {
        self.hooks.lock().push(Box::new(hook));
    }

    pub(crate) fn clear_cancel_hooks(&self) {
        self.hooks.lock().clear();
    }

    pub(crate) fn run_cancel_hooks(&self) {
        let hooks = std::mem::take(&mut *self.hooks.lock());
        for hook in hooks {
            if catch_unwind(AssertUnwindSafe(hook)).is_err() {
                tracing::error!("cancellation callback panicked");
            }
        }
    }
}
