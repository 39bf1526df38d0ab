//! State broadcasting for workflow subscriptions.
//!
//! The broadcaster keeps the current state and the terminal closure
//! centrally. Each subscription owns a cursor with its own queue, so a slow
//! subscriber never blocks the engine or other subscribers and never loses
//! a state published after it subscribed.

use crate::error::{ReactorFailure, WorkflowError};
use futures::stream::{self, Stream};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use tokio::sync::Notify;

/// How a state stream ended.
#[derive(Debug, Clone)]
pub(crate) enum Closure {
    /// The workflow finished, or the subscriber closed its own cursor.
    Completed,
    Failed(ReactorFailure),
    Cancelled,
}

impl Closure {
    /// What a read reports once the queue is drained.
    fn read_result<S>(&self) -> Result<Option<S>, WorkflowError> {
        match self {
            Closure::Completed => Ok(None),
            Closure::Failed(failure) => Err(WorkflowError::Failed(failure.clone())),
            Closure::Cancelled => Err(WorkflowError::Cancelled),
        }
    }
}

struct CursorState<S> {
    queue: VecDeque<S>,
    closure: Option<Closure>,
    backlog_warned: bool,
}

/// One subscriber's position in the state stream.
struct Cursor<S> {
    id: String,
    state: Mutex<CursorState<S>>,
    notify: Notify,
    backlog_warn: usize,
}

impl<S> Cursor<S> {
    fn new(backlog_warn: usize) -> Self {
        Self {
            id: format!("sub-{}", uuid::Uuid::new_v4()),
            state: Mutex::new(CursorState {
                queue: VecDeque::new(),
                closure: None,
                backlog_warned: false,
            }),
            notify: Notify::new(),
            backlog_warn,
        }
    }

    fn push(&self, value: S) {
        {
            let mut state = self.state.lock();
            if state.closure.is_some() {
                return;
            }
            state.queue.push_back(value);

            if self.backlog_warn > 0
                && !state.backlog_warned
                && state.queue.len() >= self.backlog_warn
            {
                state.backlog_warned = true;
                tracing::warn!(
                    subscription_id = %self.id,
                    pending = state.queue.len(),
                    "subscriber is falling behind the state stream"
                );
            }
        }
        self.notify.notify_one();
    }

    /// Closes the cursor. Cancellation discards unread states; other
    /// closures let the subscriber drain what it already has.
    fn close(&self, closure: Closure) {
        {
            let mut state = self.state.lock();
            if state.closure.is_some() {
                return;
            }
            if matches!(closure, Closure::Cancelled) {
                state.queue.clear();
            }
            state.closure = Some(closure);
        }
        self.notify.notify_one();
    }
}

struct Hub<S> {
    current: Option<S>,
    closure: Option<Closure>,
    cursors: Vec<Weak<Cursor<S>>>,
}

/// Multicasts a workflow's states to independent subscriptions.
pub(crate) struct StateBroadcaster<S> {
    hub: Mutex<Hub<S>>,
    backlog_warn: usize,
}

impl<S: Clone> StateBroadcaster<S> {
    /// Creates a broadcaster. `backlog_warn` is the per-subscriber unread
    /// count that triggers a warning (0 disables it).
    pub(crate) fn new(backlog_warn: usize) -> Self {
        Self {
            hub: Mutex::new(Hub {
                current: None,
                closure: None,
                cursors: Vec::new(),
            }),
            backlog_warn,
        }
    }

    /// Publishes a new current state to every live subscription.
    ///
    /// Returns false if the broadcaster is already closed.
    pub(crate) fn publish(&self, value: S) -> bool {
        let mut hub = self.hub.lock();
        if hub.closure.is_some() {
            return false;
        }

        hub.cursors.retain(|cursor| cursor.strong_count() > 0);
        for cursor in hub.cursors.iter().filter_map(Weak::upgrade) {
            cursor.push(value.clone());
        }
        hub.current = Some(value);
        true
    }

    /// Opens a new subscription.
    ///
    /// While running, the current state is its first item. After
    /// termination it is born closed with the terminal signal.
    pub(crate) fn subscribe(&self) -> Subscription<S> {
        let cursor = Arc::new(Cursor::new(self.backlog_warn));
        let mut hub = self.hub.lock();

        match &hub.closure {
            Some(closure) => cursor.close(closure.clone()),
            None => {
                if let Some(current) = &hub.current {
                    cursor.push(current.clone());
                }
                hub.cursors.push(Arc::downgrade(&cursor));
            }
        }

        Subscription { cursor }
    }

    /// Closes every existing and future subscription with `closure`.
    ///
    /// Returns false if the broadcaster was already closed.
    pub(crate) fn close(&self, closure: Closure) -> bool {
        let cursors = {
            let mut hub = self.hub.lock();
            if hub.closure.is_some() {
                return false;
            }
            hub.closure = Some(closure.clone());
            std::mem::take(&mut hub.cursors)
        };

        for cursor in cursors.iter().filter_map(Weak::upgrade) {
            cursor.close(closure.clone());
        }
        true
    }

    /// Returns the most recently published state.
    pub(crate) fn current(&self) -> Option<S> {
        self.hub.lock().current.clone()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.hub.lock().closure.is_some()
    }

    /// Returns the number of live subscriptions.
    pub(crate) fn subscription_count(&self) -> usize {
        self.hub
            .lock()
            .cursors
            .iter()
            .filter(|cursor| cursor.strong_count() > 0)
            .count()
    }
}

/// One subscriber's independent view of a workflow's states.
///
/// Dropping a subscription (or calling [`Subscription::close`]) detaches it
/// without affecting anyone else.
pub struct Subscription<S> {
    cursor: Arc<Cursor<S>>,
}

impl<S: Clone> Subscription<S> {
    /// Returns the subscription ID.
    pub fn id(&self) -> &str {
        &self.cursor.id
    }

    /// Takes the next unseen state without waiting.
    ///
    /// Returns `Ok(None)` if nothing is buffered or the stream completed
    /// normally, and the terminal error after cancellation or failure.
    pub fn try_recv(&mut self) -> Result<Option<S>, WorkflowError> {
        let mut state = self.cursor.state.lock();
        if let Some(value) = state.queue.pop_front() {
            return Ok(Some(value));
        }
        match &state.closure {
            Some(closure) => closure.read_result(),
            None => Ok(None),
        }
    }

    /// Waits for the next state; `Ok(None)` means the stream completed.
    pub async fn recv_or_closed(&mut self) -> Result<Option<S>, WorkflowError> {
        loop {
            {
                let mut state = self.cursor.state.lock();
                if let Some(value) = state.queue.pop_front() {
                    return Ok(Some(value));
                }
                if let Some(closure) = &state.closure {
                    return closure.read_result();
                }
            }
            self.cursor.notify.notified().await;
        }
    }

    /// Waits for the next state. Normal completion is reported as
    /// [`WorkflowError::Closed`].
    pub async fn recv(&mut self) -> Result<S, WorkflowError> {
        self.recv_or_closed().await?.ok_or(WorkflowError::Closed)
    }

    /// Detaches this subscription and drops anything unread.
    pub fn close(&mut self) {
        {
            let mut state = self.cursor.state.lock();
            state.queue.clear();
        }
        self.cursor.close(Closure::Completed);
    }

    /// Returns true once the stream is closed and fully drained.
    pub fn is_closed(&self) -> bool {
        let state = self.cursor.state.lock();
        state.closure.is_some() && state.queue.is_empty()
    }

    /// Number of states received but not yet read.
    pub fn pending(&self) -> usize {
        self.cursor.state.lock().queue.len()
    }
}

impl<S: Clone + Send + 'static> Subscription<S> {
    /// Adapts the subscription into a stream of states.
    ///
    /// The stream ends after normal completion; cancellation or failure is
    /// yielded once as the final item.
    pub fn into_stream(self) -> impl Stream<Item = Result<S, WorkflowError>> + Send + 'static {
        stream::unfold(Some(self), |subscription| async move {
            let mut subscription = subscription?;
            match subscription.recv_or_closed().await {
                Ok(Some(value)) => Some((Ok(value), Some(subscription))),
                Ok(None) => None,
                Err(err) => Some((Err(err), None)),
            }
        })
    }
}

impl<S> std::fmt::Debug for Subscription<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.cursor.id)
            .finish()
    }
}
