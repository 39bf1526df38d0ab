//! Workflow handles.

use crate::broadcast::Subscription;
use crate::cell::Settlement;
use crate::config::WorkflowConfig;
use crate::engine::{self, Reactor, Shared};
use crate::error::{ReactorError, ReactorFailure, WorkflowError};
use crate::pool::WorkflowPool;
use crate::reaction::Phase;
use crate::uncaught::{UncaughtError, UncaughtErrorHandler};
use futures::task::noop_waker_ref;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::task::Context;
use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

/// Handle to a running (or terminated) workflow.
///
/// Cheap to clone; every clone controls the same workflow.
pub struct Workflow<S, E, R> {
    shared: Arc<Shared<S, E, R>>,
}

impl<S, E, R> Clone for Workflow<S, E, R> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<S, E, R> Workflow<S, E, R>
where
    S: Clone + Send + Sync + 'static,
    E: Send + 'static,
    R: Clone + Send + Sync + 'static,
{
    /// Returns the workflow ID.
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    /// Returns the configured workflow name.
    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    /// Returns the lifecycle phase.
    ///
    /// `Cancelled` is reported as soon as `cancel` returns, possibly before
    /// the result has settled.
    pub fn phase(&self) -> Phase {
        self.shared.phase()
    }

    /// Returns the nested-workflow pool handed to every invocation.
    pub fn pool(&self) -> &WorkflowPool {
        &self.shared.pool
    }

    /// Enqueues an event for the reactor. Never blocks.
    ///
    /// Events sent after the workflow terminated are dropped.
    pub fn send_event(&self, event: E) {
        if !self.shared.events.send(event) {
            tracing::trace!(workflow_id = %self.shared.id, "dropped event for terminated workflow");
        }
    }

    /// Abandons the workflow. Idempotent; a no-op once it has terminated.
    pub fn cancel(&self) {
        if self.shared.cancel() {
            let _enter = self.shared.span.enter();
            tracing::debug!("cancellation requested");
        }
    }

    /// Opens an independent view of the workflow's states.
    pub fn subscribe(&self) -> Subscription<S> {
        self.shared.states.subscribe()
    }

    /// Returns the most recently published state.
    pub fn current_state(&self) -> Option<S> {
        self.shared.states.current()
    }

    /// Returns the number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.shared.states.subscription_count()
    }

    /// Waits for the workflow's terminal outcome.
    pub async fn await_result(&self) -> Result<R, WorkflowError> {
        self.shared.result.wait().await.into_result()
    }

    /// Returns the outcome if the workflow has already settled.
    pub fn try_result(&self) -> Option<Result<R, WorkflowError>> {
        self.shared.result.peek().map(|s| s.into_result())
    }

    pub fn is_settled(&self) -> bool {
        self.shared.result.is_settled()
    }

    pub fn is_failed(&self) -> bool {
        self.shared.result.is_failed()
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.result.is_cancelled()
    }

    /// Spawns a fire-and-forget observer of the state stream.
    ///
    /// `observer` sees every state from the current one on. If it returns an
    /// error or panics, it stops and the error goes to the workflow's
    /// [`UncaughtErrorHandler`] exactly once. The workflow and other observers
    /// are unaffected. The observer ends quietly when the stream closes.
    pub fn observe<F>(&self, mut observer: F) -> JoinHandle<()>
    where
        F: FnMut(S) -> Result<(), ReactorError> + Send + 'static,
    {
        self.observe_async(move |state| futures::future::ready(observer(state)))
    }

    /// Like [`observe`](Self::observe), but the observer may await.
    ///
    /// Each state's future runs to completion before the next state is read.
    pub fn observe_async<F, Fut>(&self, mut observer: F) -> JoinHandle<()>
    where
        F: FnMut(S) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), ReactorError>> + Send + 'static,
    {
        let mut subscription = self.subscribe();
        let handler = self.shared.uncaught.clone();
        let workflow_id = self.shared.id;
        let span = tracing::debug_span!(
            parent: &self.shared.span,
            "observer",
            subscription_id = %subscription.id()
        );

        tokio::spawn(
            async move {
                while let Ok(Some(state)) = subscription.recv_or_closed().await {
                    let outcome = AssertUnwindSafe(async { observer(state).await })
                        .catch_unwind()
                        .await;
                    let failure = match outcome {
                        Ok(Ok(())) => continue,
                        Ok(Err(err)) => ReactorFailure::from_error(err),
                        Err(payload) => ReactorFailure::from_panic(payload),
                    };
                    handler.report(UncaughtError {
                        workflow_id,
                        failure,
                    });
                    return;
                }
            }
            .instrument(span),
        )
    }

    /// Returns the settled outcome without converting it into a `Result`.
    pub fn settlement(&self) -> Option<Settlement<R>> {
        self.shared.result.peek()
    }
}

impl<S, E, R> std::fmt::Debug for Workflow<S, E, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("id", &self.shared.id)
            .field("name", &self.shared.config.name)
            .finish()
    }
}

/// Configures and starts a workflow.
pub struct WorkflowBuilder<Re: Reactor> {
    reactor: Re,
    config: WorkflowConfig,
    pool: Option<WorkflowPool>,
    uncaught: Option<UncaughtErrorHandler>,
}

impl<Re: Reactor> WorkflowBuilder<Re> {
    pub fn new(reactor: Re) -> Self {
        Self {
            reactor,
            config: WorkflowConfig::default(),
            pool: None,
            uncaught: None,
        }
    }

    pub fn config(mut self, config: WorkflowConfig) -> Self {
        self.config = config;
        self
    }

    /// Uses an existing pool instead of creating one for this workflow.
    pub fn pool(mut self, pool: WorkflowPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Routes observer errors to `handler` instead of the last-resort sink.
    pub fn uncaught_error_handler(mut self, handler: UncaughtErrorHandler) -> Self {
        self.uncaught = Some(handler);
        self
    }

    /// Publishes `initial_state` and starts driving the reactor.
    ///
    /// The run loop is polled in place until its first suspension, so a
    /// reactor that finishes or fails without waiting has already terminated
    /// when the handle is returned. Whatever remains runs on a spawned task.
    /// A reactor that never suspends blocks the caller until it terminates.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self, initial_state: Re::State) -> Workflow<Re::State, Re::Event, Re::Output> {
        let shared = Arc::new(Shared::new(
            self.config,
            self.pool.unwrap_or_default(),
            self.uncaught.unwrap_or_default(),
        ));
        shared.states.publish(initial_state.clone());

        let span = shared.span.clone();
        span.in_scope(|| tracing::debug!(pool_id = %shared.pool.id(), "workflow started"));

        let mut driver =
            Box::pin(engine::run_loop(shared.clone(), self.reactor, initial_state).instrument(span));
        // The spawned task polls again with its own waker before it parks.
        let mut cx = Context::from_waker(noop_waker_ref());
        if driver.as_mut().poll(&mut cx).is_pending() {
            tokio::spawn(driver);
        }

        Workflow { shared }
    }
}

/// Starts `reactor` from `initial_state` with default settings.
pub fn start_workflow<Re: Reactor>(
    reactor: Re,
    initial_state: Re::State,
) -> Workflow<Re::State, Re::Event, Re::Output> {
    WorkflowBuilder::new(reactor).start(initial_state)
}
