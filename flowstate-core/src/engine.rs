//! Workflow engine - drives a reactor, publishes states, settles the result.

use crate::broadcast::{Closure, StateBroadcaster};
use crate::buffer::{EventBuffer, EventSource};
use crate::cell::{ResultCell, Settlement};
use crate::config::WorkflowConfig;
use crate::error::{ReactorError, ReactorFailure};
use crate::pool::WorkflowPool;
use crate::reaction::{Phase, Reaction};
use crate::uncaught::UncaughtErrorHandler;
use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Business logic of a workflow.
///
/// The engine calls `on_react` with the current state and awaits it to
/// completion before calling it again. An invocation may wait on events,
/// nested workflows or anything else; the [`EventSource`] offers
/// cancellation-aware waits.
#[async_trait]
pub trait Reactor: Send + Sync + 'static {
    type State: Clone + Send + Sync + 'static;
    type Event: Send + 'static;
    type Output: Clone + Send + Sync + 'static;

    async fn on_react(
        &self,
        state: Self::State,
        events: &EventSource<Self::Event>,
        pool: &WorkflowPool,
    ) -> Result<Reaction<Self::State, Self::Output>, ReactorError>;
}

/// Everything one workflow owns, shared between the run loop and handles.
pub(crate) struct Shared<S, E, R> {
    pub(crate) id: Uuid,
    pub(crate) config: WorkflowConfig,
    pub(crate) span: tracing::Span,
    phase: Mutex<Phase>,
    pub(crate) events: Arc<EventBuffer<E>>,
    pub(crate) states: StateBroadcaster<S>,
    pub(crate) result: ResultCell<R>,
    token: CancellationToken,
    pub(crate) pool: WorkflowPool,
    pub(crate) uncaught: UncaughtErrorHandler,
}

impl<S: Clone, E, R: Clone> Shared<S, E, R> {
    pub(crate) fn new(
        config: WorkflowConfig,
        pool: WorkflowPool,
        uncaught: UncaughtErrorHandler,
    ) -> Self {
        let id = Uuid::new_v4();
        let span = tracing::info_span!("workflow", id = %id, name = %config.name);
        Self {
            id,
            span,
            phase: Mutex::new(Phase::Running),
            events: Arc::new(EventBuffer::new(config.event_backlog_warn)),
            states: StateBroadcaster::new(config.subscriber_backlog_warn),
            result: ResultCell::new(),
            token: CancellationToken::new(),
            pool,
            uncaught,
            config,
        }
    }

    pub(crate) fn phase(&self) -> Phase {
        *self.phase.lock()
    }

    /// Publishes the next state unless the workflow already terminated.
    fn advance(&self, next: S) -> bool {
        let phase = self.phase.lock();
        if *phase != Phase::Running {
            return false;
        }
        self.states.publish(next)
    }

    fn finish(&self, result: R) -> bool {
        let mut phase = self.phase.lock();
        if *phase != Phase::Running {
            return false;
        }
        *phase = Phase::Finished;
        self.result.settle(Settlement::Success(result));
        self.states.close(Closure::Completed);
        self.events.close();
        true
    }

    fn fail(&self, failure: ReactorFailure) -> bool {
        let mut phase = self.phase.lock();
        if *phase != Phase::Running {
            return false;
        }
        *phase = Phase::Failed;
        self.result.settle(Settlement::Failure(failure.clone()));
        self.states.close(Closure::Failed(failure));
        self.events.close();
        true
    }

    /// Marks the workflow cancelled and signals the run loop.
    ///
    /// Subscriptions close immediately; the result settles once the run loop
    /// has unwound the active invocation. Returns false if the workflow had
    /// already terminated.
    pub(crate) fn cancel(&self) -> bool {
        {
            let mut phase = self.phase.lock();
            if *phase != Phase::Running {
                return false;
            }
            *phase = Phase::Cancelled;
            self.states.close(Closure::Cancelled);
            self.events.close();
        }
        self.token.cancel();
        true
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Drives `reactor` from `initial` until it finishes, fails or is cancelled.
///
/// The initial state must already be published.
pub(crate) async fn run_loop<Re: Reactor>(
    shared: Arc<Shared<Re::State, Re::Event, Re::Output>>,
    reactor: Re,
    initial: Re::State,
) {
    let source = EventSource::new(shared.events.clone(), shared.token().clone());
    let mut state = initial;
    let mut invocations: u64 = 0;

    loop {
        invocations += 1;
        let invocation =
            AssertUnwindSafe(reactor.on_react(state.clone(), &source, &shared.pool)).catch_unwind();

        // Dropping the invocation here is what unblocks it on cancellation.
        let outcome = tokio::select! {
            biased;
            _ = shared.token().cancelled() => None,
            outcome = invocation => Some(outcome),
        };

        // A cancel that lands while an invocation is returning still wins.
        let outcome = match outcome {
            Some(outcome) if !shared.token().is_cancelled() => outcome,
            _ => return abandon(&shared, &source),
        };

        let reaction = match outcome {
            Ok(Ok(reaction)) => reaction,
            Ok(Err(err)) => return fail(&shared, &source, ReactorFailure::from_error(err)),
            Err(panic) => return fail(&shared, &source, ReactorFailure::from_panic(panic)),
        };
        source.clear_cancel_hooks();

        match reaction {
            Reaction::EnterState(next) => {
                if !shared.advance(next.clone()) {
                    return abandon(&shared, &source);
                }
                if shared.config.log_transitions {
                    tracing::debug!(invocations, "entered new state");
                }
                state = next;
            }
            Reaction::FinishWith(result) => {
                if !shared.finish(result) {
                    return abandon(&shared, &source);
                }
                tracing::debug!(invocations, "workflow finished");
                return;
            }
        }
    }
}

fn fail<S: Clone, E: Send + 'static, R: Clone>(
    shared: &Shared<S, E, R>,
    source: &EventSource<E>,
    failure: ReactorFailure,
) {
    if shared.fail(failure.clone()) {
        tracing::warn!(kind = failure.kind(), "workflow failed: {}", failure);
    } else {
        abandon(shared, source);
    }
}

/// Finishes a cancelled workflow: hooks first, then the result.
fn abandon<S: Clone, E: Send + 'static, R: Clone>(
    shared: &Shared<S, E, R>,
    source: &EventSource<E>,
) {
    source.run_cancel_hooks();
    if shared.result.settle(Settlement::Cancelled) {
        tracing::debug!("workflow cancelled");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Cancelled;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Notify;

    fn shared<S: Clone, E, R: Clone>() -> Arc<Shared<S, E, R>> {
        Arc::new(Shared::new(
            WorkflowConfig::default(),
            WorkflowPool::new(),
            UncaughtErrorHandler::last_resort(),
        ))
    }

    /// Counts down to zero, one state per event.
    struct Countdown;

    #[async_trait]
    impl Reactor for Countdown {
        type State = u32;
        type Event = ();
        type Output = &'static str;

        async fn on_react(
            &self,
            state: u32,
            events: &EventSource<()>,
            _pool: &WorkflowPool,
        ) -> Result<Reaction<u32, &'static str>, ReactorError> {
            if state == 0 {
                return Ok(Reaction::FinishWith("liftoff"));
            }
            events.receive().await?;
            Ok(Reaction::EnterState(state - 1))
        }
    }

    #[tokio::test]
    async fn test_run_loop_publishes_every_state() {
        let shared = shared::<u32, (), &'static str>();
        shared.states.publish(3);
        let mut sub = shared.states.subscribe();
        for _ in 0..3 {
            shared.events.send(());
        }

        run_loop(shared.clone(), Countdown, 3).await;

        let mut seen = Vec::new();
        while let Some(state) = sub.recv_or_closed().await.unwrap() {
            seen.push(state);
        }
        assert_eq!(seen, vec![3, 2, 1, 0]);
        assert_eq!(shared.phase(), Phase::Finished);
        assert!(matches!(shared.result.peek(), Some(Settlement::Success("liftoff"))));
        assert!(shared.events.is_closed());
    }

    #[tokio::test]
    async fn test_cancel_before_run_loop_starts() {
        let shared = shared::<u32, (), &'static str>();
        shared.states.publish(3);
        assert!(shared.cancel());
        assert!(!shared.cancel());
        assert_eq!(shared.phase(), Phase::Cancelled);

        run_loop(shared.clone(), Countdown, 3).await;
        assert!(shared.result.is_cancelled());
        assert!(!shared.finish("too late"));
    }

    struct Parked {
        ready: Arc<Notify>,
        unwound: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Reactor for Parked {
        type State = ();
        type Event = ();
        type Output = ();

        async fn on_react(
            &self,
            _state: (),
            events: &EventSource<()>,
            _pool: &WorkflowPool,
        ) -> Result<Reaction<(), ()>, ReactorError> {
            let unwound = self.unwound.clone();
            events.on_cancel(move || unwound.store(true, Ordering::SeqCst));
            self.ready.notify_one();
            let _: Result<(), Cancelled> = events.race(std::future::pending()).await;
            Ok(Reaction::FinishWith(()))
        }
    }

    #[tokio::test]
    async fn test_cancel_runs_hooks_before_settling() {
        let shared = shared::<(), (), ()>();
        let ready = Arc::new(Notify::new());
        let unwound = Arc::new(AtomicBool::new(false));
        let reactor = Parked {
            ready: ready.clone(),
            unwound: unwound.clone(),
        };

        let handle = tokio::spawn(run_loop(shared.clone(), reactor, ()));
        ready.notified().await;
        assert!(!unwound.load(Ordering::SeqCst));

        shared.cancel();
        let settlement = shared.result.wait().await;
        assert!(settlement.is_cancelled());
        assert!(unwound.load(Ordering::SeqCst));
        handle.await.unwrap();
    }
}
