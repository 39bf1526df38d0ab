//! Routing for errors raised by fire-and-forget state observers.

use crate::error::ReactorFailure;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// An error raised by an observer outside the result-await path.
#[derive(Debug, Clone, Error)]
#[error("observer of workflow {workflow_id} {failure}")]
pub struct UncaughtError {
    pub workflow_id: Uuid,
    pub failure: ReactorFailure,
}

/// Sink for [`UncaughtError`]s.
///
/// Supplied per workflow at start. The default, [`last_resort`], is a plain
/// value rather than process-global state, so tests and embedders can
/// replace it freely.
///
/// [`last_resort`]: UncaughtErrorHandler::last_resort
#[derive(Clone)]
pub struct UncaughtErrorHandler {
    sink: Arc<dyn Fn(UncaughtError) + Send + Sync + 'static>,
}

impl UncaughtErrorHandler {
    pub fn new(sink: impl Fn(UncaughtError) + Send + Sync + 'static) -> Self {
        Self {
            sink: Arc::new(sink),
        }
    }

    /// Reports through `tracing` at error level, the host's top-level sink
    /// for unhandled errors.
    pub fn last_resort() -> Self {
        Self::new(|err| {
            tracing::error!(
                workflow_id = %err.workflow_id,
                kind = err.failure.kind(),
                "uncaught error in workflow observer: {}",
                err.failure
            );
        })
    }

    pub fn report(&self, err: UncaughtError) {
        (self.sink)(err)
    }
}

impl Default for UncaughtErrorHandler {
    fn default() -> Self {
        Self::last_resort()
    }
}

impl fmt::Debug for UncaughtErrorHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UncaughtErrorHandler").finish_non_exhaustive()
    }
}
