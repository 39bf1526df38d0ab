//! Core error types.

use std::any::Any;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Error returned by a reactor invocation.
///
/// Anything implementing `std::error::Error` converts into a `ReactorError`
/// with `?`. The unqualified type name of the original error is captured at
/// conversion time and becomes the failure's kind.
pub struct ReactorError {
    kind: String,
    source: BoxError,
}

impl ReactorError {
    /// Builds an error from plain text with an explicit kind.
    pub fn msg(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            source: Box::new(Message(message.into())),
        }
    }

    /// Returns the kind of the original error.
    pub fn kind(&self) -> &str {
        &self.kind
    }
}

impl<E> From<E> for ReactorError
where
    E: StdError + Send + Sync + 'static,
{
    fn from(err: E) -> Self {
        Self {
            kind: short_type_name::<E>().to_string(),
            source: Box::new(err),
        }
    }
}

impl fmt::Debug for ReactorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactorError")
            .field("kind", &self.kind)
            .field("source", &self.source)
            .finish()
    }
}

impl fmt::Display for ReactorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.source)
    }
}

#[derive(Debug)]
struct Message(String);

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl StdError for Message {}

/// A failed reactor invocation (or observer), as seen by everyone else.
///
/// Renders as `threw <Kind>: <message>`. Cloning is cheap; every awaiter of a
/// failed workflow gets its own copy sharing the same cause.
#[derive(Clone)]
pub struct ReactorFailure {
    kind: Arc<str>,
    message: Arc<str>,
    cause: Option<Arc<dyn StdError + Send + Sync + 'static>>,
}

impl ReactorFailure {
    /// Wraps an error returned by a reactor.
    pub fn from_error(err: ReactorError) -> Self {
        Self {
            kind: err.kind.into(),
            message: err.source.to_string().into(),
            cause: Some(Arc::from(err.source)),
        }
    }

    /// Wraps a panic payload caught while polling a reactor or observer.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "Box<dyn Any>".to_string()
        };
        Self {
            kind: "panic".into(),
            message: message.into(),
            cause: None,
        }
    }

    /// Kind of the original error (its unqualified type name, or `panic`).
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Message of the original error.
    pub fn original_message(&self) -> &str {
        &self.message
    }

    /// The original error, if the failure did not come from a panic.
    pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.cause.as_deref()
    }
}

impl fmt::Debug for ReactorFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactorFailure")
            .field("kind", &self.kind)
            .field("message", &self.message)
            .finish()
    }
}

impl fmt::Display for ReactorFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "threw {}: {}", self.kind, self.message)
    }
}

impl StdError for ReactorFailure {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

/// Signal delivered to a suspended invocation when its workflow is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("workflow cancelled")]
pub struct Cancelled;

/// Errors seen by the outside world: result awaiters and state subscribers.
#[derive(Debug, Clone, Error)]
pub enum WorkflowError {
    /// The state stream completed normally (the workflow finished).
    #[error("state stream closed")]
    Closed,

    #[error(transparent)]
    Failed(#[from] ReactorFailure),

    #[error("workflow cancelled")]
    Cancelled,
}

impl WorkflowError {
    /// Returns true if the workflow was abandoned rather than failed.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, WorkflowError::Cancelled)
    }

    /// Returns the reactor failure, if this is one.
    pub fn reactor_failure(&self) -> Option<&ReactorFailure> {
        match self {
            WorkflowError::Failed(failure) => Some(failure),
            _ => None,
        }
    }

    /// Returns a stable code suitable for matching by callers.
    pub fn error_code(&self) -> &'static str {
        match self {
            WorkflowError::Closed => "CLOSED",
            WorkflowError::Failed(_) => "REACTOR_FAILURE",
            WorkflowError::Cancelled => "CANCELLED",
        }
    }
}

impl From<Cancelled> for WorkflowError {
    fn from(_: Cancelled) -> Self {
        WorkflowError::Cancelled
    }
}

/// Unqualified name of `T`, with module path and generic arguments stripped.
fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("{0}")]
    struct RuntimeError(String);

    #[test]
    fn test_kind_is_short_type_name() {
        let err: ReactorError = RuntimeError("((angery))".to_string()).into();
        assert_eq!(err.kind(), "RuntimeError");

        let failure = ReactorFailure::from_error(err);
        assert_eq!(failure.to_string(), "threw RuntimeError: ((angery))");
        assert_eq!(failure.original_message(), "((angery))");
        assert!(failure.cause().is_some());
    }

    #[test]
    fn test_io_error_kind() {
        let err: ReactorError = std::io::Error::other("disk on fire").into();
        assert_eq!(err.kind(), "Error");
    }

    #[test]
    fn test_msg_and_panic_payloads() {
        let failure = ReactorFailure::from_error(ReactorError::msg("Timeout", "too slow"));
        assert_eq!(failure.to_string(), "threw Timeout: too slow");

        let failure = ReactorFailure::from_panic(Box::new("kaboom"));
        assert_eq!(failure.to_string(), "threw panic: kaboom");
        assert!(failure.cause().is_none());

        let failure = ReactorFailure::from_panic(Box::new(format!("code {}", 7)));
        assert_eq!(failure.original_message(), "code 7");
    }

    #[test]
    fn test_workflow_error_codes() {
        let failure = ReactorFailure::from_error(ReactorError::msg("X", "y"));
        let err = WorkflowError::from(failure);
        assert_eq!(err.error_code(), "REACTOR_FAILURE");
        assert_eq!(err.to_string(), "threw X: y");
        assert!(err.reactor_failure().is_some());

        let err = WorkflowError::from(Cancelled);
        assert!(err.is_cancelled());
        assert_eq!(err.error_code(), "CANCELLED");
        assert_eq!(WorkflowError::Closed.error_code(), "CLOSED");
    }
}
