//! flowstate - reactive state-machine workflows on tokio.
//!
//! A workflow is driven by a [`Reactor`]: the engine hands it the current
//! state, the reactor waits for whatever it needs (events, timers, other
//! workflows) and answers with the next state or a final result. Every state
//! is broadcast to independent [`Subscription`]s and the result settles
//! exactly once.

pub use flowstate_core::*;

use tracing_subscriber::EnvFilter;

/// Installs a `tracing` subscriber that honours `RUST_LOG`, defaulting to
/// `info`.
///
/// Fails if a global subscriber is already installed.
pub fn init_logging() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init()?;
    tracing::debug!("logging initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_only_once() {
        assert!(init_logging().is_ok());
        assert!(init_logging().is_err());
    }
}
