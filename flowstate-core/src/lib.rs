//! # flowstate-core
//!
//! Workflow engine for flowstate.
//!
//! This crate provides:
//! - The run loop driving a pluggable [`Reactor`]
//! - State broadcasting to independent subscriptions
//! - Per-workflow event buffering
//! - Exactly-once result settlement
//! - Cooperative cancellation and error routing

pub mod broadcast;
pub mod buffer;
pub mod cell;
pub mod config;
pub mod engine;
pub mod error;
pub mod pool;
pub mod reaction;
pub mod uncaught;
pub mod workflow;

pub use broadcast::Subscription;
pub use buffer::EventSource;
pub use cell::Settlement;
pub use config::{ConfigError, WorkflowConfig};
pub use engine::Reactor;
pub use error::{Cancelled, ReactorError, ReactorFailure, WorkflowError};
pub use pool::WorkflowPool;
pub use reaction::{Phase, Reaction};
pub use uncaught::{UncaughtError, UncaughtErrorHandler};
pub use workflow::{start_workflow, Workflow, WorkflowBuilder};
