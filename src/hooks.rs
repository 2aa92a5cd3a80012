//! Lifecycle hooks for observing a run.
//!
//! Hooks see every step start and finish and every applied event:
//!
//! - [`RelayHooks::before_step`] / [`RelayHooks::after_step`] - Step lifecycle
//! - [`RelayHooks::on_event`] - Event applied to the session
//! - [`RelayHooks::on_error`] - A step failed
//!
//! # Built-in Implementations
//!
//! - [`DefaultHooks`] - No-op
//! - [`LoggingHooks`] - Structured `tracing` output for every callback

use crate::events::Event;
use crate::session::Session;
use async_trait::async_trait;

/// Lifecycle hooks for the runner.
#[async_trait]
pub trait RelayHooks: Send + Sync {
    /// Called before a step runs.
    async fn before_step(&self, _step: &str, _session: &Session) {}

    /// Called after a step returns, successfully or not.
    async fn after_step(&self, _step: &str, _session: &Session) {}

    /// Called after an event was appended to the session.
    async fn on_event(&self, _event: &Event) {}

    /// Called when a step fails.
    async fn on_error(&self, _error: &anyhow::Error) {}
}

/// Hooks that do nothing
pub struct DefaultHooks;

#[async_trait]
impl RelayHooks for DefaultHooks {}

/// Hooks that log steps and events with the session id and state
pub struct LoggingHooks;

#[async_trait]
impl RelayHooks for LoggingHooks {
    async fn before_step(&self, step: &str, session: &Session) {
        tracing::info!(
            step,
            session = %session.id,
            state = ?session.state.values(),
            "Starting step"
        );
    }

    async fn after_step(&self, step: &str, session: &Session) {
        tracing::info!(
            step,
            session = %session.id,
            state = ?session.state.values(),
            "Finished step"
        );
    }

    async fn on_event(&self, event: &Event) {
        tracing::debug!(
            author = %event.author,
            is_final = event.is_final,
            parts = event.content.len(),
            escalate = event.actions.escalate,
            "Event applied"
        );
    }

    async fn on_error(&self, error: &anyhow::Error) {
        tracing::error!(?error, "Step failed");
    }
}
