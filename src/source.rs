//! Event sources: where a turn's events come from.
//!
//! An [`EventSource`] creates sessions and streams the events of one turn.
//! Two implementations ship with the crate:
//!
//! - [`crate::Runner`] runs a step tree in-process
//! - [`ApiServerSource`] talks to a remote agent API server over HTTP

pub mod api_server;

pub use api_server::{ApiServerConfig, ApiServerSource};

use crate::events::Event;
use crate::types::{SessionId, UserId};
use anyhow::Result;
use async_trait::async_trait;
use futures::Stream;
use serde_json::{Map, Value};
use std::pin::Pin;

/// Ordered events of one turn. An `Err` item ends the turn.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<Event>> + Send>>;

#[async_trait]
pub trait EventSource: Send + Sync {
    /// Return `existing` if given, otherwise create a session seeded with
    /// `initial_state`.
    ///
    /// # Errors
    /// Returns an error if the session cannot be created.
    async fn ensure_session(
        &self,
        user_id: &UserId,
        existing: Option<&SessionId>,
        initial_state: &Map<String, Value>,
    ) -> Result<SessionId>;

    /// Submit `message` and stream the events of the resulting turn.
    ///
    /// # Errors
    /// Returns an error if the turn cannot be started.
    async fn stream_events(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
        message: &str,
    ) -> Result<EventStream>;

    /// Delete a session if the source supports it.
    ///
    /// # Errors
    /// Returns an error if the backend rejects the deletion.
    async fn delete_session(&self, _user_id: &UserId, _session_id: &SessionId) -> Result<()> {
        Ok(())
    }
}
