//! Storage trait for sessions.
//!
//! [`SessionStore`] owns the cross-turn state of the relay: each session's
//! state store and event log. Everything turn-scoped (operation records, job
//! roots) lives in the correlator instead and is never persisted.
//!
//! # Built-in Implementation
//!
//! [`InMemorySessionStore`] is suitable for testing and single-process
//! deployments. For production, implement the trait against your database.

use crate::session::{Session, SessionState};
use crate::types::{SessionId, UserId};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

/// Trait for creating, loading and persisting sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create a session seeded with `initial_state` and return its id.
    ///
    /// # Errors
    /// Returns an error if the session cannot be created.
    async fn create_session(&self, user_id: &UserId, initial_state: SessionState)
    -> Result<SessionId>;

    /// Load a session.
    ///
    /// # Errors
    /// Returns an error if the session cannot be retrieved.
    async fn get(&self, session_id: &SessionId) -> Result<Option<Session>>;

    /// Persist a session, replacing the stored copy.
    ///
    /// # Errors
    /// Returns an error if the session cannot be saved.
    async fn save(&self, session: &Session) -> Result<()>;

    /// Delete a session. A missing session is not an error.
    ///
    /// # Errors
    /// Returns an error if the backend fails.
    async fn delete_session(&self, user_id: &UserId, session_id: &SessionId) -> Result<()>;
}

/// In-memory implementation of [`SessionStore`].
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl InMemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create_session(
        &self,
        user_id: &UserId,
        initial_state: SessionState,
    ) -> Result<SessionId> {
        let session = Session::new(SessionId::new(), user_id.clone(), initial_state);
        let id = session.id.clone();
        self.sessions
            .write()
            .ok()
            .context("lock poisoned")?
            .insert(id.0.clone(), session);
        Ok(id)
    }

    async fn get(&self, session_id: &SessionId) -> Result<Option<Session>> {
        let sessions = self.sessions.read().ok().context("lock poisoned")?;
        Ok(sessions.get(&session_id.0).cloned())
    }

    async fn save(&self, session: &Session) -> Result<()> {
        self.sessions
            .write()
            .ok()
            .context("lock poisoned")?
            .insert(session.id.0.clone(), session.clone());
        Ok(())
    }

    async fn delete_session(&self, user_id: &UserId, session_id: &SessionId) -> Result<()> {
        let mut sessions = self.sessions.write().ok().context("lock poisoned")?;
        // Only the owner may delete; anything else is treated as already gone.
        if sessions
            .get(&session_id.0)
            .is_some_and(|session| &session.user_id == user_id)
        {
            sessions.remove(&session_id.0);
        }
        Ok(())
    }
}
