//! Consumer-side driver for one conversation.
//!
//! [`ChatClient`] keeps the session id between turns, streams each turn's
//! events through a fresh [`EventCorrelator`] and reports a [`TurnView`] after
//! every event so a front end can redraw incrementally.

use crate::correlator::{CorrelatorConfig, EventCorrelator, OperationRecord};
use crate::source::EventSource;
use crate::types::{RelayError, SessionId, UserId};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

/// What the user filled in before the conversation started.
///
/// Stored in the session state under `user_*` keys so steps can ground their
/// prompts on it. Missing fields are stored as empty strings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Briefing {
    pub media_url: String,
    pub context: String,
    pub expectations: String,
    pub prior_knowledge: String,
    pub questions: String,
}

impl Briefing {
    #[must_use]
    pub fn into_state(self) -> Map<String, Value> {
        [
            ("user_media_url", self.media_url),
            ("user_context", self.context),
            ("user_expectations", self.expectations),
            ("user_prior_knowledge", self.prior_knowledge),
            ("user_questions", self.questions),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_string(), Value::String(value)))
        .collect()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatConfig {
    pub user_id: UserId,
    /// State a new session is seeded with
    pub initial_state: Map<String, Value>,
    pub correlator: CorrelatorConfig,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            user_id: UserId::default(),
            initial_state: Briefing::default().into_state(),
            correlator: CorrelatorConfig::default(),
        }
    }
}

impl ChatConfig {
    #[must_use]
    pub fn with_user_id(mut self, user_id: UserId) -> Self {
        self.user_id = user_id;
        self
    }

    #[must_use]
    pub fn with_briefing(mut self, briefing: Briefing) -> Self {
        self.initial_state = briefing.into_state();
        self
    }

    #[must_use]
    pub fn with_initial_state(mut self, initial_state: Map<String, Value>) -> Self {
        self.initial_state = initial_state;
        self
    }
}

/// Snapshot of a turn for rendering.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnView {
    /// Operation records in first-seen order
    pub operations: Vec<OperationRecord>,
    /// Narration and artifacts accumulated so far
    pub reply: String,
}

pub struct ChatClient {
    source: Arc<dyn EventSource>,
    config: ChatConfig,
    session_id: Option<SessionId>,
}

impl ChatClient {
    #[must_use]
    pub fn new(source: Arc<dyn EventSource>, config: ChatConfig) -> Self {
        Self {
            source,
            config,
            session_id: None,
        }
    }

    #[must_use]
    pub const fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    /// Run one turn.
    ///
    /// `on_update` is called after every event with the current view. The
    /// returned view is the final state of the turn.
    ///
    /// # Errors
    /// Returns a [`RelayError`] if the session cannot be ensured or the event
    /// stream fails. The session id is kept for the next turn.
    pub async fn send<F>(&mut self, message: &str, mut on_update: F) -> Result<TurnView, RelayError>
    where
        F: FnMut(&TurnView) + Send,
    {
        let user_id = self.config.user_id.clone();
        let session_id = self
            .source
            .ensure_session(&user_id, self.session_id.as_ref(), &self.config.initial_state)
            .await
            .map_err(|e| RelayError::backend(&e))?;
        self.session_id = Some(session_id.clone());

        let mut stream = self
            .source
            .stream_events(&user_id, &session_id, message)
            .await
            .map_err(|e| RelayError::backend(&e))?;

        let mut correlator = EventCorrelator::new(self.config.correlator.clone());
        let mut view = TurnView::default();

        while let Some(item) = stream.next().await {
            let event = item.map_err(|e| {
                log::warn!("Turn failed for session {session_id}: {e:#}");
                RelayError::backend(&e)
            })?;

            if let Some(fragment) = correlator.process(&event) {
                view.reply.push_str(&fragment.text);
            }
            view.operations = correlator.ordered_operations().to_vec();
            on_update(&view);
        }

        Ok(view)
    }

    /// Forget the session, deleting it on the backend if possible.
    pub async fn reset(&mut self) {
        let Some(session_id) = self.session_id.take() else {
            return;
        };
        if let Err(e) = self
            .source
            .delete_session(&self.config.user_id, &session_id)
            .await
        {
            log::warn!("Failed to delete session {session_id}: {e:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlator::OperationStatus;
    use crate::events::Event;
    use crate::test_utils::{MockSource, call_event, job_event, response_event};
    use serde_json::json;

    const AUTHOR: &str = "assistant";

    #[tokio::test]
    async fn test_send_reports_incremental_views() -> Result<(), RelayError> {
        let source = Arc::new(MockSource::new(vec![vec![
            Ok(Event::text("briefing_refinement_agent", "draft").partial()),
            Ok(call_event(AUTHOR, "c1", "get_factual_memory", json!({"query": "venue"}))),
            Ok(response_event(
                AUTHOR,
                "c1",
                "get_factual_memory",
                json!({"result": "<memory>Berlin</memory>"}),
            )),
            Ok(Event::text(AUTHOR, "It was in ")),
            Ok(Event::text(AUTHOR, "Berlin.")),
        ]]));
        let mut client = ChatClient::new(source.clone(), ChatConfig::default());

        let mut updates = Vec::new();
        let view = client
            .send("Where was it?", |view| updates.push(view.clone()))
            .await?;

        assert_eq!(updates.len(), 5);
        assert_eq!(updates[0].operations[0].status, OperationStatus::Pending);
        assert_eq!(view.reply, "It was in Berlin.");
        assert_eq!(view.operations.len(), 2);
        assert_eq!(view.operations[1].body, "**Memory lookup result**\n\nBerlin");
        assert!(client.session_id().is_some());
        assert_eq!(source.sessions_created(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_session_is_reused_and_seeded_once() -> Result<(), RelayError> {
        let source = Arc::new(MockSource::new(vec![
            vec![Ok(Event::text(AUTHOR, "one"))],
            vec![Ok(Event::text(AUTHOR, "two"))],
        ]));
        let briefing = Briefing {
            questions: "Who spoke?".to_string(),
            ..Briefing::default()
        };
        let mut client =
            ChatClient::new(source.clone(), ChatConfig::default().with_briefing(briefing));

        client.send("first", |_| {}).await?;
        let first_id = client.session_id().cloned();
        let view = client.send("second", |_| {}).await?;

        assert_eq!(view.reply, "two");
        assert_eq!(client.session_id().cloned(), first_id);
        assert_eq!(source.sessions_created(), 1);
        let seeded = source.seeded_state.read().unwrap().clone().unwrap();
        assert_eq!(seeded.get("user_questions"), Some(&json!("Who spoke?")));
        assert_eq!(seeded.get("user_context"), Some(&json!("")));
        Ok(())
    }

    #[tokio::test]
    async fn test_stream_error_keeps_session() {
        let source = Arc::new(MockSource::new(vec![vec![
            Ok(job_event(AUTHOR, "c1", "start_media_analysis", Some("j1"), "pending")),
            Err("connection reset".to_string()),
        ]]));
        let mut client = ChatClient::new(source, ChatConfig::default());

        let error = client.send("hi", |_| {}).await.unwrap_err();

        assert!(error.recoverable);
        assert!(error.message.contains("connection reset"));
        assert!(client.session_id().is_some());
    }

    #[tokio::test]
    async fn test_reset_deletes_and_forgets() -> Result<(), RelayError> {
        let source = Arc::new(MockSource::new(vec![vec![Ok(Event::text(AUTHOR, "hi"))]]));
        let mut client = ChatClient::new(source.clone(), ChatConfig::default());

        client.send("hello", |_| {}).await?;
        let id = client.session_id().cloned().unwrap();
        client.reset().await;
        client.reset().await;

        assert!(client.session_id().is_none());
        assert_eq!(*source.deleted.read().unwrap(), vec![id]);
        Ok(())
    }

    #[test]
    fn test_briefing_state_keys() {
        let state = Briefing {
            media_url: "https://example.com/talk".to_string(),
            ..Briefing::default()
        }
        .into_state();

        assert_eq!(state.len(), 5);
        assert_eq!(
            state.get("user_media_url"),
            Some(&json!("https://example.com/talk"))
        );
    }
}
