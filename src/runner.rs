//! In-process execution of a step tree.
//!
//! The [`Runner`] binds a root [`Step`] to a [`SessionStore`]. Each turn loads
//! the session, appends the user's message, runs the root step in a spawned
//! task and forwards every applied event over a bounded channel. The session
//! is saved when the run ends, whether it succeeded or not.

use crate::events::{Event, EventEnvelope};
use crate::hooks::{DefaultHooks, RelayHooks};
use crate::invocation::{EventSink, InvocationContext};
use crate::session::SessionState;
use crate::source::{EventSource, EventStream};
use crate::step::Step;
use crate::stores::SessionStore;
use crate::types::{SessionId, UserId};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Capacity of the event channel between the run task and the consumer
    pub channel_capacity: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 100,
        }
    }
}

impl RunnerConfig {
    #[must_use]
    pub const fn with_channel_capacity(mut self, channel_capacity: usize) -> Self {
        self.channel_capacity = channel_capacity;
        self
    }
}

pub struct Runner {
    root: Arc<dyn Step>,
    store: Arc<dyn SessionStore>,
    hooks: Arc<dyn RelayHooks>,
    config: RunnerConfig,
}

impl Runner {
    #[must_use]
    pub fn new(root: Arc<dyn Step>, store: Arc<dyn SessionStore>) -> Self {
        Self {
            root,
            store,
            hooks: Arc::new(DefaultHooks),
            config: RunnerConfig::default(),
        }
    }

    #[must_use]
    pub fn with_hooks(mut self, hooks: Arc<dyn RelayHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    /// Start one turn.
    ///
    /// Returns a receiver yielding every applied event and the handle of the
    /// run task, which resolves to the root step's result.
    ///
    /// # Errors
    /// Returns an error if the session cannot be loaded.
    pub async fn run(
        &self,
        session_id: &SessionId,
        message: &str,
    ) -> Result<(mpsc::Receiver<EventEnvelope>, JoinHandle<Result<()>>)> {
        let mut session = self
            .store
            .get(session_id)
            .await?
            .with_context(|| format!("session {session_id} not found"))?;

        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let sink = EventSink::new(tx, Arc::clone(&self.hooks));

        let user_content = (!message.is_empty()).then(|| message.to_string());
        if let Some(text) = &user_content {
            session.append_event(Event::user_message(text.clone()));
        }

        let root = Arc::clone(&self.root);
        let store = Arc::clone(&self.store);
        let handle = tokio::spawn(async move {
            let mut ctx = InvocationContext::with_sink(session, user_content, sink);
            let result = ctx.run_step(root.as_ref()).await;

            let session = ctx.into_session();
            if let Err(e) = store.save(&session).await {
                log::warn!("Failed to save session {}: {e}", session.id);
                return result.and(Err(e));
            }
            result
        });

        Ok((rx, handle))
    }
}

#[async_trait]
impl EventSource for Runner {
    async fn ensure_session(
        &self,
        user_id: &UserId,
        existing: Option<&SessionId>,
        initial_state: &Map<String, Value>,
    ) -> Result<SessionId> {
        if let Some(id) = existing {
            return Ok(id.clone());
        }
        self.store
            .create_session(user_id, SessionState::from_map(initial_state.clone()))
            .await
    }

    async fn stream_events(
        &self,
        _user_id: &UserId,
        session_id: &SessionId,
        message: &str,
    ) -> Result<EventStream> {
        let (mut rx, handle) = self.run(session_id, message).await?;

        Ok(Box::pin(async_stream::stream! {
            while let Some(envelope) = rx.recv().await {
                yield Ok(envelope.event);
            }
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => yield Err(e),
                Err(e) => yield Err(anyhow!("run task failed: {e}")),
            }
        }))
    }

    async fn delete_session(&self, user_id: &UserId, session_id: &SessionId) -> Result<()> {
        self.store.delete_session(user_id, session_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{ChatClient, ChatConfig};
    use crate::correlator::{CorrelatorConfig, EventCorrelator, OperationStatus};
    use crate::gate::TurnGate;
    use crate::loop_controller::LoopController;
    use crate::step::{ScriptedStep, Sequence};
    use crate::stores::InMemorySessionStore;
    use crate::test_utils::{FailingStep, call_event, job_event};
    use futures::StreamExt;
    use serde_json::json;

    const ASSISTANT: &str = "assistant";

    fn pipeline(assistant_rounds: Vec<Vec<Event>>) -> (Arc<dyn Step>, Arc<ScriptedStep>) {
        let prep = Arc::new(
            ScriptedStep::new("briefing_refinement_agent", vec![vec![Event::text(
                "x",
                "Refined briefing",
            )]])
            .with_output_key("briefing_refined"),
        );
        let normalize = Arc::new(
            ScriptedStep::new("message_fix_agent", vec![
                vec![Event::text("x", "normalized")];
                4
            ])
            .with_output_key("normalized_user_message"),
        );
        let gate: Arc<dyn Step> = Arc::new(TurnGate::new(prep.clone(), normalize));
        let assistant = Arc::new(ScriptedStep::new(ASSISTANT, assistant_rounds));
        let assistant_loop: Arc<dyn Step> = Arc::new(LoopController::new(assistant));
        let root: Arc<dyn Step> = Arc::new(Sequence::new("root", vec![gate, assistant_loop]));
        (root, prep)
    }

    async fn collect(stream: EventStream) -> (Vec<Event>, Vec<String>) {
        let items: Vec<Result<Event>> = stream.collect().await;
        let mut events = Vec::new();
        let mut errors = Vec::new();
        for item in items {
            match item {
                Ok(event) => events.push(event),
                Err(e) => errors.push(e.to_string()),
            }
        }
        (events, errors)
    }

    #[tokio::test]
    async fn test_full_turn_streams_and_persists() -> Result<()> {
        let (root, prep) = pipeline(vec![vec![
            call_event(ASSISTANT, "c1", "start_media_analysis", json!({"reference": "abc"})),
            job_event(ASSISTANT, "c1", "start_media_analysis", Some("j1"), "pending"),
            job_event(ASSISTANT, "c2", "get_media_analysis_result", Some("j1"), "done"),
            Event::text(ASSISTANT, "The talk covers async Rust."),
        ]]);
        let store = Arc::new(InMemorySessionStore::new());
        let runner = Runner::new(root, store.clone());
        let user = UserId::default();

        let mut seed = Map::new();
        seed.insert("user_questions".to_string(), json!("What is covered?"));
        let session_id = runner.ensure_session(&user, None, &seed).await?;

        let stream = runner
            .stream_events(&user, &session_id, "Summarize the talk")
            .await?;
        let (events, errors) = collect(stream).await;

        assert!(errors.is_empty());
        assert_eq!(prep.invocations(), 1);
        assert!(events.last().is_some_and(Event::is_escalation));

        let mut correlator = EventCorrelator::new(CorrelatorConfig::default());
        let reply: String = events
            .iter()
            .filter_map(|event| correlator.process(event))
            .map(|fragment| fragment.text)
            .collect();
        assert_eq!(reply, "The talk covers async Rust.");
        let statuses: Vec<_> = correlator
            .ordered_operations()
            .iter()
            .map(|r| (r.key.as_str(), r.status))
            .collect();
        assert_eq!(statuses, vec![
            ("__briefing_refinement__", OperationStatus::Done),
            ("c1", OperationStatus::Done),
        ]);

        let saved = store.get(&session_id).await?.expect("saved session");
        assert!(saved.events[0].is_from_user());
        assert_eq!(
            saved.state.get("user_questions"),
            Some(&json!("What is covered?"))
        );
        assert_eq!(saved.state.write_count("briefing_refined"), 1);
        assert_eq!(
            saved.state.get("latest_user_message"),
            Some(&json!("Summarize the talk"))
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_chat_reply_excludes_gate_output() -> Result<()> {
        let (root, _) = pipeline(vec![vec![Event::text(ASSISTANT, "Answer.")]]);
        let runner = Runner::new(root, Arc::new(InMemorySessionStore::new()));
        let mut chat = ChatClient::new(Arc::new(runner), ChatConfig::default());

        let view = chat.send("hi", |_| {}).await?;

        assert_eq!(view.reply, "Answer.");
        Ok(())
    }

    #[tokio::test]
    async fn test_prep_runs_once_across_turns() -> Result<()> {
        let rounds = (0..3)
            .map(|i| vec![Event::text(ASSISTANT, format!("answer {i}"))])
            .collect();
        let (root, prep) = pipeline(rounds);
        let store = Arc::new(InMemorySessionStore::new());
        let runner = Runner::new(root, store.clone());
        let user = UserId::default();
        let session_id = runner.ensure_session(&user, None, &Map::new()).await?;

        for turn in 0..3 {
            let stream = runner
                .stream_events(&user, &session_id, &format!("question {turn}"))
                .await?;
            let (_, errors) = collect(stream).await;
            assert!(errors.is_empty());
        }

        let saved = store.get(&session_id).await?.expect("saved session");
        assert_eq!(prep.invocations(), 1);
        assert_eq!(saved.state.write_count("briefing_refined"), 1);
        assert_eq!(saved.state.write_count("latest_user_message"), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_step_failure_ends_stream_with_error() -> Result<()> {
        let store = Arc::new(InMemorySessionStore::new());
        let runner = Runner::new(Arc::new(FailingStep::new("broken")), store.clone());
        let user = UserId::default();
        let session_id = runner.ensure_session(&user, None, &Map::new()).await?;

        let stream = runner.stream_events(&user, &session_id, "hi").await?;
        let (events, errors) = collect(stream).await;

        assert_eq!(events.len(), 1);
        assert_eq!(errors, vec!["broken exploded".to_string()]);

        let saved = store.get(&session_id).await?.expect("saved session");
        assert_eq!(saved.events.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_session_is_an_error() {
        let store = Arc::new(InMemorySessionStore::new());
        let runner = Runner::new(Arc::new(FailingStep::new("unused")), store);

        let result = runner
            .stream_events(&UserId::default(), &SessionId::new(), "hi")
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_envelopes_are_sequenced() -> Result<()> {
        let (root, _) = pipeline(vec![vec![Event::text(ASSISTANT, "done")]]);
        let store = Arc::new(InMemorySessionStore::new());
        let runner = Runner::new(root, store)
            .with_config(RunnerConfig::default().with_channel_capacity(1));
        let session_id = runner
            .ensure_session(&UserId::default(), None, &Map::new())
            .await?;

        let (mut rx, handle) = runner.run(&session_id, "hello").await?;
        let mut sequences = Vec::new();
        while let Some(envelope) = rx.recv().await {
            sequences.push(envelope.sequence);
        }
        handle.await??;

        let expected: Vec<u64> = (0..sequences.len() as u64).collect();
        assert_eq!(sequences, expected);
        assert!(!sequences.is_empty());
        Ok(())
    }
}
