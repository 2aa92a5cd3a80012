//! The context a step tree runs in for one turn.
//!
//! [`InvocationContext`] owns the session for the duration of the turn.
//! Events emitted by steps are applied immediately: the state delta is
//! written, the event is appended to the log, hooks are notified and the event
//! is forwarded to the consumer. The next event is only produced afterwards,
//! so every step observes a fully up-to-date session.

use crate::events::{Event, EventEnvelope, SequenceCounter};
use crate::hooks::{DefaultHooks, RelayHooks};
use crate::session::{Session, SessionState};
use crate::step::Step;
use anyhow::Result;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Where applied events go after they hit the session.
#[derive(Clone)]
pub struct EventSink {
    tx: Option<mpsc::Sender<EventEnvelope>>,
    seq: SequenceCounter,
    hooks: Arc<dyn RelayHooks>,
}

impl EventSink {
    #[must_use]
    pub fn new(tx: mpsc::Sender<EventEnvelope>, hooks: Arc<dyn RelayHooks>) -> Self {
        Self {
            tx: Some(tx),
            seq: SequenceCounter::new(),
            hooks,
        }
    }

    /// A sink that only notifies hooks.
    #[must_use]
    pub fn detached(hooks: Arc<dyn RelayHooks>) -> Self {
        Self {
            tx: None,
            seq: SequenceCounter::new(),
            hooks,
        }
    }

    #[must_use]
    pub fn hooks(&self) -> &Arc<dyn RelayHooks> {
        &self.hooks
    }

    /// Notify hooks and forward the event to the consumer.
    ///
    /// Sending never blocks the run indefinitely:
    /// 1. a non-blocking `try_send` is attempted first
    /// 2. if the channel is full, waits up to 30 seconds for space
    /// 3. a closed channel means the consumer went away; the run continues
    pub async fn send(&self, event: &Event) {
        self.hooks.on_event(event).await;

        let Some(tx) = &self.tx else {
            return;
        };
        let envelope = EventEnvelope::wrap(event.clone(), &self.seq);

        match tx.try_send(envelope) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(envelope)) => {
                log::debug!("Event channel full, waiting for consumer...");
                match tokio::time::timeout(SEND_TIMEOUT, tx.send(envelope)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => {
                        log::warn!("Event channel closed while sending - consumer disconnected");
                    }
                    Err(_) => {
                        log::error!("Timeout waiting to send event - consumer may be deadlocked");
                    }
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                log::debug!("Event channel closed - consumer disconnected");
            }
        }
    }
}

/// A step currently running with a declared output key.
struct OutputScope {
    author: String,
    key: String,
}

/// Per-turn execution context handed to every [`Step`].
pub struct InvocationContext {
    pub invocation_id: String,
    pub session: Session,
    /// Text of the latest user message, if the turn carries one
    pub user_content: Option<String>,
    sink: EventSink,
    scopes: Vec<OutputScope>,
}

impl InvocationContext {
    /// Create a context whose events only reach the session and the default
    /// hooks.
    #[must_use]
    pub fn new(session: Session, user_content: Option<String>) -> Self {
        Self::with_sink(
            session,
            user_content,
            EventSink::detached(Arc::new(DefaultHooks)),
        )
    }

    #[must_use]
    pub fn with_sink(session: Session, user_content: Option<String>, sink: EventSink) -> Self {
        Self {
            invocation_id: format!("e-{}", uuid::Uuid::new_v4()),
            session,
            user_content,
            sink,
            scopes: Vec::new(),
        }
    }

    #[must_use]
    pub const fn state(&self) -> &SessionState {
        &self.session.state
    }

    /// End the invocation, closing the event sink.
    #[must_use]
    pub fn into_session(self) -> Session {
        self.session
    }

    /// Write a state key directly, outside of any event.
    pub fn stage(&mut self, key: impl Into<String>, value: Value) {
        self.session.state.insert(key, value);
    }

    /// Number of events in the session log; use as a mark for
    /// [`Self::escalated_since`].
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.session.events.len()
    }

    /// Whether any event appended after `mark` asked to escalate.
    #[must_use]
    pub fn escalated_since(&self, mark: usize) -> bool {
        self.session
            .events
            .get(mark..)
            .is_some_and(|events| events.iter().any(Event::is_escalation))
    }

    /// Apply an event to the session and forward it.
    ///
    /// If the emitting step declared an output key and the event is its final
    /// text, the text is written under that key through the event's state
    /// delta.
    pub async fn emit(&mut self, mut event: Event) {
        if event.invocation_id.is_empty() {
            event.invocation_id.clone_from(&self.invocation_id);
        }

        if let Some(scope) = self.scopes.iter().rev().find(|s| s.author == event.author) {
            if event.is_final && event.has_text() {
                event
                    .actions
                    .state_delta
                    .insert(scope.key.clone(), Value::String(event.text_content()));
            }
        }

        self.session.append_event(event.clone());
        self.sink.send(&event).await;
    }

    /// Run a child step with lifecycle hooks and output-key scoping.
    ///
    /// # Errors
    /// Returns whatever error the step returns.
    pub async fn run_step(&mut self, step: &dyn Step) -> Result<()> {
        let hooks = Arc::clone(self.sink.hooks());
        hooks.before_step(step.name(), &self.session).await;

        let scoped = step.output_key().map(|key| OutputScope {
            author: step.name().to_string(),
            key: key.to_string(),
        });
        let has_scope = scoped.is_some();
        if let Some(scope) = scoped {
            self.scopes.push(scope);
        }

        let result = step.run(self).await;

        if has_scope {
            self.scopes.pop();
        }
        if let Err(error) = &result {
            hooks.on_error(error).await;
        }
        hooks.after_step(step.name(), &self.session).await;
        result
    }
}
