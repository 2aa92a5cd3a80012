use crate::events::{Event, FunctionCall, FunctionResponse, Part};
use crate::invocation::InvocationContext;
use crate::session::{Session, SessionState};
use crate::source::{EventSource, EventStream};
use crate::step::Step;
use crate::types::{SessionId, UserId};
use anyhow::{Result, bail};
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

// ===================
// Contexts and events
// ===================

pub fn empty_session() -> Session {
    Session::new(SessionId::new(), UserId::default(), SessionState::new())
}

pub fn context(user_content: Option<&str>) -> InvocationContext {
    InvocationContext::new(empty_session(), user_content.map(str::to_string))
}

pub fn call_event(author: &str, id: &str, name: &str, args: Value) -> Event {
    Event::new(author).with_part(Part::FunctionCall(FunctionCall::new(id, name, args)))
}

pub fn response_event(author: &str, id: &str, name: &str, response: Value) -> Event {
    Event::new(author).with_part(Part::FunctionResponse(FunctionResponse::new(
        Some(id.to_string()),
        name,
        response,
    )))
}

/// A job poll response with `structuredContent` carrying the job fields.
pub fn job_event(author: &str, id: &str, name: &str, job_id: Option<&str>, status: &str) -> Event {
    let mut structured = json!({ "status": status });
    if let Some(job_id) = job_id {
        structured["job_id"] = json!(job_id);
    }
    response_event(author, id, name, json!({ "structuredContent": structured }))
}

// ===================
// Mock steps
// ===================

/// A step that always fails after emitting one text event.
pub struct FailingStep {
    name: String,
}

impl FailingStep {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl Step for FailingStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &mut InvocationContext) -> Result<()> {
        ctx.emit(Event::text(self.name.clone(), "partial work")).await;
        bail!("{} exploded", self.name)
    }
}

// ===================
// Mock event source
// ===================

/// Event source replaying one scripted turn per `stream_events` call.
///
/// A turn scripted as `Err(message)` fails with that message after the
/// preceding events.
pub struct MockSource {
    turns: RwLock<Vec<Vec<Result<Event, String>>>>,
    sessions_created: AtomicUsize,
    pub deleted: RwLock<Vec<SessionId>>,
    pub seeded_state: RwLock<Option<Map<String, Value>>>,
}

impl MockSource {
    pub fn new(turns: Vec<Vec<Result<Event, String>>>) -> Self {
        Self {
            turns: RwLock::new(turns),
            sessions_created: AtomicUsize::new(0),
            deleted: RwLock::new(Vec::new()),
            seeded_state: RwLock::new(None),
        }
    }

    pub fn sessions_created(&self) -> usize {
        self.sessions_created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventSource for MockSource {
    async fn ensure_session(
        &self,
        _user_id: &UserId,
        existing: Option<&SessionId>,
        initial_state: &Map<String, Value>,
    ) -> Result<SessionId> {
        if let Some(id) = existing {
            return Ok(id.clone());
        }
        self.sessions_created.fetch_add(1, Ordering::SeqCst);
        *self.seeded_state.write().unwrap() = Some(initial_state.clone());
        Ok(SessionId::new())
    }

    async fn stream_events(
        &self,
        _user_id: &UserId,
        _session_id: &SessionId,
        _message: &str,
    ) -> Result<EventStream> {
        let mut turns = self.turns.write().unwrap();
        if turns.is_empty() {
            bail!("no scripted turn left");
        }
        let items: Vec<Result<Event>> = turns
            .remove(0)
            .into_iter()
            .map(|item| item.map_err(anyhow::Error::msg))
            .collect();
        Ok(Box::pin(futures::stream::iter(items)))
    }

    async fn delete_session(&self, _user_id: &UserId, session_id: &SessionId) -> Result<()> {
        self.deleted.write().unwrap().push(session_id.clone());
        Ok(())
    }
}
