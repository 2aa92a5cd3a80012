//! The normalized event model consumed and produced by the relay.
//!
//! An [`Event`] is one authored unit of a turn: streamed text, a tool call
//! request or a tool result. Every backend format is converted into this
//! shape by the [`wire`] adapter, so nothing downstream branches on wire
//! casing or optional nesting.
//!
//! # Event Flow
//!
//! A typical turn looks like:
//! 1. a `user` event carrying the message
//! 2. preparation / normalization step events (first turn only for the former)
//! 3. assistant events: `FunctionCall` parts, `FunctionResponse` parts, text
//! 4. an exit-check event with `actions.escalate` set once the reply is final

pub mod wire;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use time::OffsetDateTime;

/// Author name used for events carrying the user's own message.
pub const USER_AUTHOR: &str = "user";

/// One authored unit in a session's event log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique event id
    pub id: String,
    /// Invocation (turn) this event was produced in
    pub invocation_id: String,
    /// Name of the step (or `user`) that produced the event
    pub author: String,
    /// True for the terminating event of the author's logical turn.
    /// Streamed partial output is not final.
    pub is_final: bool,
    /// Backend hint that the whole turn is complete
    #[serde(default)]
    pub turn_complete: bool,
    /// Ordered payload parts
    #[serde(default)]
    pub content: Vec<Part>,
    /// Side effects requested by the event
    #[serde(default)]
    pub actions: EventActions,
}

impl Event {
    /// Create a final, empty event for `author`.
    #[must_use]
    pub fn new(author: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            invocation_id: String::new(),
            author: author.into(),
            is_final: true,
            turn_complete: false,
            content: Vec::new(),
            actions: EventActions::default(),
        }
    }

    /// A final event containing a single text part.
    #[must_use]
    pub fn text(author: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(author).with_part(Part::text(text))
    }

    /// The user-authored event that opens a turn.
    #[must_use]
    pub fn user_message(text: impl Into<String>) -> Self {
        Self::text(USER_AUTHOR, text)
    }

    /// An event whose only purpose is to stop the enclosing loop.
    #[must_use]
    pub fn escalation(author: impl Into<String>) -> Self {
        let mut event = Self::new(author);
        event.actions.escalate = true;
        event
    }

    #[must_use]
    pub fn with_part(mut self, part: Part) -> Self {
        self.content.push(part);
        self
    }

    #[must_use]
    pub fn with_invocation_id(mut self, invocation_id: impl Into<String>) -> Self {
        self.invocation_id = invocation_id.into();
        self
    }

    /// Mark the event as a streamed, non-final chunk.
    #[must_use]
    pub const fn partial(mut self) -> Self {
        self.is_final = false;
        self
    }

    #[must_use]
    pub fn with_state_delta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.actions.state_delta.insert(key.into(), value);
        self
    }

    /// Concatenation of all text parts, in order.
    #[must_use]
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(Part::as_text)
            .collect::<Vec<_>>()
            .concat()
    }

    /// Whether any text part carries non-whitespace text.
    #[must_use]
    pub fn has_text(&self) -> bool {
        self.content
            .iter()
            .filter_map(Part::as_text)
            .any(|text| !text.trim().is_empty())
    }

    pub fn function_calls(&self) -> impl Iterator<Item = &FunctionCall> {
        self.content.iter().filter_map(|part| match part {
            Part::FunctionCall(call) => Some(call),
            _ => None,
        })
    }

    pub fn function_responses(&self) -> impl Iterator<Item = &FunctionResponse> {
        self.content.iter().filter_map(|part| match part {
            Part::FunctionResponse(response) => Some(response),
            _ => None,
        })
    }

    #[must_use]
    pub const fn is_escalation(&self) -> bool {
        self.actions.escalate
    }

    #[must_use]
    pub fn is_from_user(&self) -> bool {
        self.author == USER_AUTHOR
    }
}

/// Side effects attached to an event.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EventActions {
    /// Stop the enclosing loop
    #[serde(default)]
    pub escalate: bool,
    /// State store writes applied when the event is appended to the log
    #[serde(default)]
    pub state_delta: Map<String, Value>,
}

/// Tagged payload of an event. Exactly one shape per part.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text { text: String },
    FunctionCall(FunctionCall),
    FunctionResponse(FunctionResponse),
    /// A wire part that could not be classified. Always skipped.
    Unknown { raw: Value },
}

impl Part {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// A tool invocation request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub args: Value,
    /// Provenance marker some backends require when the call is replayed
    /// in history.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought_signature: Option<String>,
}

impl FunctionCall {
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, args: Value) -> Self {
        Self {
            id: Some(id.into()),
            name: name.into(),
            args,
            thought_signature: None,
        }
    }

    #[must_use]
    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.thought_signature = Some(signature.into());
        self
    }

    /// Call id, falling back to the tool name.
    #[must_use]
    pub fn key(&self) -> &str {
        non_empty(self.id.as_deref()).unwrap_or(&self.name)
    }

    #[must_use]
    pub fn has_signature(&self) -> bool {
        non_empty(self.thought_signature.as_deref()).is_some()
    }
}

/// A tool result, possibly one poll of a long-running job.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub response: Value,
    /// The `structuredContent` object lifted out of `response`, if present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Map<String, Value>>,
}

impl FunctionResponse {
    /// Build a response, lifting `structuredContent` out of the payload.
    #[must_use]
    pub fn new(id: Option<String>, name: impl Into<String>, response: Value) -> Self {
        let structured_content = wire::structured_content(&response);
        Self {
            id,
            name: name.into(),
            response,
            structured_content,
        }
    }

    /// Response id, falling back to the tool name.
    #[must_use]
    pub fn key(&self) -> &str {
        non_empty(self.id.as_deref()).unwrap_or(&self.name)
    }

    #[must_use]
    pub fn job_id(&self) -> Option<&str> {
        self.structured_str("job_id")
    }

    /// Job status; an empty string counts as absent.
    #[must_use]
    pub fn status(&self) -> Option<&str> {
        self.structured_str("status")
    }

    fn structured_str(&self, key: &str) -> Option<&str> {
        non_empty(self.structured_content.as_ref()?.get(key)?.as_str())
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|s| !s.is_empty())
}

/// Monotonically increasing per-run counter for event ordering.
///
/// Each runner invocation creates a fresh counter starting at 0. The counter
/// is `Arc`-wrapped so it can be handed to the spawned run task.
#[derive(Clone, Debug)]
pub struct SequenceCounter(Arc<AtomicU64>);

impl SequenceCounter {
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(AtomicU64::new(0)))
    }

    /// Get the next sequence number, incrementing the counter.
    #[must_use]
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Envelope wrapping every forwarded [`Event`] with delivery metadata.
///
/// The `event` field is flattened in JSON so that `event_id`, `sequence`,
/// `timestamp` and the event's own fields appear at the same level.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique identifier (UUID v4) for this emission.
    pub event_id: uuid::Uuid,
    /// Position within a single run.
    pub sequence: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(flatten)]
    pub event: Event,
}

impl EventEnvelope {
    #[must_use]
    pub fn wrap(event: Event, seq: &SequenceCounter) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4(),
            sequence: seq.next(),
            timestamp: OffsetDateTime::now_utc(),
            event,
        }
    }
}
