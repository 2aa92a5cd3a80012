//! Sessions: a state store plus an append-only event log.

use crate::events::Event;
use crate::types::{SessionId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use time::OffsetDateTime;

/// Key/value state of a session.
///
/// Writes are counted per key so callers can verify one-time steps really ran
/// once.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SessionState {
    values: Map<String, Value>,
    #[serde(default)]
    writes: HashMap<String, usize>,
}

impl SessionState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed state without counting the entries as writes.
    #[must_use]
    pub fn from_map(values: Map<String, Value>) -> Self {
        Self {
            values,
            writes: HashMap::new(),
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        *self.writes.entry(key.clone()).or_default() += 1;
        self.values.insert(key, value);
    }

    /// Number of times `key` was written since the session was created.
    #[must_use]
    pub fn write_count(&self, key: &str) -> usize {
        self.writes.get(key).copied().unwrap_or(0)
    }

    /// Whether `key` holds a value that counts as produced output.
    ///
    /// Strings are trimmed; null, `false`, zero, empty arrays and empty
    /// objects are empty.
    #[must_use]
    pub fn has_non_empty(&self, key: &str) -> bool {
        self.values.get(key).is_some_and(is_non_empty)
    }

    #[must_use]
    pub const fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Whether a state or payload value counts as present.
pub(crate) fn is_non_empty(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// A long-lived conversation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub user_id: UserId,
    pub state: SessionState,
    /// Every event authored in this session, in arrival order
    pub events: Vec<Event>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Session {
    #[must_use]
    pub fn new(id: SessionId, user_id: UserId, state: SessionState) -> Self {
        Self {
            id,
            user_id,
            state,
            events: Vec::new(),
            created_at: OffsetDateTime::now_utc(),
        }
    }

    /// Append an event and apply its state delta.
    pub fn append_event(&mut self, event: Event) {
        for (key, value) in &event.actions.state_delta {
            self.state.insert(key.clone(), value.clone());
        }
        self.events.push(event);
    }

    /// Most recent event written by `author`.
    #[must_use]
    pub fn latest_by(&self, author: &str) -> Option<&Event> {
        self.events.iter().rev().find(|event| event.author == author)
    }

    /// Events written by `author` after the most recent user event.
    pub fn since_last_user<'a>(&'a self, author: &'a str) -> impl Iterator<Item = &'a Event> + 'a {
        self.events
            .iter()
            .rev()
            .take_while(|event| !event.is_from_user())
            .filter(move |event| event.author == author)
    }
}
