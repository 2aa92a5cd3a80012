//! Turns a turn's raw events into stable operation records.
//!
//! Backends report tool use as separate call and response events, and
//! long-running jobs as a chain of poll responses that share a `job_id` but
//! may carry different call ids. The [`EventCorrelator`] folds all of these
//! into one [`OperationRecord`] per logical operation and passes plain text
//! through as [`TextFragment`]s.
//!
//! Only narrating authors contribute text. When an author streams partial
//! text, the final event that repeats it is not narrated a second time.
//!
//! A correlator lives for exactly one turn. Create a fresh one per turn.

pub mod render;

use crate::events::{Event, FunctionCall, FunctionResponse, Part};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Record key used for the briefing refinement step.
pub const REFINEMENT_KEY: &str = "__briefing_refinement__";

const REFINEMENT_TITLE: &str = "👩🏻‍🏫 Refining and expanding inquiry";
const REFINEMENT_BODY: &str = "_Refining and expanding your inquiry..._";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CorrelatorConfig {
    /// Author whose events are shown as a single refinement record
    pub refinement_author: String,
    /// Authors whose text reaches the reply. Empty means every author.
    pub narrating_authors: Vec<String>,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            refinement_author: "briefing_refinement_agent".to_string(),
            narrating_authors: vec!["assistant".to_string()],
        }
    }
}

impl CorrelatorConfig {
    #[must_use]
    pub fn with_refinement_author(mut self, author: impl Into<String>) -> Self {
        self.refinement_author = author.into();
        self
    }

    #[must_use]
    pub fn with_narrating_authors<I, S>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.narrating_authors = authors.into_iter().map(Into::into).collect();
        self
    }

    fn narrates(&self, author: &str) -> bool {
        self.narrating_authors.is_empty() || self.narrating_authors.iter().any(|a| a == author)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Done,
}

/// One logical operation, updated in place as events arrive.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub key: String,
    pub title: String,
    /// Latest rendered body; replaced, never appended to
    pub body: String,
    pub status: OperationStatus,
    pub first_seen_order: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FragmentKind {
    /// Plain assistant text
    Narration,
    /// Visual payload produced by a tool
    Artifact,
}

/// Text to append to the turn's reply.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextFragment {
    pub text: String,
    pub kind: FragmentKind,
}

/// Per-turn correlation state.
#[derive(Debug, Default)]
pub struct EventCorrelator {
    config: CorrelatorConfig,
    records: Vec<OperationRecord>,
    index: HashMap<String, usize>,
    job_roots: HashMap<String, String>,
    pending_ticks: HashMap<String, u32>,
    /// Authors with partial text not yet closed by a final event
    streaming: HashSet<String>,
    suppress_text: bool,
}

impl EventCorrelator {
    #[must_use]
    pub fn new(config: CorrelatorConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Fold one event into the records.
    ///
    /// Parts are handled in order. Returns the concatenated text the event
    /// contributes to the reply, if any.
    pub fn process(&mut self, event: &Event) -> Option<TextFragment> {
        if event.author == self.config.refinement_author {
            self.refinement(event.is_final);
            return None;
        }

        let narrates = self.config.narrates(&event.author) && !self.replays_stream(event);

        let mut text = String::new();
        let mut kind = FragmentKind::Narration;
        for part in &event.content {
            match part {
                Part::FunctionCall(call) => self.call(call),
                Part::FunctionResponse(response) => {
                    if let Some(artifact) = self.response(response) {
                        text.push_str(&artifact);
                        kind = FragmentKind::Artifact;
                    }
                }
                Part::Text { text: chunk } if narrates && !self.suppress_text => {
                    text.push_str(chunk);
                }
                Part::Text { .. } | Part::Unknown { .. } => {}
            }
        }

        (!text.is_empty()).then_some(TextFragment { text, kind })
    }

    /// Records in the order they were first seen.
    #[must_use]
    pub fn ordered_operations(&self) -> &[OperationRecord] {
        &self.records
    }

    #[must_use]
    pub fn operation(&self, key: &str) -> Option<&OperationRecord> {
        self.index.get(key).map(|&i| &self.records[i])
    }

    /// Whether narration is swallowed for the rest of the turn.
    #[must_use]
    pub const fn suppress_text(&self) -> bool {
        self.suppress_text
    }

    /// Number of pending polls observed for `key`.
    #[must_use]
    pub fn pending_ticks(&self, key: &str) -> u32 {
        self.pending_ticks.get(key).copied().unwrap_or(0)
    }

    /// Track partial text per author. A final event after streamed partials
    /// repeats the whole text, so it replays the stream.
    fn replays_stream(&mut self, event: &Event) -> bool {
        if event.is_final {
            self.streaming.remove(&event.author)
        } else {
            if event.has_text() {
                self.streaming.insert(event.author.clone());
            }
            false
        }
    }

    fn refinement(&mut self, is_final: bool) {
        let record = self.upsert(REFINEMENT_KEY, REFINEMENT_TITLE, || {
            REFINEMENT_BODY.to_string()
        });
        record.status = if is_final {
            OperationStatus::Done
        } else {
            OperationStatus::Pending
        };
    }

    fn call(&mut self, call: &FunctionCall) {
        let title = render::tool_title(&call.name);
        let body = render::call_body(&call.name, &call.args);
        let record = self.upsert(call.key(), &title, String::new);
        record.body = body;
        record.status = OperationStatus::Pending;
    }

    fn response(&mut self, response: &FunctionResponse) -> Option<String> {
        let own_key = response.key().to_string();
        let key = match response.job_id() {
            Some(job_id) => self
                .job_roots
                .entry(job_id.to_string())
                .or_insert(own_key)
                .clone(),
            None => own_key,
        };

        let status = match response.status() {
            None | Some("done") => OperationStatus::Done,
            Some(_) => {
                *self.pending_ticks.entry(key.clone()).or_default() += 1;
                OperationStatus::Pending
            }
        };
        let ticks = self.pending_ticks.get(&key).copied();
        let rendered = render::response_body(
            &response.name,
            &response.response,
            response.structured_content.as_ref(),
            ticks,
        );

        let title = render::tool_title(&response.name);
        let record = self.upsert(&key, &title, String::new);
        record.status = status;
        record.body = rendered.body;

        if rendered.artifact.is_some() {
            self.suppress_text = true;
        }
        rendered.artifact
    }

    /// Fetch the record for `key`, creating it on first sight. The title is
    /// refreshed either way.
    fn upsert(
        &mut self,
        key: &str,
        title: &str,
        initial_body: impl FnOnce() -> String,
    ) -> &mut OperationRecord {
        let position = match self.index.get(key) {
            Some(&position) => position,
            None => {
                let position = self.records.len();
                self.records.push(OperationRecord {
                    key: key.to_string(),
                    title: title.to_string(),
                    body: initial_body(),
                    status: OperationStatus::Pending,
                    first_seen_order: position,
                });
                self.index.insert(key.to_string(), position);
                position
            }
        };
        let record = &mut self.records[position];
        record.title = title.to_string();
        record
    }
}
