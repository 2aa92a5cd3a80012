//! Adapter from backend JSON events to the normalized [`Event`] model.
//!
//! Backends disagree on key casing (`functionCall` vs `function_call`,
//! `structuredContent` vs `structured_content`) and sometimes stream parts the
//! relay does not understand. Everything is resolved here: unknown parts
//! become [`Part::Unknown`] instead of failing the whole event.

use super::{Event, EventActions, FunctionCall, FunctionResponse, Part};
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Map, Value};

/// Raw event as sent by the API server, either casing accepted.
#[derive(Debug, Default, Deserialize)]
pub struct WireEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, alias = "invocationId")]
    pub invocation_id: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub partial: Option<bool>,
    #[serde(default, alias = "finishReason")]
    pub finish_reason: Option<String>,
    #[serde(default, alias = "turnComplete")]
    pub turn_complete: Option<bool>,
    #[serde(default)]
    pub content: Option<WireContent>,
    #[serde(default)]
    pub actions: Option<WireActions>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WireContent {
    /// Parts stay untyped until classified one by one
    #[serde(default)]
    pub parts: Option<Vec<Value>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WireActions {
    #[serde(default)]
    pub escalate: Option<bool>,
    #[serde(default, alias = "stateDelta")]
    pub state_delta: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct WireFunctionCall {
    #[serde(default)]
    id: Option<String>,
    #[serde(default = "default_tool_name")]
    name: String,
    #[serde(default)]
    args: Option<Value>,
    #[serde(default, alias = "thoughtSignature")]
    thought_signature: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireFunctionResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default = "default_tool_name")]
    name: String,
    #[serde(default)]
    response: Option<Value>,
}

fn default_tool_name() -> String {
    "tool".to_string()
}

impl From<WireEvent> for Event {
    fn from(wire: WireEvent) -> Self {
        let is_final =
            wire.finish_reason.as_deref() == Some("STOP") || wire.partial != Some(true);

        let content = wire
            .content
            .and_then(|c| c.parts)
            .unwrap_or_default()
            .into_iter()
            .map(classify_part)
            .collect();

        let actions = wire.actions.map_or_else(EventActions::default, |a| EventActions {
            escalate: a.escalate.unwrap_or(false),
            state_delta: a.state_delta.unwrap_or_default(),
        });

        Self {
            id: wire
                .id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            invocation_id: wire.invocation_id.unwrap_or_default(),
            author: wire.author.unwrap_or_else(|| "unknown".to_string()),
            is_final,
            turn_complete: wire.turn_complete.unwrap_or(false),
            content,
            actions,
        }
    }
}

/// Parse one JSON event.
///
/// # Errors
/// Returns an error if the value is not an event object.
pub fn parse_event(value: Value) -> Result<Event> {
    let wire: WireEvent = serde_json::from_value(value).context("invalid event payload")?;
    Ok(wire.into())
}

/// Parse one server-sent-events line (`data: {...}`).
///
/// Comments, blank lines and undecodable payloads yield `None`.
#[must_use]
pub fn parse_sse_line(line: &str) -> Option<Event> {
    let data = line.trim().strip_prefix("data:")?.trim();
    if data.is_empty() {
        return None;
    }
    let value = serde_json::from_str::<Value>(data).ok()?;
    parse_event(value).ok()
}

/// Whether an event is worth handing to the correlator.
///
/// Control-only events (escalations, bare state deltas) carry no parts and
/// are dropped; the refinement author is always kept so its progress shows.
#[must_use]
pub fn is_displayable(event: &Event, refinement_author: &str) -> bool {
    event.author == refinement_author
        || event
            .content
            .iter()
            .any(|part| !matches!(part, Part::Unknown { .. }))
}

/// Extract the nested `structuredContent` object of a tool response.
#[must_use]
pub fn structured_content(response: &Value) -> Option<Map<String, Value>> {
    let object = response.as_object()?;
    object
        .get("structuredContent")
        .or_else(|| object.get("structured_content"))
        .and_then(Value::as_object)
        .cloned()
}

fn classify_part(raw: Value) -> Part {
    let Some(object) = raw.as_object() else {
        return Part::Unknown { raw };
    };

    if let Some(call) = field(object, "function_call", "functionCall") {
        let part_signature = field(object, "thought_signature", "thoughtSignature")
            .and_then(Value::as_str)
            .map(str::to_string);
        return match serde_json::from_value::<WireFunctionCall>(call.clone()) {
            Ok(call) => Part::FunctionCall(FunctionCall {
                id: call.id,
                name: call.name,
                args: call.args.unwrap_or_else(|| Value::Object(Map::new())),
                // Either location satisfies the backend; keep whichever is set.
                thought_signature: call.thought_signature.or(part_signature),
            }),
            Err(_) => Part::Unknown { raw },
        };
    }

    if let Some(response) = field(object, "function_response", "functionResponse") {
        return match serde_json::from_value::<WireFunctionResponse>(response.clone()) {
            Ok(response) => Part::FunctionResponse(FunctionResponse::new(
                response.id,
                response.name,
                response.response.unwrap_or(Value::Null),
            )),
            Err(_) => Part::Unknown { raw },
        };
    }

    match object.get("text").and_then(Value::as_str) {
        Some(text) => Part::text(text),
        None => Part::Unknown { raw },
    }
}

fn field<'a>(object: &'a Map<String, Value>, snake: &str, camel: &str) -> Option<&'a Value> {
    object
        .get(snake)
        .or_else(|| object.get(camel))
        .filter(|value| !value.is_null())
}
