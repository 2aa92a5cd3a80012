//! [`EventSource`] backed by an agent API server.
//!
//! Sessions are managed under `/apps/{app}/users/{user}/sessions` and turns
//! are streamed from `/run_sse` as server-sent events, one JSON event per
//! `data:` line.

use super::{EventSource, EventStream};
use crate::events::{Event, wire};
use crate::types::{SessionId, UserId};
use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiServerConfig {
    pub base_url: String,
    pub app_name: String,
    /// Events from this author are kept even without content parts
    pub refinement_author: String,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            app_name: "assistant".to_string(),
            refinement_author: "briefing_refinement_agent".to_string(),
        }
    }
}

impl ApiServerConfig {
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    #[must_use]
    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    fn base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    fn sessions_url(&self, user_id: &UserId) -> String {
        format!(
            "{}/apps/{}/users/{}/sessions",
            self.base(),
            self.app_name,
            user_id
        )
    }
}

pub struct ApiServerSource {
    client: reqwest::Client,
    config: ApiServerConfig,
}

impl ApiServerSource {
    #[must_use]
    pub fn new(config: ApiServerConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    #[must_use]
    pub const fn with_client(client: reqwest::Client, config: ApiServerConfig) -> Self {
        Self { client, config }
    }

    #[must_use]
    pub const fn config(&self) -> &ApiServerConfig {
        &self.config
    }
}

/// Request body for `/run_sse`.
fn run_payload(app_name: &str, user_id: &UserId, session_id: &SessionId, message: &str) -> Value {
    json!({
        "app_name": app_name,
        "user_id": user_id.as_str(),
        "session_id": session_id.as_str(),
        "new_message": {
            "role": "user",
            "parts": [{ "text": message }],
        },
        "streaming": true,
    })
}

/// Byte buffer that yields complete lines.
///
/// Chunks may end inside a multi-byte character, so bytes are only decoded
/// once their line is complete.
#[derive(Debug, Default)]
struct LineBuffer {
    bytes: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
    }

    /// Next complete line without its newline. Lines that are not UTF-8 are
    /// skipped.
    fn next_line(&mut self) -> Option<String> {
        loop {
            let pos = self.bytes.iter().position(|&b| b == b'\n')?;
            let line: Vec<u8> = self.bytes.drain(..=pos).collect();
            match std::str::from_utf8(&line[..pos]) {
                Ok(text) => return Some(text.to_string()),
                Err(e) => log::warn!("Skipping undecodable SSE line: {e}"),
            }
        }
    }

    /// Whatever is left once the stream ends.
    fn finish(self) -> Option<String> {
        if self.bytes.is_empty() {
            return None;
        }
        match String::from_utf8(self.bytes) {
            Ok(line) => Some(line),
            Err(e) => {
                log::warn!("Skipping undecodable trailing SSE line: {e}");
                None
            }
        }
    }
}

fn displayable_event(line: &str, refinement_author: &str) -> Option<Event> {
    wire::parse_sse_line(line).filter(|event| wire::is_displayable(event, refinement_author))
}

/// Read the session id from a create-session response.
fn session_id_from(body: &Value) -> Option<SessionId> {
    ["id", "session_id"]
        .iter()
        .filter_map(|key| body.get(*key).and_then(Value::as_str))
        .find(|id| !id.is_empty())
        .map(SessionId::from_string)
}

#[async_trait]
impl EventSource for ApiServerSource {
    async fn ensure_session(
        &self,
        user_id: &UserId,
        existing: Option<&SessionId>,
        initial_state: &Map<String, Value>,
    ) -> Result<SessionId> {
        if let Some(id) = existing.filter(|id| !id.as_str().is_empty()) {
            return Ok(id.clone());
        }

        let url = self.config.sessions_url(user_id);
        log::debug!("Creating session url={url}");
        let body: Value = self
            .client
            .post(&url)
            .json(&json!({ "state": initial_state }))
            .send()
            .await
            .context("session request failed")?
            .error_for_status()
            .context("session creation rejected")?
            .json()
            .await
            .context("invalid session response")?;

        session_id_from(&body).context("API server did not return a session id")
    }

    async fn stream_events(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
        message: &str,
    ) -> Result<EventStream> {
        let url = format!("{}/run_sse", self.config.base());
        let payload = run_payload(&self.config.app_name, user_id, session_id, message);
        log::debug!("Starting turn url={url} session={session_id}");

        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .context("run request failed")?
            .error_for_status()
            .context("run request rejected")?;

        let refinement_author = self.config.refinement_author.clone();
        Ok(Box::pin(async_stream::stream! {
            let mut stream = response.bytes_stream();
            let mut lines = LineBuffer::default();

            while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        log::error!("Stream error while reading chunk: {e}");
                        yield Err(anyhow!("stream error: {e}"));
                        return;
                    }
                };
                lines.push(&chunk);

                while let Some(line) = lines.next_line() {
                    if let Some(event) = displayable_event(&line, &refinement_author) {
                        yield Ok(event);
                    }
                }
            }

            if let Some(event) = lines
                .finish()
                .and_then(|line| displayable_event(&line, &refinement_author))
            {
                yield Ok(event);
            }
        }))
    }

    async fn delete_session(&self, user_id: &UserId, session_id: &SessionId) -> Result<()> {
        if session_id.as_str().is_empty() {
            return Ok(());
        }

        let url = format!("{}/{}", self.config.sessions_url(user_id), session_id);
        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .context("delete request failed")?;

        match response.status() {
            StatusCode::OK | StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => Ok(()),
            status => bail!("session deletion failed with status {status}"),
        }
    }
}
