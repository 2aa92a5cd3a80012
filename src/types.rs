//! Core identifiers and errors shared across the crate.
//!
//! - [`SessionId`]: Identifier of a long-lived conversation
//! - [`UserId`]: Identifier of the user owning a session
//! - [`RelayError`]: Consumer-facing failure of a single turn

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a conversation session
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the user a session belongs to
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new("demo-user")
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error surfaced to the consumer when a turn fails.
///
/// Transport and session failures end the turn; operation records and state
/// writes that were already applied are kept.
#[derive(Debug, Clone)]
pub struct RelayError {
    /// Error message
    pub message: String,
    /// Whether retrying the turn may succeed
    pub recoverable: bool,
}

impl RelayError {
    #[must_use]
    pub fn new(message: impl Into<String>, recoverable: bool) -> Self {
        Self {
            message: message.into(),
            recoverable,
        }
    }

    /// Wrap a backend failure as a turn failure.
    #[must_use]
    pub fn backend(error: &anyhow::Error) -> Self {
        Self::new(
            format!("There was an error contacting the agent backend: {error:#}"),
            true,
        )
    }
}

impl std::fmt::Display for RelayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for RelayError {}
