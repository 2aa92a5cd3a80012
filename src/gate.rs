//! One-time preparation plus per-turn message normalization.
//!
//! The [`TurnGate`] wraps two steps:
//!
//! - the *preparation* step runs only while the session state lacks its
//!   output key, so it runs once per session
//! - the *normalization* step runs on every turn that carries user text,
//!   after the raw text was staged under a transient state key
//!
//! Both steps' events are forwarded unchanged so their output keys are applied.

use crate::invocation::InvocationContext;
use crate::step::Step;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// State keys the gate reads and writes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GateConfig {
    /// Key whose presence marks the preparation step as done
    pub prep_output_key: String,
    /// Key the latest user text is staged under before normalization
    pub staged_message_key: String,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            prep_output_key: "briefing_refined".to_string(),
            staged_message_key: "latest_user_message".to_string(),
        }
    }
}

impl GateConfig {
    #[must_use]
    pub fn with_prep_output_key(mut self, key: impl Into<String>) -> Self {
        self.prep_output_key = key.into();
        self
    }

    #[must_use]
    pub fn with_staged_message_key(mut self, key: impl Into<String>) -> Self {
        self.staged_message_key = key.into();
        self
    }
}

pub struct TurnGate {
    name: String,
    prep: Arc<dyn Step>,
    normalize: Arc<dyn Step>,
    config: GateConfig,
}

impl TurnGate {
    #[must_use]
    pub fn new(prep: Arc<dyn Step>, normalize: Arc<dyn Step>) -> Self {
        Self {
            name: "conditional_prep".to_string(),
            prep,
            normalize,
            config: GateConfig::default(),
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: GateConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub const fn config(&self) -> &GateConfig {
        &self.config
    }
}

#[async_trait]
impl Step for TurnGate {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &mut InvocationContext) -> Result<()> {
        if ctx.state().contains(&self.config.prep_output_key) {
            log::debug!(
                "{} already present; skipping {}",
                self.config.prep_output_key,
                self.prep.name()
            );
        } else {
            ctx.run_step(self.prep.as_ref()).await?;
        }

        let user_text = ctx
            .user_content
            .as_deref()
            .filter(|text| !text.is_empty())
            .map(str::to_string);

        let Some(text) = user_text else {
            log::debug!("No user text this turn; skipping {}", self.normalize.name());
            return Ok(());
        };

        ctx.stage(self.config.staged_message_key.clone(), Value::String(text));
        ctx.run_step(self.normalize.as_ref()).await
    }
}
