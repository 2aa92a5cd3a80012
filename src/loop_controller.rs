//! Bounded self-invocation loop around a watched step.
//!
//! Each round runs the watched step and then an [`ExitCheck`]. The exit check
//! escalates once the watched step has produced a final reply, which ends the
//! loop. Reaching `max_iterations` without an escalation is not an error.
//!
//! # Example
//!
//! ```ignore
//! let controller = LoopController::new(assistant_step)
//!     .with_config(LoopConfig::default().with_max_iterations(5));
//! let outcome = controller.drive(&mut ctx).await?;
//! ```

mod completion;
mod signature;


pub use completion::{Verdict, evaluate, has_output};
pub use signature::{PLACEHOLDER_SIGNATURE, SignaturePatch};

use crate::events::Event;
use crate::invocation::InvocationContext;
use crate::step::Step;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Loop limits and exit-check behavior.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Maximum number of rounds (default: 10)
    pub max_iterations: usize,
    /// State key whose non-empty value counts as a finished reply
    pub response_state_key: Option<String>,
    /// Backfill missing thought signatures when the reply stalls
    pub patch_missing_signatures: bool,
    pub placeholder_signature: String,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            response_state_key: None,
            patch_missing_signatures: true,
            placeholder_signature: PLACEHOLDER_SIGNATURE.to_string(),
        }
    }
}

impl LoopConfig {
    #[must_use]
    pub const fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    #[must_use]
    pub fn with_response_state_key(mut self, key: impl Into<String>) -> Self {
        self.response_state_key = Some(key.into());
        self
    }

    #[must_use]
    pub const fn with_patch_missing_signatures(mut self, enabled: bool) -> Self {
        self.patch_missing_signatures = enabled;
        self
    }

    #[must_use]
    pub fn with_placeholder_signature(mut self, placeholder: impl Into<String>) -> Self {
        self.placeholder_signature = placeholder.into();
        self
    }
}

/// How a loop ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoopOutcome {
    /// A round emitted an escalation
    Escalated { rounds: usize },
    /// The iteration cap was reached
    Exhausted { rounds: usize },
}

impl LoopOutcome {
    #[must_use]
    pub const fn rounds(&self) -> usize {
        match self {
            Self::Escalated { rounds } | Self::Exhausted { rounds } => *rounds,
        }
    }
}

/// Step that inspects the watched step's output after every round.
pub struct ExitCheck {
    name: String,
    watched: String,
    response_state_key: Option<String>,
    patch: Option<SignaturePatch>,
}

impl ExitCheck {
    #[must_use]
    pub fn new(watched: impl Into<String>, config: &LoopConfig) -> Self {
        Self {
            name: "assistant_loop_exit".to_string(),
            watched: watched.into(),
            response_state_key: config.response_state_key.clone(),
            patch: config
                .patch_missing_signatures
                .then(|| SignaturePatch::new(config.placeholder_signature.clone())),
        }
    }
}

#[async_trait]
impl Step for ExitCheck {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &mut InvocationContext) -> Result<()> {
        match evaluate(&ctx.session, &self.watched, self.response_state_key.as_deref()) {
            Verdict::Continue => {}
            Verdict::Escalate => {
                ctx.emit(Event::escalation(self.name.clone())).await;
            }
            Verdict::StallRecovery => {
                let patched = self
                    .patch
                    .as_ref()
                    .map_or(0, |patch| patch.apply(&mut ctx.session.events, &self.watched));
                log::debug!(
                    "Final {} event has no output yet; patched {patched} missing signatures, \
                     rerunning without escalating",
                    self.watched
                );
            }
        }
        Ok(())
    }
}

/// Runs a watched step until it produces a final reply or the cap is hit.
pub struct LoopController {
    name: String,
    watched: Arc<dyn Step>,
    exit: ExitCheck,
    config: LoopConfig,
}

impl LoopController {
    #[must_use]
    pub fn new(watched: Arc<dyn Step>) -> Self {
        let config = LoopConfig::default();
        Self {
            name: "assistant_loop".to_string(),
            exit: ExitCheck::new(watched.name(), &config),
            watched,
            config,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: LoopConfig) -> Self {
        self.exit = ExitCheck::new(self.watched.name(), &config);
        self.config = config;
        self
    }

    #[must_use]
    pub const fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Run rounds until an escalation or the iteration cap.
    ///
    /// # Errors
    /// Returns the first error raised by the watched step or the exit check.
    pub async fn drive(&self, ctx: &mut InvocationContext) -> Result<LoopOutcome> {
        for round in 1..=self.config.max_iterations {
            let mark = ctx.event_count();
            ctx.run_step(self.watched.as_ref()).await?;
            ctx.run_step(&self.exit).await?;

            if ctx.escalated_since(mark) {
                log::debug!("{} escalated after {round} round(s)", self.name);
                return Ok(LoopOutcome::Escalated { rounds: round });
            }
        }

        log::warn!(
            "{} reached max_iterations ({}) without a final response from {}",
            self.name,
            self.config.max_iterations,
            self.watched.name()
        );
        Ok(LoopOutcome::Exhausted {
            rounds: self.config.max_iterations,
        })
    }
}

#[async_trait]
impl Step for LoopController {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &mut InvocationContext) -> Result<()> {
        self.drive(ctx).await.map(|_| ())
    }
}
