//! Steps: the units a turn is composed of.
//!
//! A [`Step`] receives the [`InvocationContext`] and emits events through it.
//! Steps never write session state directly except by staging or through the
//! output key they declare; the context turns their final text into a state
//! write.

use crate::events::Event;
use crate::invocation::InvocationContext;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A unit of work that emits events for one invocation.
#[async_trait]
pub trait Step: Send + Sync {
    /// Name used as the author of the step's events.
    fn name(&self) -> &str;

    /// State key the step's final text is written to, if any.
    fn output_key(&self) -> Option<&str> {
        None
    }

    /// Run the step, emitting events via [`InvocationContext::emit`].
    ///
    /// # Errors
    /// Returns an error if the step cannot complete. Events already emitted
    /// stay applied.
    async fn run(&self, ctx: &mut InvocationContext) -> Result<()>;
}

/// Runs its children in order.
pub struct Sequence {
    name: String,
    steps: Vec<Arc<dyn Step>>,
}

impl Sequence {
    #[must_use]
    pub fn new(name: impl Into<String>, steps: Vec<Arc<dyn Step>>) -> Self {
        Self {
            name: name.into(),
            steps,
        }
    }
}

#[async_trait]
impl Step for Sequence {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &mut InvocationContext) -> Result<()> {
        for step in &self.steps {
            ctx.run_step(step.as_ref()).await?;
        }
        Ok(())
    }
}

/// A step that replays canned events, one round per invocation.
///
/// Every emitted event is re-authored with the step's name. Once the scripted
/// rounds are used up, further invocations emit nothing.
pub struct ScriptedStep {
    name: String,
    output_key: Option<String>,
    rounds: Vec<Vec<Event>>,
    invocations: AtomicUsize,
}

impl ScriptedStep {
    #[must_use]
    pub fn new(name: impl Into<String>, rounds: Vec<Vec<Event>>) -> Self {
        Self {
            name: name.into(),
            output_key: None,
            rounds,
            invocations: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }

    /// How many times the step has run.
    #[must_use]
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Step for ScriptedStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn output_key(&self) -> Option<&str> {
        self.output_key.as_deref()
    }

    async fn run(&self, ctx: &mut InvocationContext) -> Result<()> {
        let round = self.invocations.fetch_add(1, Ordering::SeqCst);
        let Some(events) = self.rounds.get(round) else {
            log::debug!("{} has no scripted round {round}", self.name);
            return Ok(());
        };

        for event in events {
            let mut event = event.clone();
            event.author.clone_from(&self.name);
            ctx.emit(event).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Session, SessionState};
    use crate::types::{SessionId, UserId};

    fn context() -> InvocationContext {
        let session = Session::new(SessionId::new(), UserId::default(), SessionState::new());
        InvocationContext::new(session, None)
    }

    #[tokio::test]
    async fn scripted_step_replays_one_round_per_run() -> Result<()> {
        let step = ScriptedStep::new("assistant", vec![
            vec![Event::text("x", "first")],
            vec![Event::text("x", "second"), Event::text("x", "third")],
        ]);
        let mut ctx = context();

        ctx.run_step(&step).await?;
        ctx.run_step(&step).await?;
        ctx.run_step(&step).await?;

        assert_eq!(step.invocations(), 3);
        let texts: Vec<_> = ctx.session.events.iter().map(Event::text_content).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
        assert!(ctx.session.events.iter().all(|e| e.author == "assistant"));
        Ok(())
    }

    #[tokio::test]
    async fn sequence_runs_every_child_even_after_escalation() -> Result<()> {
        let first = Arc::new(ScriptedStep::new("first", vec![vec![Event::escalation("x")]]));
        let second = Arc::new(ScriptedStep::new("second", vec![vec![Event::text("x", "ran")]]));
        let sequence = Sequence::new("root", vec![
            Arc::clone(&first) as Arc<dyn Step>,
            Arc::clone(&second) as Arc<dyn Step>,
        ]);
        let mut ctx = context();

        ctx.run_step(&sequence).await?;

        assert_eq!(first.invocations(), 1);
        assert_eq!(second.invocations(), 1);
        Ok(())
    }
}
