//! Agent Relay - turn orchestration and event correlation for agent backends.
//!
//! This crate sits between an LLM-driven agent backend and a consumer that
//! wants a few stable, incrementally-updated units of work:
//! - A turn gate that runs preparation once per session and message
//!   normalization every turn
//! - A bounded loop that reruns an assistant step until it produces a final
//!   reply
//! - A correlator that folds tool calls, responses and job polls into ordered
//!   operation records
//! - An in-process runner and an HTTP API-server source behind one
//!   `EventSource` trait
//!
//! # Example
//!
//! ```ignore
//! use agent_relay::{
//!     ChatClient, ChatConfig, InMemorySessionStore, LoopController, Runner, Sequence, TurnGate,
//! };
//!
//! let gate = Arc::new(TurnGate::new(briefing_step, message_step));
//! let assistant_loop = Arc::new(LoopController::new(assistant_step));
//! let root = Arc::new(Sequence::new("root", vec![gate, assistant_loop]));
//! let runner = Runner::new(root, Arc::new(InMemorySessionStore::new()));
//!
//! let mut chat = ChatClient::new(Arc::new(runner), ChatConfig::default());
//! let view = chat.send("What was the talk about?", |view| render(view)).await?;
//! ```

#![forbid(unsafe_code)]

mod chat;
pub mod correlator;
pub mod events;
mod gate;
mod hooks;
mod invocation;
pub mod loop_controller;
mod runner;
mod session;
pub mod source;
mod step;
mod stores;
mod types;

#[cfg(test)]
mod test_utils;

pub use chat::{Briefing, ChatClient, ChatConfig, TurnView};
pub use correlator::{
    CorrelatorConfig, EventCorrelator, FragmentKind, OperationRecord, OperationStatus,
    TextFragment,
};
pub use events::{
    Event, EventActions, EventEnvelope, FunctionCall, FunctionResponse, Part, SequenceCounter,
};
pub use gate::{GateConfig, TurnGate};
pub use hooks::{DefaultHooks, LoggingHooks, RelayHooks};
pub use invocation::{EventSink, InvocationContext};
pub use loop_controller::{ExitCheck, LoopConfig, LoopController, LoopOutcome};
pub use runner::{Runner, RunnerConfig};
pub use session::{Session, SessionState};
pub use source::{ApiServerConfig, ApiServerSource, EventSource, EventStream};
pub use step::{ScriptedStep, Sequence, Step};
pub use stores::{InMemorySessionStore, SessionStore};
pub use types::{RelayError, SessionId, UserId};
