//! Runs two chat turns against either a scripted in-process pipeline or a
//! remote API server.
//!
//! ```sh
//! RUST_LOG=debug cargo run --example scripted_turn
//! AGENT_RELAY_API_URL=http://localhost:8000 cargo run --example scripted_turn
//! ```

use agent_relay::{
    ApiServerConfig, ApiServerSource, Briefing, ChatClient, ChatConfig, Event, EventSource,
    FunctionCall, FunctionResponse, InMemorySessionStore, LoggingHooks, LoopController, Part,
    Runner, ScriptedStep, Sequence, Step, TurnGate, TurnView,
};
use serde_json::json;
use std::sync::Arc;

const ASSISTANT: &str = "assistant";

fn scripted_pipeline() -> Runner {
    let briefing: Arc<dyn Step> = Arc::new(
        ScriptedStep::new("briefing_refinement_agent", vec![vec![
            Event::text("", "Refined").partial(),
            Event::text("", "Refined briefing: a conference talk on async Rust."),
        ]])
        .with_output_key("briefing_refined"),
    );
    let message_fix: Arc<dyn Step> = Arc::new(
        ScriptedStep::new("message_fix_agent", vec![vec![Event::text("", "normalized")]; 2])
            .with_output_key("normalized_user_message"),
    );

    let analysis_call = Event::new(ASSISTANT).with_part(Part::FunctionCall(FunctionCall::new(
        "call-1",
        "start_media_analysis",
        json!({"reference": "talk-42", "priors": {"context": "RustConf keynote"}}),
    )));
    let poll = |id: &str, name: &str, status: &str| {
        Event::new(ASSISTANT).with_part(Part::FunctionResponse(FunctionResponse::new(
            Some(id.to_string()),
            name,
            json!({"structuredContent": {"job_id": "job-7", "status": status}}),
        )))
    };
    let assistant: Arc<dyn Step> = Arc::new(ScriptedStep::new(ASSISTANT, vec![
        vec![
            analysis_call,
            poll("call-1", "start_media_analysis", "running"),
        ],
        vec![
            poll("call-2", "get_media_analysis_result", "running"),
            poll("call-3", "get_media_analysis_result", "done"),
            Event::text(ASSISTANT, "The keynote walks through structured concurrency."),
        ],
        vec![Event::text(ASSISTANT, "It was given by the async working group.")],
    ]));

    let gate: Arc<dyn Step> = Arc::new(TurnGate::new(briefing, message_fix));
    let assistant_loop: Arc<dyn Step> = Arc::new(LoopController::new(assistant));
    let root = Arc::new(Sequence::new("root", vec![gate, assistant_loop]));

    Runner::new(root, Arc::new(InMemorySessionStore::new())).with_hooks(Arc::new(LoggingHooks))
}

fn print_view(view: &TurnView) {
    for op in &view.operations {
        println!("  [{:?}] {}", op.status, op.title);
    }
    if !view.reply.is_empty() {
        println!("  reply: {}", view.reply);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let source: Arc<dyn EventSource> = match std::env::var("AGENT_RELAY_API_URL") {
        Ok(url) => Arc::new(ApiServerSource::new(
            ApiServerConfig::default().with_base_url(url),
        )),
        Err(_) => Arc::new(scripted_pipeline()),
    };

    let config = ChatConfig::default().with_briefing(Briefing {
        media_url: "https://example.com/rustconf-keynote".to_string(),
        questions: "What is the main argument?".to_string(),
        ..Briefing::default()
    });
    let mut chat = ChatClient::new(source, config);

    for message in ["What is the talk about?", "Who presented it?"] {
        println!("> {message}");
        let view = chat.send(message, |_| {}).await?;
        print_view(&view);
    }

    chat.reset().await;
    Ok(())
}
