//! `stepwise run` — replay a scripted session through an orchestrator.

use anyhow::{Context, bail};
use clap::{Args, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use stepwise_agent::patterns::{LlmParticipant, Participant};
use stepwise_agent::{Agent, Chat, ChatDriver, Orchestrator, ScriptedProvider, ToolUse};
use stepwise_config::LoopConfig;
use stepwise_core::event::{EventSink, TracingEventSink};
use stepwise_core::message::Message;
use stepwise_core::provider::Provider;
use stepwise_core::state::AgentState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Mode {
    /// Autonomous agent with every configured guard
    #[default]
    Agent,
    /// Plain tool-calling loop
    ToolUse,
    /// Two participants taking turns
    Chat,
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// JSON array of scripted provider responses
    #[arg(short, long)]
    pub script: PathBuf,

    /// Config file (defaults to ./stepwise.toml when present)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[arg(short, long, value_enum, default_value_t = Mode::Agent)]
    pub mode: Mode,

    /// Opening user message (the topic, in chat mode)
    #[arg(short, long, default_value = "Hello!")]
    pub task: String,
}

/// Run to completion and return the final state.
pub async fn execute(args: &RunArgs) -> anyhow::Result<AgentState> {
    let config_path = args.config.clone().unwrap_or_else(LoopConfig::default_path);
    let config = super::config_cmd::load(&config_path)?;
    let provider: Arc<dyn Provider> = Arc::new(load_script(&args.script).await?);
    let events: Arc<dyn EventSink> = Arc::new(TracingEventSink);

    info!(mode = ?args.mode, script = %args.script.display(), "Starting run");

    let state = match args.mode {
        Mode::Agent => {
            let agent = Agent::new(provider, stepwise_tools::default_registry(), &config)
                .with_event_sink(events);
            let start = agent.start_state().with_message(Message::user(&args.task));
            step_through(&agent, start).await
        }
        Mode::ToolUse => {
            let tool_use = ToolUse::new(provider, stepwise_tools::default_registry(), &config)
                .with_event_sink(events);
            let start = tool_use.start_with(&args.task);
            step_through(&tool_use, start).await
        }
        Mode::Chat => {
            let model = config.model.model.clone();
            let participants: Vec<Arc<dyn Participant>> = ["alice", "bob"]
                .into_iter()
                .map(|name| {
                    Arc::new(LlmParticipant::new(name, Arc::clone(&provider), model.clone()))
                        as Arc<dyn Participant>
                })
                .collect();
            let chat = Chat::new(ChatDriver::new(participants), config.limits.max_steps)
                .with_topic(&args.task)
                .with_event_sink(events);
            let start = chat.start_state();
            step_through(&chat, start).await
        }
    };

    Ok(state)
}

/// `stepwise run`: print the final state snapshot as JSON.
pub async fn run(args: RunArgs) -> anyhow::Result<()> {
    let state = execute(&args).await?;
    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}

async fn load_script(path: &Path) -> anyhow::Result<ScriptedProvider> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read script {}", path.display()))?;
    let provider = ScriptedProvider::from_json(&raw)
        .with_context(|| format!("invalid script {}", path.display()))?;
    if provider.remaining().await == 0 {
        bail!("script {} has no responses", path.display());
    }
    Ok(provider)
}

async fn step_through(orchestrator: &impl Orchestrator, mut state: AgentState) -> AgentState {
    while orchestrator.has_next_step(&state) {
        state = orchestrator.next_step(state).await;
        if let Some(result) = state.last_step_result() {
            info!(
                step = result.step_number,
                should_continue = result.should_continue(),
                stop_reason = ?result.outcome.stop_reason,
                tokens = result.step.usage().total(),
                "Step recorded"
            );
        }
    }
    info!(
        status = ?state.status(),
        steps = state.step_count(),
        tokens = state.usage().total(),
        "Run finished"
    );
    state
}
