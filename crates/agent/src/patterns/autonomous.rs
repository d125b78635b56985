//! Agent — an autonomous tool-using agent driven entirely by [`LoopConfig`].
//!
//! Compared to [`ToolUse`](super::ToolUse) the agent carries the full set of
//! guards (time limits, finish reasons, cancellation) and manages its
//! working history with trimming and summarisation.

use std::sync::Arc;
use tracing::info;

use stepwise_config::LoopConfig;
use stepwise_core::event::EventSink;
use stepwise_core::message::Message;
use stepwise_core::provider::Provider;
use stepwise_core::state::{AgentState, CachedContext};
use stepwise_core::tool::ToolRegistry;

use crate::continuation::{CancellationCheck, ContinuationCriteria, ContinuationCriterion};
use crate::driver::ToolCallingDriver;
use crate::executor::ToolExecutor;
use crate::loop_runner::StepLoop;
use crate::processors::{ProcessorPipeline, StateProcessor};

use super::Orchestrator;

pub struct Agent {
    step_loop: StepLoop,
    context: CachedContext,
    cancellation: CancellationCheck,
}

impl Agent {
    pub fn new(provider: Arc<dyn Provider>, tools: ToolRegistry, config: &LoopConfig) -> Self {
        let cancellation = CancellationCheck::new();
        let criteria = ContinuationCriteria::from_config(config, Some(cancellation.clone()));
        let processors = ProcessorPipeline::from_history_config(
            &config.history,
            Some((Arc::clone(&provider), config.model.model.clone())),
        );

        let driver = ToolCallingDriver::from_config(provider, &config.model);
        let step_loop = StepLoop::new(Arc::new(driver), criteria)
            .with_tools(tools)
            .with_executor(ToolExecutor::from_config(&config.tools))
            .with_processors(processors);

        let context = config
            .model
            .system_prompt
            .as_deref()
            .map(CachedContext::system_prompt)
            .unwrap_or_default();

        Self {
            step_loop,
            context,
            cancellation,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.context = CachedContext::system_prompt(prompt);
        self
    }

    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.step_loop = self.step_loop.with_event_sink(events);
        self
    }

    /// Add a caller-defined criterion after the configured ones.
    pub fn with_criterion(mut self, criterion: impl ContinuationCriterion + 'static) -> Self {
        self.step_loop = self.step_loop.with_criterion(criterion);
        self
    }

    /// Append a domain-specific processor to the pipeline.
    pub fn with_processor(mut self, processor: impl StateProcessor + 'static) -> Self {
        self.step_loop = self.step_loop.with_processor(processor);
        self
    }

    /// A handle that stops the agent before its next step.
    pub fn cancellation(&self) -> CancellationCheck {
        self.cancellation.clone()
    }

    /// Run a task from a fresh state to completion.
    pub async fn run(&self, task: impl Into<String>) -> AgentState {
        let task = task.into();
        info!(task_len = task.len(), "Agent run started");
        let state = self.start_state().with_message(Message::user(task));
        self.final_step(state).await
    }

    /// Continue a finished state with a follow-up message.
    ///
    /// History, usage and cumulative time carry over; execution time limits
    /// restart.
    pub async fn resume(&self, state: AgentState, message: impl Into<String>) -> AgentState {
        let state = state
            .for_new_execution()
            .with_message(Message::user(message));
        self.final_step(state).await
    }
}

impl Orchestrator for Agent {
    fn step_loop(&self) -> &StepLoop {
        &self.step_loop
    }

    fn start_state(&self) -> AgentState {
        AgentState::new().with_cached_context(self.context.clone())
    }
}
