//! ToolUse — call the model, run its tools, repeat while it asks for more.

use std::sync::Arc;

use stepwise_config::LoopConfig;
use stepwise_core::event::EventSink;
use stepwise_core::message::Message;
use stepwise_core::provider::Provider;
use stepwise_core::state::{AgentState, CachedContext};
use stepwise_core::tool::ToolRegistry;

use crate::continuation::{
    ContinuationCriteria, ErrorPolicy, ErrorPolicyCriterion, StepsLimit, TokenUsageLimit,
    ToolCallPresenceCheck,
};
use crate::driver::ToolCallingDriver;
use crate::executor::ToolExecutor;
use crate::loop_runner::StepLoop;
use crate::processors::ProcessorPipeline;

use super::Orchestrator;

pub struct ToolUse {
    step_loop: StepLoop,
    context: CachedContext,
}

impl ToolUse {
    /// Steps limit, token limit, error policy and tool-call presence from
    /// `config`; the default processor pipeline.
    pub fn new(provider: Arc<dyn Provider>, tools: ToolRegistry, config: &LoopConfig) -> Self {
        let mut criteria = ContinuationCriteria::new().with(StepsLimit::new(config.limits.max_steps));
        if config.limits.max_tokens > 0 {
            criteria = criteria.with(TokenUsageLimit::new(config.limits.max_tokens));
        }
        let criteria = criteria
            .with(ErrorPolicyCriterion::new(ErrorPolicy::from_config(&config.errors)))
            .with(ToolCallPresenceCheck);

        let driver = ToolCallingDriver::from_config(provider, &config.model);
        let step_loop = StepLoop::new(Arc::new(driver), criteria)
            .with_tools(tools)
            .with_executor(ToolExecutor::from_config(&config.tools))
            .with_processors(ProcessorPipeline::default_pipeline());

        let context = config
            .model
            .system_prompt
            .as_deref()
            .map(CachedContext::system_prompt)
            .unwrap_or_default();

        Self { step_loop, context }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.context = CachedContext::system_prompt(prompt);
        self
    }

    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.step_loop = self.step_loop.with_event_sink(events);
        self
    }

    /// Start state holding a single user message.
    pub fn start_with(&self, prompt: impl Into<String>) -> AgentState {
        self.start_state().with_message(Message::user(prompt))
    }
}

impl Orchestrator for ToolUse {
    fn step_loop(&self) -> &StepLoop {
        &self.step_loop
    }

    fn start_state(&self) -> AgentState {
        AgentState::new().with_cached_context(self.context.clone())
    }
}
