//! Built-in processors for the default pipeline and history trimming.

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashSet;

use stepwise_core::message::{Message, Role};
use stepwise_core::state::{AgentState, CachedContext};

use super::{Next, StateProcessor};

/// `messages` with the cached context at the head, each cached message
/// appearing exactly once.
pub fn with_cached_context(messages: &[Message], context: &CachedContext) -> Vec<Message> {
    if context.is_empty() {
        return messages.to_vec();
    }
    let cached: HashSet<&str> = context.messages.iter().map(|m| m.id.as_str()).collect();
    context
        .messages
        .iter()
        .cloned()
        .chain(messages.iter().filter(|m| !cached.contains(m.id.as_str())).cloned())
        .collect()
}

/// Keeps the cached context messages at the head of the working history.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyCachedContext;

#[async_trait]
impl StateProcessor for ApplyCachedContext {
    fn name(&self) -> &str {
        "apply_cached_context"
    }

    fn can_process(&self, state: &AgentState) -> bool {
        !state.cached_context().is_empty()
    }

    async fn process(&self, state: AgentState, next: Next<'_>) -> AgentState {
        let messages = with_cached_context(state.messages(), state.cached_context());
        next.run(state.with_messages(messages)).await
    }
}

/// Writes step bookkeeping into the state metadata.
#[derive(Debug, Clone, Copy, Default)]
pub struct AppendContextMetadata;

#[async_trait]
impl StateProcessor for AppendContextMetadata {
    fn name(&self) -> &str {
        "append_context_metadata"
    }

    async fn process(&self, state: AgentState, next: Next<'_>) -> AgentState {
        let step_count = state.step_count();
        let total_tokens = state.usage().total();
        let mut state = state
            .with_metadata("step_count", json!(step_count))
            .with_metadata("total_tokens", json!(total_tokens));

        if let Some(last) = state.last_step_result().cloned() {
            state = state
                .with_metadata("last_step_id", json!(last.id()))
                .with_metadata("last_finish_reason", json!(last.step.finish_reason().as_str()))
                .with_metadata("last_stop_reason", json!(last.outcome.stop_reason.to_string()));
        }
        next.run(state).await
    }
}

/// Appends the current step's output messages to the working history.
#[derive(Debug, Clone, Copy, Default)]
pub struct AppendStepMessages;

#[async_trait]
impl StateProcessor for AppendStepMessages {
    fn name(&self) -> &str {
        "append_step_messages"
    }

    fn can_process(&self, state: &AgentState) -> bool {
        state
            .current_step()
            .is_some_and(|step| !step.output_messages().is_empty())
    }

    async fn process(&self, state: AgentState, next: Next<'_>) -> AgentState {
        let mut messages = state.messages().to_vec();
        if let Some(step) = state.current_step() {
            messages.extend(step.output_messages().iter().cloned());
        }
        next.run(state.with_messages(messages)).await
    }
}

/// Caps the working history at `max_messages` non-system messages.
///
/// System messages are always kept. Tool results at the head of the kept
/// window are dropped with the assistant message that requested them.
#[derive(Debug, Clone, Copy)]
pub struct TrimMessageHistory {
    pub max_messages: usize,
}

impl TrimMessageHistory {
    pub fn new(max_messages: usize) -> Self {
        Self { max_messages }
    }

    pub fn trim(&self, messages: &[Message]) -> Vec<Message> {
        let conversational = messages.iter().filter(|m| !m.is_system()).count();
        if conversational <= self.max_messages {
            return messages.to_vec();
        }

        let mut to_drop = conversational - self.max_messages;
        let mut kept = Vec::with_capacity(messages.len() - to_drop);
        let mut at_window_head = true;
        for message in messages {
            if message.is_system() {
                kept.push(message.clone());
            } else if to_drop > 0 {
                to_drop -= 1;
            } else if at_window_head && message.role == Role::Tool {
                // orphaned tool result
            } else {
                at_window_head = false;
                kept.push(message.clone());
            }
        }
        kept
    }
}

#[async_trait]
impl StateProcessor for TrimMessageHistory {
    fn name(&self) -> &str {
        "trim_message_history"
    }

    fn can_process(&self, _state: &AgentState) -> bool {
        self.max_messages > 0
    }

    async fn process(&self, state: AgentState, next: Next<'_>) -> AgentState {
        let trimmed = self.trim(state.messages());
        if trimmed.len() < state.messages().len() {
            tracing::debug!(
                before = state.messages().len(),
                after = trimmed.len(),
                "Trimmed message history"
            );
            next.run(state.with_messages(trimmed)).await
        } else {
            next.run(state).await
        }
    }
}

type ProcessFn = dyn Fn(AgentState) -> AgentState + Send + Sync;

/// A processor backed by a synchronous closure; always continues the chain.
pub struct FnProcessor {
    name: String,
    f: Box<ProcessFn>,
}

impl FnProcessor {
    pub fn new(
        name: impl Into<String>,
        f: impl Fn(AgentState) -> AgentState + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            f: Box::new(f),
        }
    }
}

#[async_trait]
impl StateProcessor for FnProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, state: AgentState, next: Next<'_>) -> AgentState {
        next.run((self.f)(state)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::ProcessorPipeline;
    use chrono::Utc;
    use std::sync::Arc;
    use stepwise_core::continuation::{ContinuationOutcome, StopReason};
    use stepwise_core::step::{FinishReason, Step, StepResult};
    use stepwise_core::usage::Usage;

    fn recorded(state: AgentState, step: Step, outcome: ContinuationOutcome) -> AgentState {
        let n = state.step_count() + 1;
        let now = Utc::now();
        state.with_recorded_step(StepResult::new(Arc::new(step), outcome, n, now, now))
    }

    #[tokio::test]
    async fn cached_context_heads_history_once() {
        let context = CachedContext::system_prompt("be brief");
        let state = AgentState::new()
            .with_cached_context(context)
            .with_message(Message::user("hi"));

        let pipeline = ProcessorPipeline::new().with(ApplyCachedContext);
        let once = pipeline.process(state).await;
        let twice = pipeline.process(once.clone()).await;

        assert_eq!(once.messages().len(), 2);
        assert_eq!(once.messages()[0].content, "be brief");
        assert_eq!(twice.messages(), once.messages());
    }

    #[tokio::test]
    async fn context_metadata_describes_last_step() {
        let step = Step::new(vec![])
            .with_usage(Usage::new(7, 3))
            .with_finish_reason(FinishReason::Length);
        let step_id = step.id().to_string();
        let state = recorded(
            AgentState::new(),
            step,
            ContinuationOutcome::stopped(StopReason::StepsLimitReached, None),
        );

        let state = ProcessorPipeline::new()
            .with(AppendContextMetadata)
            .process(state)
            .await;

        assert_eq!(state.get_metadata("step_count"), Some(&json!(1)));
        assert_eq!(state.get_metadata("total_tokens"), Some(&json!(10)));
        assert_eq!(state.get_metadata("last_step_id"), Some(&json!(step_id)));
        assert_eq!(state.get_metadata("last_finish_reason"), Some(&json!("length")));
        assert_eq!(
            state.get_metadata("last_stop_reason"),
            Some(&json!("steps_limit_reached"))
        );
    }

    #[tokio::test]
    async fn step_output_is_appended() {
        let state = recorded(
            AgentState::new().with_message(Message::user("hi")),
            Step::new(vec![]).with_output_messages(vec![Message::assistant("hello")]),
            ContinuationOutcome::continuing(None),
        );
        let state = ProcessorPipeline::new()
            .with(AppendStepMessages)
            .process(state)
            .await;
        let contents: Vec<_> = state.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["hi", "hello"]);
    }

    #[test]
    fn trim_keeps_system_and_recent_messages() {
        let messages = vec![
            Message::system("rules"),
            Message::user("one"),
            Message::assistant("two"),
            Message::user("three"),
            Message::assistant("four"),
        ];
        let trimmed = TrimMessageHistory::new(2).trim(&messages);
        let contents: Vec<_> = trimmed.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["rules", "three", "four"]);
    }

    #[test]
    fn trim_drops_orphaned_tool_results() {
        let messages = vec![
            Message::user("add"),
            Message::assistant("calling"),
            Message::tool_result("c1", "5"),
            Message::assistant("it is 5"),
        ];
        let trimmed = TrimMessageHistory::new(2).trim(&messages);
        let contents: Vec<_> = trimmed.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["it is 5"]);
    }

    #[tokio::test]
    async fn fn_processor_continues_chain() {
        let pipeline = ProcessorPipeline::new()
            .with(FnProcessor::new("mark", |s: AgentState| {
                s.with_metadata("marked", json!(true))
            }))
            .with(AppendContextMetadata);
        let state = pipeline.process(AgentState::new()).await;
        assert_eq!(state.get_metadata("marked"), Some(&json!(true)));
        assert_eq!(state.get_metadata("step_count"), Some(&json!(0)));
    }
}
