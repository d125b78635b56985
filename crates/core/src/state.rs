//! AgentState — the immutable snapshot the step loop advances.
//!
//! Every `with_*` method consumes the state and returns the next value.
//! Recorded steps are shared by `Arc`, so cloning a state to keep the prior
//! version around is cheap.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::message::Message;
use crate::step::{Step, StepResult};
use crate::usage::Usage;

/// Lifecycle of one loop execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    #[default]
    Ready,
    InProgress,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Messages that must head the working history on every step
/// (system prompt, pinned instructions).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CachedContext {
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl CachedContext {
    pub fn new(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    /// A context consisting of a single system prompt.
    pub fn system_prompt(prompt: impl Into<String>) -> Self {
        Self::new(vec![Message::system(prompt)])
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentState {
    id: String,
    #[serde(default)]
    step_results: Vec<StepResult>,
    #[serde(default)]
    current_step: Option<Arc<Step>>,
    #[serde(default)]
    usage: Usage,
    #[serde(default)]
    status: ExecutionStatus,
    #[serde(default)]
    messages: Vec<Message>,
    #[serde(default)]
    cached_context: CachedContext,
    #[serde(default)]
    metadata: serde_json::Map<String, serde_json::Value>,
    created_at: DateTime<Utc>,
    #[serde(default)]
    execution_started_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
    #[serde(default, with = "duration_millis")]
    cumulative_execution: Duration,
}

impl AgentState {
    /// A fresh, empty state.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            step_results: Vec::new(),
            current_step: None,
            usage: Usage::default(),
            status: ExecutionStatus::Ready,
            messages: Vec::new(),
            cached_context: CachedContext::default(),
            metadata: serde_json::Map::new(),
            created_at: now,
            execution_started_at: None,
            updated_at: now,
            cumulative_execution: Duration::ZERO,
        }
    }

    fn touched(mut self) -> Self {
        self.updated_at = Utc::now();
        self
    }

    // ── Accessors ────────────────────────────────────────────────────────

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn step_results(&self) -> &[StepResult] {
        &self.step_results
    }

    pub fn step_count(&self) -> usize {
        self.step_results.len()
    }

    pub fn last_step_result(&self) -> Option<&StepResult> {
        self.step_results.last()
    }

    pub fn current_step(&self) -> Option<&Arc<Step>> {
        self.current_step.as_ref()
    }

    pub fn usage(&self) -> Usage {
        self.usage
    }

    pub fn status(&self) -> ExecutionStatus {
        self.status
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn cached_context(&self) -> &CachedContext {
        &self.cached_context
    }

    pub fn metadata(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.metadata
    }

    pub fn get_metadata(&self, key: &str) -> Option<&serde_json::Value> {
        self.metadata.get(key)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn execution_started_at(&self) -> Option<DateTime<Utc>> {
        self.execution_started_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Wall-clock time spent inside steps, summed across resumed executions.
    pub fn cumulative_execution(&self) -> Duration {
        self.cumulative_execution
    }

    /// Number of most recent steps in a row that carry errors.
    pub fn consecutive_error_steps(&self) -> usize {
        self.step_results
            .iter()
            .rev()
            .take_while(|r| r.step.has_errors())
            .count()
    }

    // ── Transitions ──────────────────────────────────────────────────────

    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self.touched()
    }

    pub fn with_message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self.touched()
    }

    pub fn with_cached_context(mut self, context: CachedContext) -> Self {
        self.cached_context = context;
        self.touched()
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self.touched()
    }

    pub fn with_status(mut self, status: ExecutionStatus) -> Self {
        self.status = status;
        self.touched()
    }

    /// Mark the start of this execution; a no-op once set.
    pub fn with_execution_started(mut self, at: DateTime<Utc>) -> Self {
        if self.execution_started_at.is_none() {
            self.execution_started_at = Some(at);
        }
        self
    }

    pub fn with_added_execution_time(mut self, elapsed: Duration) -> Self {
        self.cumulative_execution = self.cumulative_execution.saturating_add(elapsed);
        self
    }

    /// Append a step result, make its step current and accumulate its usage.
    pub fn with_recorded_step(mut self, result: StepResult) -> Self {
        self.usage = self.usage.accumulate(&result.step.usage());
        self.current_step = Some(Arc::clone(&result.step));
        self.step_results.push(result);
        self.touched()
    }

    /// Prepare a previously finished state for another execution.
    ///
    /// History, usage and cumulative time are kept; the per-execution start
    /// mark is cleared so execution time limits measure only the new run.
    pub fn for_new_execution(mut self) -> Self {
        self.status = ExecutionStatus::Ready;
        self.execution_started_at = None;
        self.touched()
    }

    /// Test and resume support: pretend this execution started at `at`.
    pub fn with_execution_started_at(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.execution_started_at = at;
        self
    }

    /// Test and resume support: pretend this state was created at `at`.
    pub fn with_created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self
    }
}

impl Default for AgentState {
    fn default() -> Self {
        Self::new()
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
