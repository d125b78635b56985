//! Step and StepResult — one iteration's work product and its evaluation.
//!
//! A [`Step`] is built by a driver, then frozen behind an `Arc` once it is
//! recorded. The continuation outcome and timing are bundled next to it in a
//! [`StepResult`] so the step itself never has to change after creation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::continuation::ContinuationOutcome;
use crate::error::{ContinuationError, DriverError, ToolError};
use crate::message::Message;
use crate::tool::{ToolCall, ToolExecutions};
use crate::usage::Usage;

/// Why the model stopped producing output for a step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FinishReason {
    #[default]
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Error,
    Other(String),
}

impl FinishReason {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Stop => "stop",
            Self::Length => "length",
            Self::ToolCalls => "tool_calls",
            Self::ContentFilter => "content_filter",
            Self::Error => "error",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for FinishReason {
    fn from(s: String) -> Self {
        match s.as_str() {
            "stop" => Self::Stop,
            "length" => Self::Length,
            "tool_calls" => Self::ToolCalls,
            "content_filter" => Self::ContentFilter,
            "error" => Self::Error,
            _ => Self::Other(s),
        }
    }
}

impl From<&str> for FinishReason {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<FinishReason> for String {
    fn from(reason: FinishReason) -> Self {
        reason.as_str().to_string()
    }
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a step-level error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Driver,
    Tool,
    Validation,
    Continuation,
    Other,
}

/// An error recorded on a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepError {
    pub message: String,
    pub kind: ErrorKind,
}

impl StepError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }
}

impl From<&ToolError> for StepError {
    fn from(err: &ToolError) -> Self {
        let kind = match err {
            ToolError::MissingParameters { .. } | ToolError::InvalidArguments(_) => {
                ErrorKind::Validation
            }
            _ => ErrorKind::Tool,
        };
        Self::new(kind, err.to_string())
    }
}

impl From<&DriverError> for StepError {
    fn from(err: &DriverError) -> Self {
        match err {
            DriverError::Tool(tool_err) | DriverError::ToolBatch { source: tool_err, .. } => {
                Self::from(tool_err)
            }
            other => Self::new(ErrorKind::Driver, other.to_string()),
        }
    }
}

impl From<&ContinuationError> for StepError {
    fn from(err: &ContinuationError) -> Self {
        Self::new(ErrorKind::Continuation, err.to_string())
    }
}

/// Derived classification of a step; never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepType {
    FinalResponse,
    ToolExecution,
    Error,
}

/// One iteration's work product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    id: String,
    #[serde(default)]
    input_messages: Vec<Message>,
    #[serde(default)]
    output_messages: Vec<Message>,
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
    #[serde(default)]
    tool_executions: ToolExecutions,
    #[serde(default)]
    errors: Vec<StepError>,
    #[serde(default)]
    usage: Usage,
    #[serde(default)]
    finish_reason: FinishReason,
    created_at: DateTime<Utc>,
}

impl Step {
    /// Start a step from its input context.
    pub fn new(input_messages: Vec<Message>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            input_messages,
            output_messages: Vec::new(),
            tool_calls: Vec::new(),
            tool_executions: ToolExecutions::default(),
            errors: Vec::new(),
            usage: Usage::default(),
            finish_reason: FinishReason::Stop,
            created_at: Utc::now(),
        }
    }

    /// A terminal failure step: empty output, no tool executions, one error.
    pub fn failure(input_messages: Vec<Message>, error: StepError) -> Self {
        Self::new(input_messages)
            .with_errors(vec![error])
            .with_finish_reason(FinishReason::Error)
    }

    pub fn with_output_messages(mut self, messages: Vec<Message>) -> Self {
        self.output_messages = messages;
        self
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = tool_calls;
        self
    }

    pub fn with_tool_executions(mut self, executions: ToolExecutions) -> Self {
        self.tool_executions = executions;
        self
    }

    pub fn with_errors(mut self, errors: Vec<StepError>) -> Self {
        self.errors = errors;
        self
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_finish_reason(mut self, reason: FinishReason) -> Self {
        self.finish_reason = reason;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn input_messages(&self) -> &[Message] {
        &self.input_messages
    }

    pub fn output_messages(&self) -> &[Message] {
        &self.output_messages
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        &self.tool_calls
    }

    pub fn tool_executions(&self) -> &ToolExecutions {
        &self.tool_executions
    }

    pub fn errors(&self) -> &[StepError] {
        &self.errors
    }

    pub fn usage(&self) -> Usage {
        self.usage
    }

    pub fn finish_reason(&self) -> &FinishReason {
        &self.finish_reason
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// True when the step recorded errors or any tool in its batch failed.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty() || self.tool_executions.has_errors()
    }

    /// Errors joined for display.
    pub fn error_text(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.message.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub fn step_type(&self) -> StepType {
        if self.has_errors() {
            StepType::Error
        } else if self.has_tool_calls() {
            StepType::ToolExecution
        } else {
            StepType::FinalResponse
        }
    }

    /// Text of the last output message, if any.
    pub fn output_text(&self) -> Option<&str> {
        self.output_messages
            .iter()
            .rev()
            .find(|m| m.tool_call_id.is_none())
            .map(|m| m.content.as_str())
    }
}

/// A recorded step bundled with its continuation outcome and timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub step: Arc<Step>,
    pub outcome: ContinuationOutcome,
    /// 1-based position in the state's history.
    pub step_number: usize,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl StepResult {
    pub fn new(
        step: Arc<Step>,
        outcome: ContinuationOutcome,
        step_number: usize,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            step,
            outcome,
            step_number,
            started_at,
            completed_at,
        }
    }

    /// Identity follows the step.
    pub fn id(&self) -> &str {
        self.step.id()
    }

    pub fn should_continue(&self) -> bool {
        self.outcome.should_continue
    }

    pub fn duration_ms(&self) -> u64 {
        self.completed_at
            .signed_duration_since(self.started_at)
            .num_milliseconds()
            .max(0) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{ToolExecution, ToolOutcome};

    fn tool_step() -> Step {
        Step::new(vec![Message::user("add 2 and 3")])
            .with_output_messages(vec![Message::assistant("calling sum")])
            .with_tool_calls(vec![ToolCall::new("c1", "sum", serde_json::json!({"a": 2}))])
            .with_usage(Usage::new(12, 4))
            .with_finish_reason(FinishReason::ToolCalls)
    }

    #[test]
    fn step_type_is_derived() {
        assert_eq!(Step::new(vec![]).step_type(), StepType::FinalResponse);
        assert_eq!(tool_step().step_type(), StepType::ToolExecution);
        let failed = Step::failure(vec![], StepError::new(ErrorKind::Driver, "boom"));
        assert_eq!(failed.step_type(), StepType::Error);
        assert_eq!(failed.finish_reason(), &FinishReason::Error);
        assert!(failed.output_messages().is_empty());
        assert!(failed.tool_executions().is_empty());
    }

    #[test]
    fn failed_tool_execution_marks_step_as_error() {
        let now = Utc::now();
        let step = tool_step().with_tool_executions(ToolExecutions::new(vec![ToolExecution {
            tool_call: ToolCall::new("c1", "sum", serde_json::json!({"a": 2})),
            result: ToolOutcome::Failure(ToolError::NotFound("sum".into())),
            started_at: now,
            completed_at: now,
        }]));
        assert!(step.errors().is_empty());
        assert!(step.has_errors());
        assert_eq!(step.step_type(), StepType::Error);
    }

    #[test]
    fn snapshot_roundtrip_preserves_messages_and_usage() {
        let step = tool_step();
        let snapshot = serde_json::to_value(&step).unwrap();
        assert!(snapshot.get("inputMessages").is_some());
        assert!(snapshot.get("finishReason").is_some());
        assert!(snapshot.get("stepType").is_none());

        let rebuilt: Step = serde_json::from_value(snapshot).unwrap();
        assert_eq!(rebuilt.id(), step.id());
        assert_eq!(rebuilt.input_messages(), step.input_messages());
        assert_eq!(rebuilt.output_messages(), step.output_messages());
        assert_eq!(rebuilt.usage(), step.usage());
        assert_eq!(rebuilt.step_type(), StepType::ToolExecution);
    }

    #[test]
    fn finish_reason_wire_format() {
        assert_eq!(serde_json::to_value(FinishReason::ToolCalls).unwrap(), "tool_calls");
        let custom: FinishReason = serde_json::from_value(serde_json::json!("handoff")).unwrap();
        assert_eq!(custom, FinishReason::Other("handoff".into()));
    }

    #[test]
    fn step_errors_from_collaborator_errors() {
        let missing = ToolError::MissingParameters {
            tool_name: "sum".into(),
            missing: vec!["b".into()],
        };
        assert_eq!(StepError::from(&missing).kind, ErrorKind::Validation);
        let driver = DriverError::other("driver boom");
        let err = StepError::from(&driver);
        assert_eq!(err.kind, ErrorKind::Driver);
        assert_eq!(err.message, "driver boom");
    }
}
