//! Error types for the Stepwise domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each collaborator boundary (provider, tool, driver, continuation) has its own
//! error type.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::step::Step;
use crate::tool::ToolExecutions;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Provider script exhausted after {calls} calls")]
    Exhausted { calls: usize },

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),
}

/// Errors raised while resolving, validating or invoking a tool.
///
/// Cloneable and serializable so a failure can live inside a recorded
/// [`ToolExecution`](crate::tool::ToolExecution) and survive a snapshot.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Missing required parameters for {tool_name}: {}", .missing.join(", "))]
    MissingParameters {
        tool_name: String,
        missing: Vec<String>,
    },

    #[error("Tool execution failed: {tool_name} — {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Permission denied: {tool_name} — {reason}")]
    PermissionDenied { tool_name: String, reason: String },
}

/// A batch stopped by throw-on-failure. Every call still ran; `executions`
/// holds all of them and `error` is the first failure in request order.
#[derive(Debug, Clone, Error)]
#[error("{error}")]
pub struct ToolBatchError {
    #[source]
    pub error: ToolError,
    pub executions: ToolExecutions,
}

/// Errors raised while producing a raw step.
#[derive(Debug, Clone, Error)]
pub enum DriverError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Tool(#[from] ToolError),

    /// The model answered but a tool batch raised; `step` is what was built
    /// before the raise (model output, usage and the executed batch).
    #[error("{source}")]
    ToolBatch {
        step: Box<Step>,
        #[source]
        source: ToolError,
    },

    #[error("{0}")]
    Other(String),
}

impl DriverError {
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }

    /// The work done before the failure, when there was any.
    pub fn partial_step(&self) -> Option<&Step> {
        match self {
            Self::ToolBatch { step, .. } => Some(step.as_ref()),
            _ => None,
        }
    }
}

/// A continuation criterion failed while evaluating a state.
#[derive(Debug, Clone, Error)]
#[error("criterion '{criterion}' failed: {message}")]
pub struct ContinuationError {
    pub criterion: String,
    pub message: String,
}

impl ContinuationError {
    pub fn new(criterion: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            criterion: criterion.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = DriverError::from(ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn missing_parameters_lists_names() {
        let err = ToolError::MissingParameters {
            tool_name: "sum".into(),
            missing: vec!["b".into(), "c".into()],
        };
        let text = err.to_string();
        assert!(text.contains("sum"));
        assert!(text.contains("b, c"));
    }

    #[test]
    fn tool_error_survives_serialization() {
        let err = ToolError::ExecutionFailed {
            tool_name: "shell".into(),
            reason: "exit 1".into(),
        };
        let json = serde_json::to_string(&err).unwrap();
        let back: ToolError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
    }

    #[test]
    fn driver_error_is_transparent_over_provider() {
        let err = DriverError::from(ProviderError::Timeout("30s".into()));
        assert_eq!(err.to_string(), "Request timed out: 30s");
    }

    #[test]
    fn tool_batch_displays_the_failure_and_keeps_the_step() {
        let source = ToolError::NotFound("nope".into());
        let err = DriverError::ToolBatch {
            step: Box::new(Step::new(vec![])),
            source: source.clone(),
        };
        assert_eq!(err.to_string(), source.to_string());
        assert!(err.partial_step().is_some());
        assert!(DriverError::other("x").partial_step().is_none());
    }

    #[test]
    fn continuation_error_names_criterion() {
        let err = ContinuationError::new("steps_limit", "boom");
        assert_eq!(err.to_string(), "criterion 'steps_limit' failed: boom");
    }
}
