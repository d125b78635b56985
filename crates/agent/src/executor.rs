//! Tool executor — runs one batch of requested tool calls.
//!
//! Every call in a batch produces a [`ToolExecution`]; a failing call never
//! prevents the rest of the batch from running. Missing required arguments
//! are caught before the tool is invoked and recorded as a failure.

use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, warn};

use stepwise_config::ToolsConfig;
use stepwise_core::error::{ToolBatchError, ToolError};
use stepwise_core::event::{AgentEvent, EventSink, noop_sink};
use stepwise_core::state::AgentState;
use stepwise_core::tool::{Tool, ToolCall, ToolExecution, ToolExecutions, ToolOutcome, ToolRegistry};

/// How a batch of tool calls is scheduled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExecutionMode {
    /// One call at a time, in request order.
    #[default]
    Sequential,
    /// All calls concurrently; results keep request order.
    Parallel,
}

#[derive(Clone)]
pub struct ToolExecutor {
    throw_on_failure: bool,
    mode: ExecutionMode,
    events: Arc<dyn EventSink>,
}

impl ToolExecutor {
    pub fn new() -> Self {
        Self {
            throw_on_failure: false,
            mode: ExecutionMode::Sequential,
            events: noop_sink(),
        }
    }

    pub fn from_config(config: &ToolsConfig) -> Self {
        let mode = if config.parallel {
            ExecutionMode::Parallel
        } else {
            ExecutionMode::Sequential
        };
        Self::new()
            .with_throw_on_failure(config.throw_on_failure)
            .with_mode(mode)
    }

    /// Re-raise the first failure once the whole batch has run.
    pub fn with_throw_on_failure(mut self, enabled: bool) -> Self {
        self.throw_on_failure = enabled;
        self
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn throws_on_failure(&self) -> bool {
        self.throw_on_failure
    }

    /// Execute a batch of calls against `tools`.
    ///
    /// Returns `Err` only when throw-on-failure is enabled and some call
    /// failed; the error still carries every execution of the batch.
    pub async fn execute(
        &self,
        calls: &[ToolCall],
        tools: &ToolRegistry,
        state: &AgentState,
    ) -> Result<ToolExecutions, ToolBatchError> {
        debug!(count = calls.len(), mode = ?self.mode, "Executing tool calls");

        let executions = match self.mode {
            ExecutionMode::Sequential => {
                let mut executions = Vec::with_capacity(calls.len());
                for call in calls {
                    executions.push(self.execute_one(call, tools, state).await);
                }
                executions
            }
            ExecutionMode::Parallel => {
                join_all(calls.iter().map(|call| self.execute_one(call, tools, state))).await
            }
        };
        let executions = ToolExecutions::new(executions);

        if self.throw_on_failure {
            let first_error = executions.errors().first().map(|e| (*e).clone());
            if let Some(error) = first_error {
                return Err(ToolBatchError { error, executions });
            }
        }
        Ok(executions)
    }

    async fn execute_one(&self, call: &ToolCall, tools: &ToolRegistry, state: &AgentState) -> ToolExecution {
        let started_at = Utc::now();
        self.events.dispatch(AgentEvent::ToolCallStarted {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            timestamp: started_at,
        });

        let result = match tools.get(&call.name) {
            Some(tool) => invoke(tool.as_ref(), call, state).await,
            None => Err(ToolError::NotFound(call.name.clone())),
        };
        let completed_at = Utc::now();

        let result = match result {
            Ok(value) => {
                debug!(tool = %call.name, call_id = %call.id, "Tool call succeeded");
                ToolOutcome::Success(value)
            }
            Err(e) => {
                warn!(tool = %call.name, call_id = %call.id, error = %e, "Tool call failed");
                ToolOutcome::Failure(e)
            }
        };

        self.events.dispatch(AgentEvent::ToolCallCompleted {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            success: result.is_success(),
            error: result.error().map(ToString::to_string),
            started_at,
            completed_at,
        });

        ToolExecution {
            tool_call: call.clone(),
            result,
            started_at,
            completed_at,
        }
    }
}

impl Default for ToolExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ToolExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolExecutor")
            .field("throw_on_failure", &self.throw_on_failure)
            .field("mode", &self.mode)
            .finish()
    }
}

/// Names from the schema's `required` list absent from `arguments`.
pub fn missing_parameters(tool: &dyn Tool, arguments: &serde_json::Value) -> Vec<String> {
    tool.required_parameters()
        .into_iter()
        .filter(|name| arguments.get(name).is_none())
        .collect()
}

async fn invoke(
    tool: &dyn Tool,
    call: &ToolCall,
    state: &AgentState,
) -> Result<serde_json::Value, ToolError> {
    let missing = missing_parameters(tool, &call.arguments);
    if !missing.is_empty() {
        return Err(ToolError::MissingParameters {
            tool_name: call.name.clone(),
            missing,
        });
    }

    match tool.as_state_aware() {
        Some(aware) => aware.invoke_with_state(call.arguments.clone(), state).await,
        None => tool.invoke(call.arguments.clone()).await,
    }
}
