//! Shared test helpers for engine and pattern tests.

use async_trait::async_trait;
use serde_json::{Value, json};

use stepwise_core::error::{DriverError, ToolError};
use stepwise_core::provider::ProviderResponse;
use stepwise_core::state::AgentState;
use stepwise_core::step::Step;
use stepwise_core::tool::{StateAwareTool, Tool, ToolCall, ToolRegistry};
use stepwise_core::usage::Usage;

use crate::driver::StepDriver;
use crate::executor::ToolExecutor;

type DriverFn = dyn Fn(&AgentState) -> Result<Step, DriverError> + Send + Sync;

/// A driver backed by a closure over the current state.
pub struct FnDriver {
    f: Box<DriverFn>,
}

impl FnDriver {
    pub fn new(f: impl Fn(&AgentState) -> Result<Step, DriverError> + Send + Sync + 'static) -> Self {
        Self { f: Box::new(f) }
    }
}

#[async_trait]
impl StepDriver for FnDriver {
    async fn produce_step(
        &self,
        state: &AgentState,
        _tools: &ToolRegistry,
        _executor: &ToolExecutor,
    ) -> Result<Step, DriverError> {
        (self.f)(state)
    }
}

/// `sum(a, b)`; both arguments required.
pub struct SumTool;

#[async_trait]
impl Tool for SumTool {
    fn name(&self) -> &str {
        "sum"
    }
    fn description(&self) -> &str {
        "Adds a and b"
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "a": { "type": "number" },
                "b": { "type": "number" }
            },
            "required": ["a", "b"]
        })
    }
    async fn invoke(&self, arguments: Value) -> Result<Value, ToolError> {
        let a = arguments["a"].as_f64().unwrap_or_default();
        let b = arguments["b"].as_f64().unwrap_or_default();
        Ok(json!(a + b))
    }
}

/// Always fails.
pub struct FailingTool;

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        "fail"
    }
    fn description(&self) -> &str {
        "Always fails"
    }
    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }
    async fn invoke(&self, _arguments: Value) -> Result<Value, ToolError> {
        Err(ToolError::ExecutionFailed {
            tool_name: "fail".into(),
            reason: "tool boom".into(),
        })
    }
}

/// Reports the step count of the state it is invoked with.
pub struct StepCountTool;

#[async_trait]
impl Tool for StepCountTool {
    fn name(&self) -> &str {
        "step_count"
    }
    fn description(&self) -> &str {
        "Reports how many steps have been recorded"
    }
    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }
    async fn invoke(&self, _arguments: Value) -> Result<Value, ToolError> {
        Err(ToolError::InvalidArguments("step_count needs state".into()))
    }
    fn as_state_aware(&self) -> Option<&dyn StateAwareTool> {
        Some(self)
    }
}

#[async_trait]
impl StateAwareTool for StepCountTool {
    async fn invoke_with_state(&self, _arguments: Value, state: &AgentState) -> Result<Value, ToolError> {
        Ok(json!({ "steps": state.step_count(), "state_id": state.id() }))
    }
}

/// Helper to create a tool call.
pub fn make_tool_call(name: &str, args: Value) -> ToolCall {
    ToolCall::new(format!("call_{name}"), name, args)
}

/// Create a simple text response (no tool calls).
pub fn make_text_response(text: &str) -> ProviderResponse {
    ProviderResponse::text(text, Usage::new(10, 5))
}

/// Create a response with tool calls and thought content.
pub fn make_tool_call_response(tool_calls: Vec<ToolCall>, thought: &str) -> ProviderResponse {
    ProviderResponse::tool_calls(thought, tool_calls, Usage::new(10, 5))
}

