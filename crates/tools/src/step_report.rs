//! Step report tool — lets the model inspect the loop it is running in.

use async_trait::async_trait;
use serde_json::{Value, json};

use stepwise_core::error::ToolError;
use stepwise_core::state::AgentState;
use stepwise_core::step::StepType;
use stepwise_core::tool::{StateAwareTool, Tool};

/// Summarises progress so far: steps taken, token usage, recent errors.
///
/// Only meaningful with state; plain `invoke` is rejected.
pub struct StepReportTool;

#[async_trait]
impl Tool for StepReportTool {
    fn name(&self) -> &str {
        "step_report"
    }

    fn description(&self) -> &str {
        "Report how many steps have run, tokens used so far, and errors in the most recent steps."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "recent": {
                    "type": "integer",
                    "description": "How many recent steps to list (default 3)"
                }
            }
        })
    }

    async fn invoke(&self, _arguments: Value) -> Result<Value, ToolError> {
        Err(ToolError::ExecutionFailed {
            tool_name: self.name().to_string(),
            reason: "step_report needs the loop state".into(),
        })
    }

    fn as_state_aware(&self) -> Option<&dyn StateAwareTool> {
        Some(self)
    }
}

#[async_trait]
impl StateAwareTool for StepReportTool {
    async fn invoke_with_state(&self, arguments: Value, state: &AgentState) -> Result<Value, ToolError> {
        let recent = match arguments.get("recent") {
            None | Some(Value::Null) => 3,
            Some(v) => v.as_u64().ok_or_else(|| {
                ToolError::InvalidArguments("'recent' must be a non-negative integer".into())
            })? as usize,
        };

        let results = state.step_results();
        let steps: Vec<Value> = results
            .iter()
            .skip(results.len().saturating_sub(recent))
            .map(|r| {
                json!({
                    "number": r.step_number,
                    "type": step_type_name(r.step.step_type()),
                    "tool_calls": r.step.tool_calls().iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
                    "errors": r.step.errors().iter().map(|e| e.message.as_str()).collect::<Vec<_>>(),
                    "tokens": r.step.usage().total(),
                })
            })
            .collect();

        let usage = state.usage();
        Ok(json!({
            "steps": state.step_count(),
            "consecutive_error_steps": state.consecutive_error_steps(),
            "usage": { "input": usage.input, "output": usage.output, "total": usage.total() },
            "recent": steps,
        }))
    }
}

fn step_type_name(step_type: StepType) -> &'static str {
    match step_type {
        StepType::FinalResponse => "final_response",
        StepType::ToolExecution => "tool_execution",
        StepType::Error => "error",
    }
}
