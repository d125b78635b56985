//! Tool trait — the abstraction over agent capabilities.
//!
//! Tools are what give the agent the ability to act in the world. A step may
//! request a batch of [`ToolCall`]s; executing them yields one
//! [`ToolExecution`] per call, collected in request order into
//! [`ToolExecutions`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ToolError;
use crate::message::Message;
use crate::provider::ToolDefinition;
use crate::state::AgentState;

/// A request to execute a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the LLM's tool_call.id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a JSON value
    #[serde(default)]
    pub arguments: serde_json::Value,
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// What a single tool invocation produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success(serde_json::Value),
    Failure(ToolError),
}

impl ToolOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn error(&self) -> Option<&ToolError> {
        match self {
            Self::Failure(err) => Some(err),
            Self::Success(_) => None,
        }
    }

    /// Text rendering used for tool-result messages.
    pub fn as_text(&self) -> String {
        match self {
            Self::Success(serde_json::Value::String(s)) => s.clone(),
            Self::Success(value) => value.to_string(),
            Self::Failure(err) => format!("Error: {err}"),
        }
    }
}

/// One executed tool call with its result and timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolExecution {
    pub tool_call: ToolCall,
    pub result: ToolOutcome,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl ToolExecution {
    pub fn succeeded(&self) -> bool {
        self.result.is_success()
    }

    pub fn duration_ms(&self) -> u64 {
        self.completed_at
            .signed_duration_since(self.started_at)
            .num_milliseconds()
            .max(0) as u64
    }

    /// The tool-result message that feeds this execution back to the model.
    pub fn to_message(&self) -> Message {
        Message::tool_result(&self.tool_call.id, self.result.as_text())
    }
}

/// The ordered results of one tool-call batch.
///
/// Whether "the step has errors" is a property of the whole batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolExecutions(Vec<ToolExecution>);

impl ToolExecutions {
    pub fn new(executions: Vec<ToolExecution>) -> Self {
        Self(executions)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ToolExecution> {
        self.0.iter()
    }

    pub fn has_errors(&self) -> bool {
        self.0.iter().any(|e| !e.succeeded())
    }

    /// Failures in request order.
    pub fn errors(&self) -> Vec<&ToolError> {
        self.0.iter().filter_map(|e| e.result.error()).collect()
    }

    pub fn successes(&self) -> impl Iterator<Item = &ToolExecution> {
        self.0.iter().filter(|e| e.succeeded())
    }

    pub fn to_messages(&self) -> Vec<Message> {
        self.0.iter().map(ToolExecution::to_message).collect()
    }

    pub fn into_inner(self) -> Vec<ToolExecution> {
        self.0
    }
}

impl From<Vec<ToolExecution>> for ToolExecutions {
    fn from(executions: Vec<ToolExecution>) -> Self {
        Self(executions)
    }
}

impl<'a> IntoIterator for &'a ToolExecutions {
    type Item = &'a ToolExecution;
    type IntoIter = std::slice::Iter<'a, ToolExecution>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// The core Tool trait.
///
/// Tools are registered in a [`ToolRegistry`] and invoked by the tool
/// executor when a step requests them.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "calculator").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Invoke the tool with the given arguments.
    async fn invoke(&self, arguments: serde_json::Value) -> Result<serde_json::Value, ToolError>;

    /// Capability query: tools that read orchestrator state return themselves here.
    fn as_state_aware(&self) -> Option<&dyn StateAwareTool> {
        None
    }

    /// Names listed under `required` in the parameters schema.
    fn required_parameters(&self) -> Vec<String> {
        required_parameters(&self.parameters_schema())
    }

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A tool that needs to read the current orchestrator state when invoked.
#[async_trait]
pub trait StateAwareTool: Tool {
    async fn invoke_with_state(
        &self,
        arguments: serde_json::Value,
        state: &AgentState,
    ) -> Result<serde_json::Value, ToolError>;
}

/// Extract the `required` names from a JSON Schema object.
pub fn required_parameters(schema: &serde_json::Value) -> Vec<String> {
    schema
        .get("required")
        .and_then(|r| r.as_array())
        .map(|names| {
            names
                .iter()
                .filter_map(|n| n.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// A registry of available tools.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Builder-style registration.
    pub fn with(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// All tool definitions, sorted by name so requests are deterministic.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<_> = self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A simple test tool for unit tests.
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes back the input"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" }
                },
                "required": ["text"]
            })
        }
        async fn invoke(&self, arguments: serde_json::Value) -> Result<serde_json::Value, ToolError> {
            Ok(arguments["text"].clone())
        }
    }

    fn execution(result: ToolOutcome) -> ToolExecution {
        let now = Utc::now();
        ToolExecution {
            tool_call: ToolCall::new("call_1", "echo", serde_json::json!({"text": "hi"})),
            result,
            started_at: now,
            completed_at: now,
        }
    }

    #[test]
    fn registry_register_and_lookup() {
        let registry = ToolRegistry::new().with(Arc::new(EchoTool));
        assert!(registry.get("echo").is_some());
        assert!(registry.get("nonexistent").is_none());
        assert_eq!(registry.names(), vec!["echo"]);
    }

    #[test]
    fn registry_definitions() {
        let registry = ToolRegistry::new().with(Arc::new(EchoTool));
        let defs = registry.definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "echo");
    }

    #[test]
    fn required_parameters_from_schema() {
        assert_eq!(EchoTool.required_parameters(), vec!["text".to_string()]);
        assert!(required_parameters(&serde_json::json!({"type": "object"})).is_empty());
    }

    #[test]
    fn plain_tools_are_not_state_aware() {
        assert!(EchoTool.as_state_aware().is_none());
    }

    #[test]
    fn batch_errors_come_from_the_collection() {
        let batch = ToolExecutions::new(vec![
            execution(ToolOutcome::Success(serde_json::json!("hi"))),
            execution(ToolOutcome::Failure(ToolError::NotFound("nope".into()))),
        ]);
        assert!(batch.has_errors());
        assert_eq!(batch.errors().len(), 1);
        assert_eq!(batch.successes().count(), 1);

        let clean = ToolExecutions::new(vec![execution(ToolOutcome::Success(
            serde_json::json!(1),
        ))]);
        assert!(!clean.has_errors());
    }

    #[test]
    fn outcome_text_rendering() {
        assert_eq!(ToolOutcome::Success(serde_json::json!("plain")).as_text(), "plain");
        assert_eq!(ToolOutcome::Success(serde_json::json!({"a": 1})).as_text(), r#"{"a":1}"#);
        let failure = ToolOutcome::Failure(ToolError::NotFound("x".into()));
        assert!(failure.as_text().starts_with("Error: Tool not found"));
    }

    #[test]
    fn execution_becomes_tool_message() {
        let msg = execution(ToolOutcome::Success(serde_json::json!("hi"))).to_message();
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(msg.content, "hi");
    }
}
