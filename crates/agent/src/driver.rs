//! Step drivers — the collaborators that produce a raw step.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use stepwise_config::ModelConfig;
use stepwise_core::error::DriverError;
use stepwise_core::provider::{Provider, ProviderRequest};
use stepwise_core::state::AgentState;
use stepwise_core::step::{Step, StepError};
use stepwise_core::tool::{ToolExecutions, ToolRegistry};

use crate::executor::ToolExecutor;
use crate::processors::with_cached_context;

/// Produces one raw step from the current state.
///
/// Any error is turned into a recorded failure step by the loop.
#[async_trait]
pub trait StepDriver: Send + Sync {
    async fn produce_step(
        &self,
        state: &AgentState,
        tools: &ToolRegistry,
        executor: &ToolExecutor,
    ) -> Result<Step, DriverError>;
}

/// The messages a driver sends for `state`: cached context first, then the
/// working history.
pub fn request_messages(state: &AgentState) -> Vec<stepwise_core::message::Message> {
    with_cached_context(state.messages(), state.cached_context())
}

/// Calls a model, then runs whatever tools it requested.
pub struct ToolCallingDriver {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
}

impl ToolCallingDriver {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
        }
    }

    pub fn from_config(provider: Arc<dyn Provider>, config: &ModelConfig) -> Self {
        let driver = Self::new(provider, config.model.clone()).with_temperature(config.temperature);
        match config.max_tokens {
            Some(max) => driver.with_max_tokens(max),
            None => driver,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }
}

#[async_trait]
impl StepDriver for ToolCallingDriver {
    async fn produce_step(
        &self,
        state: &AgentState,
        tools: &ToolRegistry,
        executor: &ToolExecutor,
    ) -> Result<Step, DriverError> {
        let input = request_messages(state);
        let mut request = ProviderRequest::new(self.model.clone(), input.clone());
        request.temperature = self.temperature;
        request.max_tokens = self.max_tokens;
        request.tools = tools.definitions();

        let response = self.provider.complete(request).await?;
        let calls = response.message.tool_calls.clone();

        let (executions, raised) = if calls.is_empty() {
            (ToolExecutions::default(), None)
        } else {
            debug!(provider = self.provider.name(), tool_count = calls.len(), "Model requested tools");
            match executor.execute(&calls, tools, state).await {
                Ok(executions) => (executions, None),
                Err(batch) => (batch.executions, Some(batch.error)),
            }
        };

        let errors: Vec<StepError> = executions.errors().into_iter().map(StepError::from).collect();
        let mut output = vec![response.message];
        output.extend(executions.to_messages());

        let step = Step::new(input)
            .with_output_messages(output)
            .with_tool_calls(calls)
            .with_tool_executions(executions)
            .with_errors(errors)
            .with_usage(response.usage)
            .with_finish_reason(response.finish_reason);

        match raised {
            Some(source) => Err(DriverError::ToolBatch {
                step: Box::new(step),
                source,
            }),
            None => Ok(step),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::test_helpers::{SumTool, make_tool_call};
    use crate::scripted::ScriptedProvider;
    use stepwise_core::error::ToolError;
    use stepwise_core::message::{Message, Role};
    use stepwise_core::provider::ProviderResponse;
    use stepwise_core::state::CachedContext;
    use stepwise_core::step::{ErrorKind, FinishReason, StepType};
    use stepwise_core::usage::Usage;

    fn tools() -> ToolRegistry {
        ToolRegistry::new().with(Arc::new(SumTool))
    }

    #[tokio::test]
    async fn tool_results_become_output_messages() {
        let provider = Arc::new(ScriptedProvider::new(vec![ProviderResponse::tool_calls(
            "adding",
            vec![make_tool_call("sum", serde_json::json!({"a": 2, "b": 3}))],
            Usage::new(10, 5),
        )]));
        let driver = ToolCallingDriver::new(provider.clone(), "mock-model");
        let state = AgentState::new()
            .with_cached_context(CachedContext::system_prompt("be exact"))
            .with_message(Message::user("2+3?"));

        let step = driver
            .produce_step(&state, &tools(), &ToolExecutor::new())
            .await
            .unwrap();

        assert_eq!(step.step_type(), StepType::ToolExecution);
        assert_eq!(step.usage(), Usage::new(10, 5));
        assert_eq!(step.finish_reason(), &FinishReason::ToolCalls);
        assert_eq!(step.input_messages().len(), 2);
        assert_eq!(step.output_messages().len(), 2);
        assert_eq!(step.output_messages()[1].role, Role::Tool);
        assert_eq!(step.output_messages()[1].content, "5.0");

        let request = &provider.requests().await[0];
        assert_eq!(request.messages[0].content, "be exact");
        assert_eq!(request.tools.len(), 1);
    }

    #[tokio::test]
    async fn tool_failures_fold_into_step_errors() {
        let provider = Arc::new(ScriptedProvider::new(vec![ProviderResponse::tool_calls(
            "",
            vec![make_tool_call("sum", serde_json::json!({"a": 2}))],
            Usage::default(),
        )]));
        let driver = ToolCallingDriver::new(provider, "mock-model");

        let step = driver
            .produce_step(&AgentState::new(), &tools(), &ToolExecutor::new())
            .await
            .unwrap();

        assert_eq!(step.errors().len(), 1);
        assert_eq!(step.errors()[0].kind, ErrorKind::Validation);
        assert!(step.error_text().contains('b'));
    }

    #[tokio::test]
    async fn provider_errors_propagate() {
        let driver = ToolCallingDriver::new(Arc::new(ScriptedProvider::new(vec![])), "mock-model");
        let err = driver
            .produce_step(&AgentState::new(), &tools(), &ToolExecutor::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Provider(_)));
    }

    #[tokio::test]
    async fn throw_on_failure_surfaces_as_driver_error() {
        let provider = Arc::new(ScriptedProvider::new(vec![ProviderResponse::tool_calls(
            "",
            vec![make_tool_call("nope", serde_json::json!({}))],
            Usage::new(7, 3),
        )]));
        let driver = ToolCallingDriver::new(provider, "mock-model");
        let err = driver
            .produce_step(
                &AgentState::new(),
                &tools(),
                &ToolExecutor::new().with_throw_on_failure(true),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::ToolBatch { source: ToolError::NotFound(_), .. }));

        // The model call and the executed batch travel with the error.
        let partial = err.partial_step().unwrap();
        assert_eq!(partial.usage(), Usage::new(7, 3));
        assert_eq!(partial.tool_executions().len(), 1);
        assert_eq!(partial.step_type(), StepType::Error);
    }
}
