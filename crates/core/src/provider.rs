//! Provider trait — the abstraction over LLM backends.
//!
//! A Provider knows how to send a list of messages to a model and get one
//! response back. Concrete HTTP backends live outside this workspace; drivers
//! only depend on this trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::Message;
use crate::step::FinishReason;
use crate::usage::Usage;

/// Configuration for a provider request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use (e.g., "gpt-4o")
    pub model: String,

    /// The conversation messages
    pub messages: Vec<Message>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Available tools the model can call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
}

fn default_temperature() -> f32 {
    0.7
}

impl ProviderRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: default_temperature(),
            max_tokens: None,
            tools: Vec::new(),
        }
    }
}

/// A tool definition sent to the LLM so it knows what tools it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// A complete response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// The generated message (may carry tool calls)
    pub message: Message,

    #[serde(default)]
    pub usage: Usage,

    #[serde(default)]
    pub finish_reason: FinishReason,

    /// Which model actually responded (may differ from requested)
    #[serde(default)]
    pub model: String,
}

impl ProviderResponse {
    /// A plain text answer.
    pub fn text(content: impl Into<String>, usage: Usage) -> Self {
        Self {
            message: Message::assistant(content),
            usage,
            finish_reason: FinishReason::Stop,
            model: String::new(),
        }
    }

    /// An answer that requests tool calls.
    pub fn tool_calls(
        content: impl Into<String>,
        calls: Vec<crate::tool::ToolCall>,
        usage: Usage,
    ) -> Self {
        Self {
            message: Message::assistant(content).with_tool_calls(calls),
            usage,
            finish_reason: FinishReason::ToolCalls,
            model: String::new(),
        }
    }
}

/// The core Provider trait.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider.
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError>;
}
