//! A provider that replays canned responses.
//!
//! Used for offline runs (`stepwise run --script`) and tests. Every request
//! is recorded so callers can inspect what the loop sent.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

use stepwise_core::error::ProviderError;
use stepwise_core::message::Message;
use stepwise_core::provider::{Provider, ProviderRequest, ProviderResponse};
use stepwise_core::step::FinishReason;
use stepwise_core::tool::ToolCall;
use stepwise_core::usage::Usage;

/// One scripted reply in the JSON script format.
///
/// ```json
/// [
///   {"content": "Let me check", "tool_calls": [{"id": "c1", "name": "current_time", "arguments": {}}],
///    "usage": {"input": 12, "output": 4}},
///   {"content": "It is noon."}
/// ]
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptEntry {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub usage: Usage,
    /// Defaults to `tool_calls` when calls are present, otherwise `stop`.
    #[serde(default)]
    pub finish_reason: Option<FinishReason>,
}

impl From<ScriptEntry> for ProviderResponse {
    fn from(entry: ScriptEntry) -> Self {
        let finish_reason = entry.finish_reason.unwrap_or(if entry.tool_calls.is_empty() {
            FinishReason::Stop
        } else {
            FinishReason::ToolCalls
        });
        ProviderResponse {
            message: Message::assistant(entry.content).with_tool_calls(entry.tool_calls),
            usage: entry.usage,
            finish_reason,
            model: "scripted".into(),
        }
    }
}

pub struct ScriptedProvider {
    responses: Mutex<VecDeque<ProviderResponse>>,
    requests: Mutex<Vec<ProviderRequest>>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<ProviderResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Parse a JSON array of [`ScriptEntry`] values.
    pub fn from_json(script: &str) -> Result<Self, serde_json::Error> {
        let entries: Vec<ScriptEntry> = serde_json::from_str(script)?;
        Ok(Self::new(entries.into_iter().map(Into::into).collect()))
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests received so far, oldest first.
    pub async fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().await.clone()
    }

    pub async fn remaining(&self) -> usize {
        self.responses.lock().await.len()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let calls = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.requests.lock().await.push(request);
        self.responses
            .lock()
            .await
            .pop_front()
            .ok_or(ProviderError::Exhausted { calls })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_in_order_then_exhausts() {
        let provider = ScriptedProvider::new(vec![
            ProviderResponse::text("one", Usage::new(1, 1)),
            ProviderResponse::text("two", Usage::new(1, 1)),
        ]);
        let request = || ProviderRequest::new("m", vec![Message::user("hi")]);

        assert_eq!(provider.complete(request()).await.unwrap().message.content, "one");
        assert_eq!(provider.complete(request()).await.unwrap().message.content, "two");
        let err = provider.complete(request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Exhausted { calls: 3 }));
        assert_eq!(provider.call_count(), 3);
        assert_eq!(provider.requests().await.len(), 3);
    }

    #[tokio::test]
    async fn parses_json_script() {
        let provider = ScriptedProvider::from_json(
            r#"[
                {"content": "checking", "tool_calls": [{"id": "c1", "name": "calculator", "arguments": {"expression": "1+1"}}],
                 "usage": {"input": 10, "output": 3}},
                {"content": "done", "finish_reason": "length"}
            ]"#,
        )
        .unwrap();
        assert_eq!(provider.remaining().await, 2);

        let request = ProviderRequest::new("m", vec![]);
        let first = provider.complete(request.clone()).await.unwrap();
        assert_eq!(first.finish_reason, FinishReason::ToolCalls);
        assert_eq!(first.message.tool_calls[0].name, "calculator");
        assert_eq!(first.usage, Usage::new(10, 3));

        let second = provider.complete(request).await.unwrap();
        assert_eq!(second.finish_reason, FinishReason::Length);
    }
}
