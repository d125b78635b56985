//! History summarisation.
//!
//! Once the working history grows past a token threshold, older
//! conversational messages are folded into a single summary message
//! produced by a [`Summarizer`]. The most recent messages and pinned system
//! messages are kept verbatim.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use stepwise_core::error::ProviderError;
use stepwise_core::message::{Message, Role, estimated_tokens};
use stepwise_core::provider::{Provider, ProviderRequest};
use stepwise_core::state::AgentState;

use super::{Next, StateProcessor};

const SUMMARY_KEY: &str = "summary";

const SUMMARY_PROMPT: &str = "Summarize the following conversation excerpt. Keep facts, \
decisions, tool results and open questions. Reply with the summary only.";

/// Produces a summary of a slice of messages.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, messages: &[Message]) -> Result<String, ProviderError>;
}

/// Summarises by asking a model.
pub struct ProviderSummarizer {
    provider: Arc<dyn Provider>,
    model: String,
}

impl ProviderSummarizer {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => "system",
        Role::Tool => "tool",
    }
}

#[async_trait]
impl Summarizer for ProviderSummarizer {
    async fn summarize(&self, messages: &[Message]) -> Result<String, ProviderError> {
        let transcript = messages
            .iter()
            .map(|m| format!("{}: {}", m.name.as_deref().unwrap_or(role_label(m.role)), m.content))
            .collect::<Vec<_>>()
            .join("\n");

        let mut request = ProviderRequest::new(
            self.model.clone(),
            vec![Message::system(SUMMARY_PROMPT), Message::user(transcript)],
        );
        request.temperature = 0.2;

        let response = self.provider.complete(request).await?;
        Ok(response.message.content)
    }
}

fn is_summary(message: &Message) -> bool {
    message
        .metadata
        .get(SUMMARY_KEY)
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

/// Replaces older history with a summary above `threshold` estimated tokens.
pub struct SummarizeHistory {
    pub threshold: usize,
    pub keep_recent: usize,
    summarizer: Arc<dyn Summarizer>,
}

impl SummarizeHistory {
    pub fn new(threshold: usize, keep_recent: usize, summarizer: Arc<dyn Summarizer>) -> Self {
        Self {
            threshold,
            keep_recent,
            summarizer,
        }
    }
}

#[async_trait]
impl StateProcessor for SummarizeHistory {
    fn name(&self) -> &str {
        "summarize_history"
    }

    fn can_process(&self, state: &AgentState) -> bool {
        estimated_tokens(state.messages()) > self.threshold
    }

    async fn process(&self, state: AgentState, next: Next<'_>) -> AgentState {
        let (pinned, rest): (Vec<&Message>, Vec<&Message>) = state
            .messages()
            .iter()
            .partition(|m| m.is_system() && !is_summary(m));

        let mut split = rest.len().saturating_sub(self.keep_recent);
        // never open the kept window with a tool result
        while split > 0 && split < rest.len() && rest[split].role == Role::Tool {
            split -= 1;
        }
        if split == 0 {
            return next.run(state).await;
        }

        let older: Vec<Message> = rest[..split].iter().map(|m| (*m).clone()).collect();
        match self.summarizer.summarize(&older).await {
            Ok(text) => {
                let mut summary = Message::system(format!("Summary of earlier conversation:\n{text}"));
                summary
                    .metadata
                    .insert(SUMMARY_KEY.into(), serde_json::Value::Bool(true));

                let messages: Vec<Message> = pinned
                    .into_iter()
                    .cloned()
                    .chain(std::iter::once(summary))
                    .chain(rest[split..].iter().map(|m| (*m).clone()))
                    .collect();
                info!(
                    summarized = older.len(),
                    kept = messages.len(),
                    "Summarized message history"
                );
                next.run(state.with_messages(messages)).await
            }
            Err(e) => {
                warn!(error = %e, "History summarization failed, keeping full history");
                next.run(state).await
            }
        }
    }
}
