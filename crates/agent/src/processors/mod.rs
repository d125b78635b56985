//! State processor pipeline — transformations applied after a step is recorded.
//!
//! Processors form a middleware chain: each receives the state and a
//! [`Next`] handle for the rest of the chain. A processor may transform the
//! state and call `next.run(state)`, or return early to short-circuit.
//! Processors whose [`can_process`](StateProcessor::can_process) is false
//! are skipped.

mod builtin;
mod summarize;

use async_trait::async_trait;
use std::sync::Arc;

use stepwise_config::HistoryConfig;
use stepwise_core::provider::Provider;
use stepwise_core::state::AgentState;

pub use builtin::{
    AppendContextMetadata, AppendStepMessages, ApplyCachedContext, FnProcessor, TrimMessageHistory,
    with_cached_context,
};
pub use summarize::{ProviderSummarizer, SummarizeHistory, Summarizer};

#[async_trait]
pub trait StateProcessor: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this processor applies to `state`.
    fn can_process(&self, _state: &AgentState) -> bool {
        true
    }

    async fn process(&self, state: AgentState, next: Next<'_>) -> AgentState;
}

/// The remainder of a processor chain.
pub struct Next<'a> {
    remaining: &'a [Arc<dyn StateProcessor>],
}

impl<'a> Next<'a> {
    /// Hand `state` to the next applicable processor, or return it when the
    /// chain is exhausted.
    pub async fn run(self, state: AgentState) -> AgentState {
        let mut remaining = self.remaining;
        while let Some((head, tail)) = remaining.split_first() {
            if head.can_process(&state) {
                return head.process(state, Next { remaining: tail }).await;
            }
            remaining = tail;
        }
        state
    }
}

/// An ordered processor chain.
#[derive(Clone, Default)]
pub struct ProcessorPipeline {
    processors: Vec<Arc<dyn StateProcessor>>,
}

impl ProcessorPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached context → context metadata → step messages.
    pub fn default_pipeline() -> Self {
        Self::new()
            .with(ApplyCachedContext)
            .with(AppendContextMetadata)
            .with(AppendStepMessages)
    }

    /// The default pipeline plus history management from config.
    ///
    /// Summarisation needs a provider; without one the summarise setting is
    /// ignored.
    pub fn from_history_config(config: &HistoryConfig, summarizer: Option<(Arc<dyn Provider>, String)>) -> Self {
        let mut pipeline = Self::default_pipeline();
        if config.summarize_above_tokens > 0 {
            if let Some((provider, model)) = summarizer {
                pipeline = pipeline.with(SummarizeHistory::new(
                    config.summarize_above_tokens,
                    config.keep_recent,
                    Arc::new(ProviderSummarizer::new(provider, model)),
                ));
            }
        }
        if config.max_messages > 0 {
            pipeline = pipeline.with(TrimMessageHistory::new(config.max_messages));
        }
        pipeline
    }

    /// Builder-style append.
    pub fn with(mut self, processor: impl StateProcessor + 'static) -> Self {
        self.push(Arc::new(processor));
        self
    }

    pub fn push(&mut self, processor: Arc<dyn StateProcessor>) {
        self.processors.push(processor);
    }

    pub fn names(&self) -> Vec<&str> {
        self.processors.iter().map(|p| p.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    pub async fn process(&self, state: AgentState) -> AgentState {
        Next {
            remaining: &self.processors,
        }
        .run(state)
        .await
    }
}

impl std::fmt::Debug for ProcessorPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorPipeline")
            .field("processors", &self.names())
            .finish()
    }
}
