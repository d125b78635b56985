//! Chat — several participants taking turns on one shared history.
//!
//! Each step is one turn: the [`ChatDriver`] asks a [`ParticipantSelector`]
//! who speaks next and records that participant's reply. The conversation
//! ends after `max_turns` turns, or earlier when a reply contains the
//! configured stop phrase.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

use stepwise_core::continuation::{ContinuationDecision, StopReason};
use stepwise_core::error::{ContinuationError, DriverError, ProviderError};
use stepwise_core::event::EventSink;
use stepwise_core::message::Message;
use stepwise_core::provider::{Provider, ProviderRequest, ProviderResponse};
use stepwise_core::state::{AgentState, CachedContext};
use stepwise_core::step::{FinishReason, Step};
use stepwise_core::tool::ToolRegistry;
use stepwise_core::usage::Usage;

use crate::continuation::{
    ContinuationCriteria, ContinuationCriterion, FinishReasonCheck, StepsLimit,
};
use crate::driver::{StepDriver, request_messages};
use crate::executor::ToolExecutor;
use crate::loop_runner::StepLoop;

use super::Orchestrator;

/// Finish reason recorded when a turn contains the stop phrase.
pub const STOP_PHRASE_REASON: &str = "stop_phrase";

// ── Participants ─────────────────────────────────────────────────────────

#[async_trait]
pub trait Participant: Send + Sync {
    fn name(&self) -> &str;

    /// Reply to the conversation so far.
    async fn respond(&self, history: &[Message]) -> Result<ProviderResponse, ProviderError>;
}

/// A participant backed by a model, with an optional persona prompt.
pub struct LlmParticipant {
    name: String,
    provider: Arc<dyn Provider>,
    model: String,
    persona: Option<String>,
}

impl LlmParticipant {
    pub fn new(name: impl Into<String>, provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            provider,
            model: model.into(),
            persona: None,
        }
    }

    pub fn with_persona(mut self, persona: impl Into<String>) -> Self {
        self.persona = Some(persona.into());
        self
    }
}

#[async_trait]
impl Participant for LlmParticipant {
    fn name(&self) -> &str {
        &self.name
    }

    async fn respond(&self, history: &[Message]) -> Result<ProviderResponse, ProviderError> {
        let messages = self
            .persona
            .iter()
            .map(|p| Message::system(format!("You are {}. {p}", self.name)))
            .chain(history.iter().cloned())
            .collect();
        self.provider
            .complete(ProviderRequest::new(self.model.clone(), messages))
            .await
    }
}

/// Replays canned lines, one per turn.
pub struct ScriptedParticipant {
    name: String,
    lines: Vec<String>,
    cursor: AtomicUsize,
}

impl ScriptedParticipant {
    pub fn new(name: impl Into<String>, lines: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            lines: lines.into_iter().map(Into::into).collect(),
            cursor: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Participant for ScriptedParticipant {
    fn name(&self) -> &str {
        &self.name
    }

    async fn respond(&self, _history: &[Message]) -> Result<ProviderResponse, ProviderError> {
        let turn = self.cursor.fetch_add(1, Ordering::SeqCst);
        self.lines
            .get(turn)
            .map(|line| ProviderResponse::text(line.clone(), Usage::default()))
            .ok_or(ProviderError::Exhausted { calls: turn + 1 })
    }
}

// ── Turn order ───────────────────────────────────────────────────────────

pub trait ParticipantSelector: Send + Sync {
    /// Index of the next speaker among `count` participants.
    fn select(&self, state: &AgentState, count: usize) -> usize;
}

/// Participants speak in order, by step count.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoundRobin;

impl ParticipantSelector for RoundRobin {
    fn select(&self, state: &AgentState, count: usize) -> usize {
        state.step_count() % count.max(1)
    }
}

// ── Driver ───────────────────────────────────────────────────────────────

pub struct ChatDriver {
    participants: Vec<Arc<dyn Participant>>,
    selector: Arc<dyn ParticipantSelector>,
    stop_phrase: Option<String>,
}

impl ChatDriver {
    pub fn new(participants: Vec<Arc<dyn Participant>>) -> Self {
        Self {
            participants,
            selector: Arc::new(RoundRobin),
            stop_phrase: None,
        }
    }

    pub fn with_selector(mut self, selector: Arc<dyn ParticipantSelector>) -> Self {
        self.selector = selector;
        self
    }

    /// End the conversation when a reply contains `phrase`.
    pub fn with_stop_phrase(mut self, phrase: impl Into<String>) -> Self {
        self.stop_phrase = Some(phrase.into());
        self
    }

    pub fn participant_names(&self) -> Vec<&str> {
        self.participants.iter().map(|p| p.name()).collect()
    }
}

#[async_trait]
impl StepDriver for ChatDriver {
    async fn produce_step(
        &self,
        state: &AgentState,
        _tools: &ToolRegistry,
        _executor: &ToolExecutor,
    ) -> Result<Step, DriverError> {
        if self.participants.is_empty() {
            return Err(DriverError::other("chat has no participants"));
        }
        let index = self.selector.select(state, self.participants.len()) % self.participants.len();
        let speaker = &self.participants[index];
        debug!(speaker = speaker.name(), turn = state.step_count() + 1, "Chat turn");

        let input = request_messages(state);
        let response = speaker.respond(&input).await?;

        let said_stop = self
            .stop_phrase
            .as_deref()
            .is_some_and(|phrase| response.message.content.contains(phrase));
        let finish_reason = if said_stop {
            FinishReason::Other(STOP_PHRASE_REASON.into())
        } else {
            response.finish_reason
        };

        Ok(Step::new(input)
            .with_output_messages(vec![response.message.with_name(speaker.name())])
            .with_usage(response.usage)
            .with_finish_reason(finish_reason))
    }
}

// ── Criteria ─────────────────────────────────────────────────────────────

/// Requests another turn while fewer than `max_turns` have been taken.
#[derive(Debug, Clone, Copy)]
pub struct ChatTurnCheck {
    pub max_turns: usize,
}

impl ChatTurnCheck {
    pub fn new(max_turns: usize) -> Self {
        Self { max_turns }
    }
}

impl ContinuationCriterion for ChatTurnCheck {
    fn name(&self) -> &str {
        "chat_turns"
    }

    fn evaluate(&self, state: &AgentState) -> Result<ContinuationDecision, ContinuationError> {
        Ok(if state.step_count() < self.max_turns {
            ContinuationDecision::RequestContinuation
        } else {
            ContinuationDecision::AllowStop
        })
    }

    fn stop_reason(&self) -> StopReason {
        StopReason::NoWorkRequested
    }
}

// ── Orchestrator ─────────────────────────────────────────────────────────

pub struct Chat {
    step_loop: StepLoop,
    context: CachedContext,
}

impl Chat {
    pub fn new(driver: ChatDriver, max_turns: usize) -> Self {
        let criteria = ContinuationCriteria::new()
            .with(StepsLimit::new(max_turns))
            .with(FinishReasonCheck::new([FinishReason::Other(
                STOP_PHRASE_REASON.into(),
            )]))
            .with(ChatTurnCheck::new(max_turns));
        Self {
            step_loop: StepLoop::new(Arc::new(driver), criteria),
            context: CachedContext::default(),
        }
    }

    /// A topic or set of ground rules shown to every participant.
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.context = CachedContext::system_prompt(topic);
        self
    }

    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.step_loop = self.step_loop.with_event_sink(events);
        self
    }
}

impl Orchestrator for Chat {
    fn step_loop(&self) -> &StepLoop {
        &self.step_loop
    }

    fn start_state(&self) -> AgentState {
        AgentState::new().with_cached_context(self.context.clone())
    }
}
