//! Orchestrators — concrete loops built on the shared [`StepLoop`].
//!
//! 1. **ToolUse** — a plain tool-calling loop
//! 2. **Agent** — an autonomous agent configured from a [`LoopConfig`](stepwise_config::LoopConfig)
//! 3. **Chat** — several participants taking turns
//!
//! All three differ only in driver, criteria and processors; stepping,
//! continuation and failure handling are the loop's.

pub mod autonomous;
pub mod chat;
pub mod tool_use;

use async_trait::async_trait;

use stepwise_core::state::AgentState;

use crate::loop_runner::StepLoop;

pub use autonomous::Agent;
pub use chat::{
    Chat, ChatDriver, ChatTurnCheck, LlmParticipant, Participant, ParticipantSelector, RoundRobin,
    ScriptedParticipant,
};
pub use tool_use::ToolUse;

/// The stepping surface every orchestrator exposes.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    fn step_loop(&self) -> &StepLoop;

    /// A fresh state seeded for this orchestrator.
    fn start_state(&self) -> AgentState;

    fn has_next_step(&self, state: &AgentState) -> bool {
        self.step_loop().has_next_step(state)
    }

    async fn next_step(&self, state: AgentState) -> AgentState {
        self.step_loop().next_step(state).await
    }

    async fn final_step(&self, state: AgentState) -> AgentState {
        self.step_loop().final_step(state).await
    }
}

#[cfg(test)]
pub(crate) mod test_helpers;
