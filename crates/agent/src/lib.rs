//! The step loop and everything that plugs into it.
//!
//! An execution advances one step at a time:
//!
//! 1. A [`StepDriver`] produces a raw step from the current state
//! 2. The [`ContinuationCriteria`] vote on the state that step would produce
//! 3. The step is recorded and the [`ProcessorPipeline`] transforms the state
//!
//! The loop runs until the criteria resolve to stop, or the step fails.
//! [`patterns`] holds the ready-made orchestrators built on [`StepLoop`].

pub mod continuation;
pub mod driver;
pub mod executor;
pub mod loop_runner;
pub mod patterns;
pub mod processors;
pub mod scripted;

pub use continuation::{ContinuationCriteria, ContinuationCriterion};
pub use driver::{StepDriver, ToolCallingDriver};
pub use executor::{ExecutionMode, ToolExecutor};
pub use loop_runner::StepLoop;
pub use patterns::{Agent, Chat, ChatDriver, Orchestrator, ToolUse};
pub use processors::{ProcessorPipeline, StateProcessor};
pub use scripted::{ScriptEntry, ScriptedProvider};
