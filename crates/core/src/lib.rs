//! # Stepwise Core
//!
//! Domain types and collaborator traits for the Stepwise step-execution engine.
//! This crate has no engine logic — it defines the value model that the
//! engine, tools and orchestrators are written against.
//!
//! ## Design Philosophy
//!
//! - Snapshots are immutable: every state/step transition returns a new value.
//! - Collaborators (providers, tools, event sinks) are traits; the engine
//!   never depends on a concrete backend.
//! - Derived facts (a step's type, whether a batch failed) are computed, not stored.

pub mod continuation;
pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod state;
pub mod step;
pub mod tool;
pub mod usage;

// Re-export key types at crate root for ergonomics
pub use continuation::{ContinuationDecision, ContinuationOutcome, CriterionEvaluation, StopReason};
pub use error::{ContinuationError, DriverError, ProviderError, ToolBatchError, ToolError};
pub use event::{AgentEvent, EventBus, EventSink, NoopEventSink, TracingEventSink};
pub use message::{Message, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, ToolDefinition};
pub use state::{AgentState, CachedContext, ExecutionStatus};
pub use step::{ErrorKind, FinishReason, Step, StepError, StepResult, StepType};
pub use tool::{StateAwareTool, Tool, ToolCall, ToolExecution, ToolExecutions, ToolOutcome, ToolRegistry};
pub use usage::Usage;
