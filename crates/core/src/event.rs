//! Execution events — fire-and-forget observations of the step loop.
//!
//! The loop and the tool executor dispatch [`AgentEvent`]s to an injected
//! [`EventSink`]. [`NoopEventSink`] is the default, so nothing in the engine
//! requires an event system to function.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::continuation::StopReason;
use crate::usage::Usage;

/// All execution events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    ExecutionStarted {
        state_id: String,
        timestamp: DateTime<Utc>,
    },

    StepStarted {
        state_id: String,
        step_number: usize,
        timestamp: DateTime<Utc>,
    },

    ToolCallStarted {
        call_id: String,
        tool_name: String,
        timestamp: DateTime<Utc>,
    },

    ToolCallCompleted {
        call_id: String,
        tool_name: String,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    },

    ContinuationEvaluated {
        step_number: usize,
        should_continue: bool,
        stop_reason: StopReason,
        resolved_by: Option<String>,
    },

    StepCompleted {
        state_id: String,
        step_id: String,
        step_number: usize,
        has_errors: bool,
        usage: Usage,
        duration_ms: u64,
    },

    StateUpdated {
        state_id: String,
        step_count: usize,
        usage: Usage,
    },

    ExecutionCompleted {
        state_id: String,
        step_count: usize,
        stop_reason: StopReason,
        usage: Usage,
    },

    ExecutionFailed {
        state_id: String,
        step_count: usize,
        error: String,
    },
}

impl AgentEvent {
    /// Short name used as a log field.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ExecutionStarted { .. } => "execution_started",
            Self::StepStarted { .. } => "step_started",
            Self::ToolCallStarted { .. } => "tool_call_started",
            Self::ToolCallCompleted { .. } => "tool_call_completed",
            Self::ContinuationEvaluated { .. } => "continuation_evaluated",
            Self::StepCompleted { .. } => "step_completed",
            Self::StateUpdated { .. } => "state_updated",
            Self::ExecutionCompleted { .. } => "execution_completed",
            Self::ExecutionFailed { .. } => "execution_failed",
        }
    }
}

/// Receives execution events. Implementations must not block.
pub trait EventSink: Send + Sync {
    fn dispatch(&self, event: AgentEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn dispatch(&self, _event: AgentEvent) {}
}

/// Forwards every event to `tracing` at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn dispatch(&self, event: AgentEvent) {
        match &event {
            AgentEvent::ExecutionFailed { error, .. } => {
                tracing::warn!(event = event.event_type(), error = %error, "execution event");
            }
            _ => tracing::debug!(event = event.event_type(), ?event, "execution event"),
        }
    }
}

/// A broadcast-based event bus.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<AgentEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: AgentEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<AgentEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventSink for EventBus {
    fn dispatch(&self, event: AgentEvent) {
        self.publish(event);
    }
}

/// The default sink used when none is injected.
pub fn noop_sink() -> Arc<dyn EventSink> {
    Arc::new(NoopEventSink)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.dispatch(AgentEvent::ToolCallStarted {
            call_id: "c1".into(),
            tool_name: "calculator".into(),
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            AgentEvent::ToolCallStarted { tool_name, .. } => assert_eq!(tool_name, "calculator"),
            other => panic!("Expected ToolCallStarted, got {other:?}"),
        }
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(AgentEvent::ExecutionFailed {
            state_id: "s".into(),
            step_count: 0,
            error: "no subscribers".into(),
        });
    }

    #[test]
    fn noop_sink_accepts_events() {
        noop_sink().dispatch(AgentEvent::ExecutionStarted {
            state_id: "s".into(),
            timestamp: Utc::now(),
        });
    }

    #[test]
    fn event_serialization_is_tagged() {
        let event = AgentEvent::StateUpdated {
            state_id: "s".into(),
            step_count: 2,
            usage: Usage::new(1, 1),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"state_updated""#));
        assert_eq!(event.event_type(), "state_updated");
    }
}
