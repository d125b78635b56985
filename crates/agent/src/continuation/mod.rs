//! Continuation resolution — should the loop take another step?
//!
//! A [`ContinuationCriteria`] holds an ordered list of independent
//! [`ContinuationCriterion`] policies. Every criterion votes on a state and the
//! votes are merged by a fixed, order-independent priority law:
//!
//! 1. any `ForbidContinuation` → stop with that criterion's reason,
//! 2. else any `AllowContinuation` / `RequestContinuation` → continue,
//! 3. else (all `AllowStop`) → stop with `NoWorkRequested`.
//!
//! List order only decides which criterion is reported in `resolved_by` when
//! several vote the same way.

pub mod criteria;

use std::sync::Arc;

use stepwise_config::LoopConfig;
use stepwise_core::continuation::{
    ContinuationDecision, ContinuationOutcome, CriterionEvaluation, StopReason,
};
use stepwise_core::error::ContinuationError;
use stepwise_core::state::AgentState;
use tracing::{debug, warn};

pub use criteria::{
    CancellationCheck, CumulativeTimeLimit, ErrorPolicy, ErrorPolicyCriterion,
    ExecutionTimeLimit, FinishReasonCheck, FnCriterion, StepsLimit, TimeBasis,
    TokenUsageLimit, ToolCallPresenceCheck,
};

/// A single continuation policy.
///
/// Criteria read only from the state they are given; they keep no history of
/// their own.
pub trait ContinuationCriterion: Send + Sync {
    /// Identifier reported in `resolved_by`.
    fn name(&self) -> &str;

    /// Vote on whether execution should continue after `state`.
    fn evaluate(&self, state: &AgentState) -> Result<ContinuationDecision, ContinuationError>;

    /// The stop reason reported when this criterion forbids continuation.
    fn stop_reason(&self) -> StopReason {
        StopReason::Custom(self.name().to_string())
    }
}

/// Merge a set of votes into one outcome.
pub fn resolve(evaluations: Vec<CriterionEvaluation>) -> ContinuationOutcome {
    let outcome = if let Some(forbid) = evaluations
        .iter()
        .find(|e| e.decision == ContinuationDecision::ForbidContinuation)
    {
        ContinuationOutcome::stopped(forbid.reason.clone(), Some(forbid.criterion.clone()))
    } else if let Some(signal) = evaluations.iter().find(|e| e.decision.is_continue_signal()) {
        ContinuationOutcome::continuing(Some(signal.criterion.clone()))
    } else {
        ContinuationOutcome::stopped(StopReason::NoWorkRequested, None)
    };
    outcome.with_evaluations(evaluations)
}

/// The continuation resolver.
#[derive(Clone, Default)]
pub struct ContinuationCriteria {
    criteria: Vec<Arc<dyn ContinuationCriterion>>,
}

impl ContinuationCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style append.
    pub fn with(mut self, criterion: impl ContinuationCriterion + 'static) -> Self {
        self.push(Arc::new(criterion));
        self
    }

    pub fn push(&mut self, criterion: Arc<dyn ContinuationCriterion>) {
        self.criteria.push(criterion);
    }

    pub fn len(&self) -> usize {
        self.criteria.len()
    }

    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }

    /// Criterion names in configured order.
    pub fn names(&self) -> Vec<&str> {
        self.criteria.iter().map(|c| c.name()).collect()
    }

    /// Evaluate every criterion and merge the votes.
    ///
    /// Fails with the first criterion error; callers that must never fail
    /// use [`evaluate`](Self::evaluate).
    pub fn try_evaluate(&self, state: &AgentState) -> Result<ContinuationOutcome, ContinuationError> {
        let evaluations = self.collect_votes(state)?;
        let outcome = resolve(evaluations);
        debug!(
            state_id = %state.id(),
            should_continue = outcome.should_continue,
            stop_reason = %outcome.stop_reason,
            resolved_by = ?outcome.resolved_by,
            "Continuation resolved"
        );
        Ok(outcome)
    }

    /// Evaluate without ever failing: a criterion error becomes a forced
    /// `ErrorForbade` stop carrying the error text.
    pub fn evaluate(&self, state: &AgentState) -> ContinuationOutcome {
        match self.try_evaluate(state) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(criterion = %e.criterion, error = %e, "Continuation criterion failed");
                ContinuationOutcome::error_forbade(Some(e.criterion.clone()), e.to_string())
            }
        }
    }

    /// Pre-check used before a step exists in the current execution.
    ///
    /// True unless some criterion forbids continuation (or fails). An
    /// all-`AllowStop` vote does not block the first step: there is no step
    /// yet that could have requested more work.
    pub fn can_continue(&self, state: &AgentState) -> bool {
        match self.collect_votes(state) {
            Ok(votes) => !votes
                .iter()
                .any(|v| v.decision == ContinuationDecision::ForbidContinuation),
            Err(e) => {
                warn!(criterion = %e.criterion, error = %e, "Continuation pre-check failed");
                false
            }
        }
    }

    fn collect_votes(&self, state: &AgentState) -> Result<Vec<CriterionEvaluation>, ContinuationError> {
        self.criteria
            .iter()
            .map(|criterion| {
                let decision = criterion.evaluate(state)?;
                let reason = if decision == ContinuationDecision::ForbidContinuation {
                    criterion.stop_reason()
                } else {
                    StopReason::None
                };
                Ok(CriterionEvaluation::new(criterion.name(), decision, reason))
            })
            .collect()
    }

    /// The default criteria list for a loop configuration.
    ///
    /// Limits set to zero are left out. Tool-call presence is always
    /// included so a model that keeps requesting tools keeps the loop alive.
    pub fn from_config(config: &LoopConfig, cancellation: Option<CancellationCheck>) -> Self {
        let limits = &config.limits;
        let mut criteria = Self::new().with(StepsLimit::new(limits.max_steps));

        if limits.max_tokens > 0 {
            criteria = criteria.with(TokenUsageLimit::new(limits.max_tokens));
        }
        if limits.max_execution_secs > 0 {
            criteria = criteria.with(ExecutionTimeLimit::new(
                std::time::Duration::from_secs(limits.max_execution_secs),
                TimeBasis::Execution,
            ));
        }
        if limits.max_session_secs > 0 {
            criteria = criteria.with(ExecutionTimeLimit::new(
                std::time::Duration::from_secs(limits.max_session_secs),
                TimeBasis::Session,
            ));
        }
        if limits.max_cumulative_secs > 0 {
            criteria = criteria.with(CumulativeTimeLimit::new(std::time::Duration::from_secs(
                limits.max_cumulative_secs,
            )));
        }
        if !config.finish_reasons.is_empty() {
            criteria = criteria.with(FinishReasonCheck::new(
                config.finish_reasons.iter().map(|r| r.as_str().into()),
            ));
        }
        if let Some(check) = cancellation {
            criteria = criteria.with(check);
        }

        criteria
            .with(ErrorPolicyCriterion::new(ErrorPolicy::from_config(&config.errors)))
            .with(ToolCallPresenceCheck)
    }
}

impl std::fmt::Debug for ContinuationCriteria {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContinuationCriteria")
            .field("criteria", &self.names())
            .finish()
    }
}
