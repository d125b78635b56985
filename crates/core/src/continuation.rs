//! Continuation vocabulary — the decisions criteria vote with and the merged
//! outcome recorded next to every step.

use serde::{Deserialize, Serialize};

/// A single criterion's vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContinuationDecision {
    /// A hard limit was exceeded. Always wins.
    ForbidContinuation,
    /// Positive evidence that more work remains.
    AllowContinuation,
    /// Same priority as `AllowContinuation`.
    RequestContinuation,
    /// No objection to stopping; the neutral vote.
    AllowStop,
}

impl ContinuationDecision {
    /// Allow and Request are both "soft continue" signals.
    pub fn is_continue_signal(self) -> bool {
        matches!(self, Self::AllowContinuation | Self::RequestContinuation)
    }
}

/// Why a loop stopped, or `None` while it keeps going.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    #[default]
    None,
    StepsLimitReached,
    TokenLimitReached,
    TimeLimitReached,
    ErrorForbade,
    FinishReasonMatched,
    NoWorkRequested,
    Cancelled,
    Custom(String),
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::StepsLimitReached => write!(f, "steps_limit_reached"),
            Self::TokenLimitReached => write!(f, "token_limit_reached"),
            Self::TimeLimitReached => write!(f, "time_limit_reached"),
            Self::ErrorForbade => write!(f, "error_forbade"),
            Self::FinishReasonMatched => write!(f, "finish_reason_matched"),
            Self::NoWorkRequested => write!(f, "no_work_requested"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Custom(reason) => write!(f, "custom:{reason}"),
        }
    }
}

/// One criterion's recorded vote, kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriterionEvaluation {
    pub criterion: String,
    pub decision: ContinuationDecision,
    /// The reason this criterion would stop with; `None` for continue votes.
    #[serde(default)]
    pub reason: StopReason,
}

impl CriterionEvaluation {
    pub fn new(
        criterion: impl Into<String>,
        decision: ContinuationDecision,
        reason: StopReason,
    ) -> Self {
        Self {
            criterion: criterion.into(),
            decision,
            reason,
        }
    }
}

/// The merged verdict of all criteria for one state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinuationOutcome {
    pub should_continue: bool,
    #[serde(default)]
    pub stop_reason: StopReason,
    /// Which criterion produced the binding decision.
    #[serde(default)]
    pub resolved_by: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evaluations: Vec<CriterionEvaluation>,
    /// A captured criterion failure, if evaluation itself went wrong.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ContinuationOutcome {
    pub fn continuing(resolved_by: Option<String>) -> Self {
        Self {
            should_continue: true,
            stop_reason: StopReason::None,
            resolved_by,
            evaluations: Vec::new(),
            error: None,
        }
    }

    pub fn stopped(reason: StopReason, resolved_by: Option<String>) -> Self {
        Self {
            should_continue: false,
            stop_reason: reason,
            resolved_by,
            evaluations: Vec::new(),
            error: None,
        }
    }

    /// The fixed outcome used when evaluation itself failed.
    pub fn error_forbade(resolved_by: Option<String>, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::stopped(StopReason::ErrorForbade, resolved_by)
        }
    }

    pub fn with_evaluations(mut self, evaluations: Vec<CriterionEvaluation>) -> Self {
        self.evaluations = evaluations;
        self
    }

    /// The outcome recorded with a failed step: always a stop with
    /// `ErrorForbade`. The criteria's votes stay in `evaluations`; a policy
    /// that would have stopped anyway no longer claims the decision.
    pub fn into_failure(self) -> Self {
        let resolved_by = match self.stop_reason {
            StopReason::ErrorForbade => self.resolved_by,
            _ => None,
        };
        Self {
            should_continue: false,
            stop_reason: StopReason::ErrorForbade,
            resolved_by,
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn soft_continue_signals_are_equivalent() {
        assert!(ContinuationDecision::AllowContinuation.is_continue_signal());
        assert!(ContinuationDecision::RequestContinuation.is_continue_signal());
        assert!(!ContinuationDecision::AllowStop.is_continue_signal());
        assert!(!ContinuationDecision::ForbidContinuation.is_continue_signal());
    }

    #[test]
    fn outcome_snapshot_shape() {
        let outcome = ContinuationOutcome::stopped(
            StopReason::StepsLimitReached,
            Some("steps_limit".into()),
        );
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "shouldContinue": false,
                "stopReason": "steps_limit_reached",
                "resolvedBy": "steps_limit"
            })
        );
        let back: ContinuationOutcome = serde_json::from_value(json).unwrap();
        assert_eq!(back, outcome);
    }

    #[test]
    fn into_failure_always_reports_error_forbade() {
        let forced = ContinuationOutcome::continuing(Some("retry".into())).into_failure();
        assert!(!forced.should_continue);
        assert_eq!(forced.stop_reason, StopReason::ErrorForbade);
        assert_eq!(forced.resolved_by, None);

        let votes = vec![CriterionEvaluation::new(
            "steps_limit",
            ContinuationDecision::ForbidContinuation,
            StopReason::StepsLimitReached,
        )];
        let policy = ContinuationOutcome::stopped(StopReason::StepsLimitReached, Some("steps_limit".into()))
            .with_evaluations(votes.clone())
            .into_failure();
        assert_eq!(policy.stop_reason, StopReason::ErrorForbade);
        assert_eq!(policy.resolved_by, None);
        assert_eq!(policy.evaluations, votes);

        let isolated = ContinuationOutcome::error_forbade(Some("custom".into()), "boom").into_failure();
        assert_eq!(isolated.resolved_by.as_deref(), Some("custom"));
        assert_eq!(isolated.error.as_deref(), Some("boom"));
    }

    #[test]
    fn error_forbade_captures_message() {
        let outcome = ContinuationOutcome::error_forbade(Some("custom".into()), "criteria boom");
        assert!(!outcome.should_continue);
        assert_eq!(outcome.error.as_deref(), Some("criteria boom"));
    }
}
