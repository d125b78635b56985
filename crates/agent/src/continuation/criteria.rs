//! Built-in continuation criteria.
//!
//! Guards (limits, finish reasons, cancellation) vote `AllowStop` while
//! within bounds and `ForbidContinuation` once tripped. Work signals
//! ([`ToolCallPresenceCheck`], a retrying [`ErrorPolicy`]) are what actually
//! keep a loop going.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use stepwise_config::{ErrorPolicyKind, ErrorsConfig};
use stepwise_core::continuation::{ContinuationDecision, StopReason};
use stepwise_core::error::ContinuationError;
use stepwise_core::state::AgentState;
use stepwise_core::step::{ErrorKind, FinishReason};

use super::ContinuationCriterion;

type Vote = Result<ContinuationDecision, ContinuationError>;

fn guard(exceeded: bool) -> Vote {
    Ok(if exceeded {
        ContinuationDecision::ForbidContinuation
    } else {
        ContinuationDecision::AllowStop
    })
}

// ── Limits ───────────────────────────────────────────────────────────────

/// Stop once `max_steps` steps have been recorded.
#[derive(Debug, Clone, Copy)]
pub struct StepsLimit {
    pub max_steps: usize,
}

impl StepsLimit {
    pub fn new(max_steps: usize) -> Self {
        Self { max_steps }
    }
}

impl ContinuationCriterion for StepsLimit {
    fn name(&self) -> &str {
        "steps_limit"
    }

    fn evaluate(&self, state: &AgentState) -> Vote {
        guard(state.step_count() >= self.max_steps)
    }

    fn stop_reason(&self) -> StopReason {
        StopReason::StepsLimitReached
    }
}

/// Stop once total accumulated tokens reach `max_tokens`.
#[derive(Debug, Clone, Copy)]
pub struct TokenUsageLimit {
    pub max_tokens: u64,
}

impl TokenUsageLimit {
    pub fn new(max_tokens: u64) -> Self {
        Self { max_tokens }
    }
}

impl ContinuationCriterion for TokenUsageLimit {
    fn name(&self) -> &str {
        "token_usage_limit"
    }

    fn evaluate(&self, state: &AgentState) -> Vote {
        guard(state.usage().total() >= self.max_tokens)
    }

    fn stop_reason(&self) -> StopReason {
        StopReason::TokenLimitReached
    }
}

/// What a wall-clock limit measures from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeBasis {
    /// Since the current execution started; reset when a state is resumed.
    Execution,
    /// Since the state was first created, across resumed executions.
    Session,
}

/// Stop once wall-clock time since the chosen start point reaches `limit`.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionTimeLimit {
    pub limit: Duration,
    pub basis: TimeBasis,
}

impl ExecutionTimeLimit {
    pub fn new(limit: Duration, basis: TimeBasis) -> Self {
        Self { limit, basis }
    }

    fn elapsed(&self, state: &AgentState) -> Duration {
        let start = match self.basis {
            TimeBasis::Execution => state.execution_started_at(),
            TimeBasis::Session => Some(state.created_at()),
        };
        start
            .and_then(|at| Utc::now().signed_duration_since(at).to_std().ok())
            .unwrap_or_default()
    }
}

impl ContinuationCriterion for ExecutionTimeLimit {
    fn name(&self) -> &str {
        match self.basis {
            TimeBasis::Execution => "execution_time_limit",
            TimeBasis::Session => "session_time_limit",
        }
    }

    fn evaluate(&self, state: &AgentState) -> Vote {
        guard(self.elapsed(state) >= self.limit)
    }

    fn stop_reason(&self) -> StopReason {
        StopReason::TimeLimitReached
    }
}

/// Stop once time spent inside steps, summed over every execution of the
/// state, reaches `limit`.
#[derive(Debug, Clone, Copy)]
pub struct CumulativeTimeLimit {
    pub limit: Duration,
}

impl CumulativeTimeLimit {
    pub fn new(limit: Duration) -> Self {
        Self { limit }
    }
}

impl ContinuationCriterion for CumulativeTimeLimit {
    fn name(&self) -> &str {
        "cumulative_time_limit"
    }

    fn evaluate(&self, state: &AgentState) -> Vote {
        guard(state.cumulative_execution() >= self.limit)
    }

    fn stop_reason(&self) -> StopReason {
        StopReason::TimeLimitReached
    }
}

// ── Signals from the last step ───────────────────────────────────────────

/// Stop when the last step finished for one of the listed reasons.
#[derive(Debug, Clone)]
pub struct FinishReasonCheck {
    reasons: HashSet<FinishReason>,
}

impl FinishReasonCheck {
    pub fn new(reasons: impl IntoIterator<Item = FinishReason>) -> Self {
        Self {
            reasons: reasons.into_iter().collect(),
        }
    }
}

impl ContinuationCriterion for FinishReasonCheck {
    fn name(&self) -> &str {
        "finish_reason"
    }

    fn evaluate(&self, state: &AgentState) -> Vote {
        let matched = state
            .current_step()
            .is_some_and(|step| self.reasons.contains(step.finish_reason()));
        guard(matched)
    }

    fn stop_reason(&self) -> StopReason {
        StopReason::FinishReasonMatched
    }
}

/// Cooperative cancellation. Clones share one flag, so a caller keeps a
/// clone and calls [`cancel`](Self::cancel) from anywhere.
#[derive(Debug, Clone, Default)]
pub struct CancellationCheck {
    flag: Arc<AtomicBool>,
}

impl CancellationCheck {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

impl ContinuationCriterion for CancellationCheck {
    fn name(&self) -> &str {
        "cancellation"
    }

    fn evaluate(&self, _state: &AgentState) -> Vote {
        guard(self.is_cancelled())
    }

    fn stop_reason(&self) -> StopReason {
        StopReason::Cancelled
    }
}

/// Requests continuation while the model keeps asking for tools.
#[derive(Debug, Clone, Copy, Default)]
pub struct ToolCallPresenceCheck;

impl ContinuationCriterion for ToolCallPresenceCheck {
    fn name(&self) -> &str {
        "tool_call_presence"
    }

    fn evaluate(&self, state: &AgentState) -> Vote {
        Ok(match state.current_step() {
            Some(step) if step.has_tool_calls() => ContinuationDecision::RequestContinuation,
            _ => ContinuationDecision::AllowStop,
        })
    }

    fn stop_reason(&self) -> StopReason {
        StopReason::NoWorkRequested
    }
}

// ── Error policy ─────────────────────────────────────────────────────────

/// How errors on the last step affect continuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// Any error stops the loop.
    #[default]
    StopOnAnyError,
    /// Keep going while at most `max_retries` consecutive steps had errors.
    RetryToolErrors { max_retries: usize },
    /// Tool and validation errors are fed back to the model; anything else stops.
    IgnoreToolErrors,
}

impl ErrorPolicy {
    pub fn from_config(config: &ErrorsConfig) -> Self {
        match config.policy {
            ErrorPolicyKind::StopOnAnyError => Self::StopOnAnyError,
            ErrorPolicyKind::RetryToolErrors => Self::RetryToolErrors {
                max_retries: config.max_retries,
            },
            ErrorPolicyKind::IgnoreToolErrors => Self::IgnoreToolErrors,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorPolicyCriterion {
    pub policy: ErrorPolicy,
}

impl ErrorPolicyCriterion {
    pub fn new(policy: ErrorPolicy) -> Self {
        Self { policy }
    }
}

impl ContinuationCriterion for ErrorPolicyCriterion {
    fn name(&self) -> &str {
        "error_policy"
    }

    fn evaluate(&self, state: &AgentState) -> Vote {
        let Some(step) = state.current_step() else {
            return Ok(ContinuationDecision::AllowStop);
        };
        if !step.has_errors() {
            return Ok(ContinuationDecision::AllowStop);
        }

        match self.policy {
            ErrorPolicy::StopOnAnyError => guard(true),
            ErrorPolicy::RetryToolErrors { max_retries } => {
                if state.consecutive_error_steps() <= max_retries {
                    Ok(ContinuationDecision::AllowContinuation)
                } else {
                    guard(true)
                }
            }
            ErrorPolicy::IgnoreToolErrors => guard(
                step.errors()
                    .iter()
                    .any(|e| !matches!(e.kind, ErrorKind::Tool | ErrorKind::Validation)),
            ),
        }
    }

    fn stop_reason(&self) -> StopReason {
        StopReason::ErrorForbade
    }
}

// ── Custom ───────────────────────────────────────────────────────────────

type CriterionFn = dyn Fn(&AgentState) -> Vote + Send + Sync;

/// A criterion backed by a closure.
pub struct FnCriterion {
    name: String,
    reason: Option<StopReason>,
    f: Box<CriterionFn>,
}

impl FnCriterion {
    pub fn new(
        name: impl Into<String>,
        f: impl Fn(&AgentState) -> Vote + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            reason: None,
            f: Box::new(f),
        }
    }

    /// Reason reported on forbid; defaults to `Custom(name)`.
    pub fn with_stop_reason(mut self, reason: StopReason) -> Self {
        self.reason = Some(reason);
        self
    }
}

impl ContinuationCriterion for FnCriterion {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, state: &AgentState) -> Vote {
        (self.f)(state)
    }

    fn stop_reason(&self) -> StopReason {
        self.reason
            .clone()
            .unwrap_or_else(|| StopReason::Custom(self.name.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepwise_core::continuation::ContinuationOutcome;
    use stepwise_core::message::Message;
    use stepwise_core::step::{Step, StepError, StepResult};
    use stepwise_core::tool::ToolCall;
    use stepwise_core::usage::Usage;

    use ContinuationDecision::*;

    fn record(state: AgentState, step: Step) -> AgentState {
        let n = state.step_count() + 1;
        let now = Utc::now();
        state.with_recorded_step(StepResult::new(
            Arc::new(step),
            ContinuationOutcome::continuing(None),
            n,
            now,
            now,
        ))
    }

    fn tool_step() -> Step {
        Step::new(vec![Message::user("go")])
            .with_tool_calls(vec![ToolCall::new("c1", "clock", serde_json::json!({}))])
    }

    fn error_step(kind: ErrorKind) -> Step {
        Step::new(vec![]).with_errors(vec![StepError::new(kind, "failed")])
    }

    #[test]
    fn steps_limit_forbids_at_limit() {
        let limit = StepsLimit::new(2);
        let state = record(AgentState::new(), Step::new(vec![]));
        assert_eq!(limit.evaluate(&state).unwrap(), AllowStop);
        let state = record(state, Step::new(vec![]));
        assert_eq!(limit.evaluate(&state).unwrap(), ForbidContinuation);
    }

    #[test]
    fn token_limit_uses_accumulated_usage() {
        let limit = TokenUsageLimit::new(30);
        let state = record(AgentState::new(), Step::new(vec![]).with_usage(Usage::new(10, 10)));
        assert_eq!(limit.evaluate(&state).unwrap(), AllowStop);
        let state = record(state, Step::new(vec![]).with_usage(Usage::new(5, 5)));
        assert_eq!(limit.evaluate(&state).unwrap(), ForbidContinuation);
    }

    #[test]
    fn execution_time_distinguishes_resumed_sessions() {
        let hour_ago = Utc::now() - chrono::Duration::hours(1);
        let state = AgentState::new()
            .with_created_at(hour_ago)
            .with_execution_started_at(Some(Utc::now()));

        let execution = ExecutionTimeLimit::new(Duration::from_secs(60), TimeBasis::Execution);
        let session = ExecutionTimeLimit::new(Duration::from_secs(60), TimeBasis::Session);
        assert_eq!(execution.evaluate(&state).unwrap(), AllowStop);
        assert_eq!(session.evaluate(&state).unwrap(), ForbidContinuation);

        let not_started = AgentState::new().with_created_at(hour_ago);
        assert_eq!(execution.evaluate(&not_started).unwrap(), AllowStop);
    }

    #[test]
    fn cumulative_time_survives_resume() {
        let limit = CumulativeTimeLimit::new(Duration::from_secs(2));
        let state = AgentState::new()
            .with_added_execution_time(Duration::from_millis(1500))
            .for_new_execution();
        assert_eq!(limit.evaluate(&state).unwrap(), AllowStop);
        let state = state.with_added_execution_time(Duration::from_millis(600));
        assert_eq!(limit.evaluate(&state).unwrap(), ForbidContinuation);
    }

    #[test]
    fn finish_reason_matches_last_step() {
        let check = FinishReasonCheck::new([FinishReason::Length]);
        assert_eq!(check.evaluate(&AgentState::new()).unwrap(), AllowStop);
        let state = record(
            AgentState::new(),
            Step::new(vec![]).with_finish_reason(FinishReason::Length),
        );
        assert_eq!(check.evaluate(&state).unwrap(), ForbidContinuation);
    }

    #[test]
    fn cancellation_is_shared_between_clones() {
        let check = CancellationCheck::new();
        let handle = check.clone();
        assert_eq!(check.evaluate(&AgentState::new()).unwrap(), AllowStop);
        handle.cancel();
        assert_eq!(check.evaluate(&AgentState::new()).unwrap(), ForbidContinuation);
        assert_eq!(check.stop_reason(), StopReason::Cancelled);
    }

    #[test]
    fn tool_calls_request_continuation() {
        let state = record(AgentState::new(), tool_step());
        assert_eq!(ToolCallPresenceCheck.evaluate(&state).unwrap(), RequestContinuation);
        let state = record(state, Step::new(vec![]));
        assert_eq!(ToolCallPresenceCheck.evaluate(&state).unwrap(), AllowStop);
    }

    #[test]
    fn stop_on_any_error() {
        let criterion = ErrorPolicyCriterion::new(ErrorPolicy::StopOnAnyError);
        let clean = record(AgentState::new(), Step::new(vec![]));
        assert_eq!(criterion.evaluate(&clean).unwrap(), AllowStop);
        let failed = record(clean, error_step(ErrorKind::Tool));
        assert_eq!(criterion.evaluate(&failed).unwrap(), ForbidContinuation);
    }

    #[test]
    fn retry_allows_up_to_max_consecutive_errors() {
        let criterion = ErrorPolicyCriterion::new(ErrorPolicy::RetryToolErrors { max_retries: 2 });
        let state = record(AgentState::new(), error_step(ErrorKind::Tool));
        assert_eq!(criterion.evaluate(&state).unwrap(), AllowContinuation);
        let state = record(state, error_step(ErrorKind::Tool));
        assert_eq!(criterion.evaluate(&state).unwrap(), AllowContinuation);
        let state = record(state, error_step(ErrorKind::Tool));
        assert_eq!(criterion.evaluate(&state).unwrap(), ForbidContinuation);
    }

    #[test]
    fn ignore_tool_errors_still_stops_on_driver_errors() {
        let criterion = ErrorPolicyCriterion::new(ErrorPolicy::IgnoreToolErrors);
        let state = record(AgentState::new(), error_step(ErrorKind::Validation));
        assert_eq!(criterion.evaluate(&state).unwrap(), AllowStop);
        let state = record(state, error_step(ErrorKind::Driver));
        assert_eq!(criterion.evaluate(&state).unwrap(), ForbidContinuation);
    }

    #[test]
    fn error_policy_from_config() {
        let config = ErrorsConfig {
            policy: ErrorPolicyKind::RetryToolErrors,
            max_retries: 4,
        };
        assert_eq!(
            ErrorPolicy::from_config(&config),
            ErrorPolicy::RetryToolErrors { max_retries: 4 }
        );
    }

    #[test]
    fn fn_criterion_custom_reason() {
        let criterion = FnCriterion::new("budget", |_| Ok(ForbidContinuation))
            .with_stop_reason(StopReason::TokenLimitReached);
        assert_eq!(criterion.stop_reason(), StopReason::TokenLimitReached);
        assert_eq!(
            FnCriterion::new("plain", |_| Ok(AllowStop)).stop_reason(),
            StopReason::Custom("plain".into())
        );
    }
}
