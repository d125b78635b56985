//! The step execution loop.
//!
//! One call to [`StepLoop::next_step`] performs exactly one iteration:
//!
//! 1. mark the execution start (first call only)
//! 2. ask the driver for a raw step
//! 3. build a transition state with the raw step tentatively recorded
//! 4. resolve continuation against the transition state
//! 5. record `{step, outcome, timing}` onto the pre-transition state
//! 6. run the processor pipeline
//! 7. add the elapsed time to the state's cumulative execution time
//!
//! Nothing escapes `next_step`: driver and criterion errors are recorded as a
//! terminal failure step and the state is marked `Failed`.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use stepwise_core::continuation::ContinuationOutcome;
use stepwise_core::event::{AgentEvent, EventSink, noop_sink};
use stepwise_core::state::{AgentState, ExecutionStatus};
use stepwise_core::step::{Step, StepError, StepResult};
use stepwise_core::tool::ToolRegistry;

use crate::continuation::{ContinuationCriteria, ContinuationCriterion};
use crate::driver::StepDriver;
use crate::executor::ToolExecutor;
use crate::processors::{ProcessorPipeline, StateProcessor};

pub struct StepLoop {
    driver: Arc<dyn StepDriver>,
    tools: ToolRegistry,
    executor: ToolExecutor,
    criteria: ContinuationCriteria,
    processors: ProcessorPipeline,
    events: Arc<dyn EventSink>,
}

impl StepLoop {
    /// A loop with no tools, a default executor and the default pipeline.
    pub fn new(driver: Arc<dyn StepDriver>, criteria: ContinuationCriteria) -> Self {
        Self {
            driver,
            tools: ToolRegistry::new(),
            executor: ToolExecutor::new(),
            criteria,
            processors: ProcessorPipeline::default_pipeline(),
            events: noop_sink(),
        }
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    /// Replace the executor. Call before [`with_event_sink`](Self::with_event_sink)
    /// so the executor shares the loop's sink.
    pub fn with_executor(mut self, executor: ToolExecutor) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_processors(mut self, processors: ProcessorPipeline) -> Self {
        self.processors = processors;
        self
    }

    pub fn with_criterion(mut self, criterion: impl ContinuationCriterion + 'static) -> Self {
        self.criteria.push(Arc::new(criterion));
        self
    }

    pub fn with_processor(mut self, processor: impl StateProcessor + 'static) -> Self {
        self.processors.push(Arc::new(processor));
        self
    }

    /// Route loop and tool events to `events`.
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.executor = self.executor.with_event_sink(Arc::clone(&events));
        self.events = events;
        self
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn criteria(&self) -> &ContinuationCriteria {
        &self.criteria
    }

    pub fn processors(&self) -> &ProcessorPipeline {
        &self.processors
    }

    /// Whether another iteration is possible.
    ///
    /// Before the first step of an execution this runs the resolver's
    /// pre-check; afterwards it reads the outcome stored with the last step
    /// without re-evaluating anything.
    pub fn has_next_step(&self, state: &AgentState) -> bool {
        match state.last_step_result() {
            Some(last) if state.status() != ExecutionStatus::Ready => last.should_continue(),
            _ => self.criteria.can_continue(state),
        }
    }

    /// Only a change in step count counts as progress; status changes do not.
    pub fn is_state_changed(prior: &AgentState, next: &AgentState) -> bool {
        prior.step_count() != next.step_count()
    }

    /// Run until [`has_next_step`](Self::has_next_step) is false.
    pub async fn final_step(&self, mut state: AgentState) -> AgentState {
        while self.has_next_step(&state) {
            state = self.next_step(state).await;
        }
        state
    }

    /// Perform exactly one iteration.
    pub async fn next_step(&self, state: AgentState) -> AgentState {
        let clock = Instant::now();
        let started_at = Utc::now();

        let state = if state.execution_started_at().is_none() {
            self.events.dispatch(AgentEvent::ExecutionStarted {
                state_id: state.id().to_string(),
                timestamp: started_at,
            });
            state.with_execution_started(started_at)
        } else {
            state
        };
        let state = state.with_status(ExecutionStatus::InProgress);
        let step_number = state.step_count() + 1;

        debug!(state_id = %state.id(), step = step_number, "Starting step");
        self.events.dispatch(AgentEvent::StepStarted {
            state_id: state.id().to_string(),
            step_number,
            timestamp: started_at,
        });

        let step = match self
            .driver
            .produce_step(&state, &self.tools, &self.executor)
            .await
        {
            Ok(step) => Arc::new(step),
            Err(e) => {
                warn!(step = step_number, error = %e, "Driver failed to produce a step");
                // Keep whatever the driver finished before raising.
                let failed = match e.partial_step() {
                    Some(partial) => partial.clone(),
                    None => Step::failure(state.messages().to_vec(), StepError::from(&e)),
                };
                return self.fail(state, failed, e.to_string(), started_at, clock);
            }
        };

        let transition = state.clone().with_recorded_step(StepResult::new(
            Arc::clone(&step),
            ContinuationOutcome::continuing(None),
            step_number,
            started_at,
            Utc::now(),
        ));
        let outcome = match self.criteria.try_evaluate(&transition) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(step = step_number, criterion = %e.criterion, error = %e, "Continuation evaluation failed");
                let failed = Step::failure(state.messages().to_vec(), StepError::from(&e))
                    .with_usage(step.usage());
                return self.fail(state, failed, e.to_string(), started_at, clock);
            }
        };
        self.dispatch_evaluated(step_number, &outcome);

        let should_continue = outcome.should_continue;
        let stop_reason = outcome.stop_reason.clone();
        let result = StepResult::new(step, outcome, step_number, started_at, Utc::now());
        let status = if should_continue {
            ExecutionStatus::InProgress
        } else {
            ExecutionStatus::Completed
        };
        let recorded = state.with_recorded_step(result).with_status(status);

        let state = self
            .processors
            .process(recorded)
            .await
            .with_added_execution_time(clock.elapsed());

        self.dispatch_step_completed(&state);
        if should_continue {
            debug!(state_id = %state.id(), step = step_number, "Step complete, continuing");
        } else {
            info!(
                state_id = %state.id(),
                steps = state.step_count(),
                stop_reason = %stop_reason,
                tokens = state.usage().total(),
                "Execution completed"
            );
            self.events.dispatch(AgentEvent::ExecutionCompleted {
                state_id: state.id().to_string(),
                step_count: state.step_count(),
                stop_reason,
                usage: state.usage(),
            });
        }
        state
    }

    /// Record a terminal failure step. Never fails itself.
    fn fail(
        &self,
        state: AgentState,
        step: Step,
        message: String,
        started_at: DateTime<Utc>,
        clock: Instant,
    ) -> AgentState {
        let step_number = state.step_count() + 1;
        let step = Arc::new(step);
        let failed = state.with_status(ExecutionStatus::Failed);

        // Criteria see the failure step so retry policies can count it.
        let with_failure = failed.clone().with_recorded_step(StepResult::new(
            Arc::clone(&step),
            ContinuationOutcome::continuing(None),
            step_number,
            started_at,
            Utc::now(),
        ));
        let outcome = self.criteria.evaluate(&with_failure).into_failure();
        self.dispatch_evaluated(step_number, &outcome);

        let result = StepResult::new(step, outcome, step_number, started_at, Utc::now());
        let state = failed
            .with_recorded_step(result)
            .with_added_execution_time(clock.elapsed());

        self.dispatch_step_completed(&state);
        warn!(state_id = %state.id(), step = step_number, error = %message, "Execution failed");
        self.events.dispatch(AgentEvent::ExecutionFailed {
            state_id: state.id().to_string(),
            step_count: state.step_count(),
            error: message,
        });
        state
    }

    fn dispatch_evaluated(&self, step_number: usize, outcome: &ContinuationOutcome) {
        self.events.dispatch(AgentEvent::ContinuationEvaluated {
            step_number,
            should_continue: outcome.should_continue,
            stop_reason: outcome.stop_reason.clone(),
            resolved_by: outcome.resolved_by.clone(),
        });
    }

    fn dispatch_step_completed(&self, state: &AgentState) {
        if let Some(last) = state.last_step_result() {
            self.events.dispatch(AgentEvent::StepCompleted {
                state_id: state.id().to_string(),
                step_id: last.id().to_string(),
                step_number: last.step_number,
                has_errors: last.step.has_errors(),
                usage: last.step.usage(),
                duration_ms: last.duration_ms(),
            });
        }
        self.events.dispatch(AgentEvent::StateUpdated {
            state_id: state.id().to_string(),
            step_count: state.step_count(),
            usage: state.usage(),
        });
    }
}

impl std::fmt::Debug for StepLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepLoop")
            .field("tools", &self.tools)
            .field("executor", &self.executor)
            .field("criteria", &self.criteria)
            .field("processors", &self.processors)
            .finish()
    }
}
