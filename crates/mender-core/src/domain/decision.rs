//! Decision model: the workflow transition table.
//!
//! `Decider::decide` is a pure function from the persisted state to the next
//! action. Applying the action (persisting, dispatching a handler, scheduling
//! the next wake) is the engine's job.

use std::time::Duration;

use chrono::{DateTime, Utc};

use super::retry::RetryPolicy;
use super::state::{ErrorDetail, Progress, WorkflowState};
use super::step::{ActiveStep, Step};

/// The next action to take for a task.
#[derive(Debug, Clone, PartialEq)]
pub enum Action<S> {
    /// Dispatch `step` as attempt `attempt`.
    RunStep { step: S, attempt: u32 },

    /// Move a failed step to `Retry`. The run itself happens on a later tick,
    /// after `delay`.
    ScheduleRetry { step: S, attempt: u32, delay: Duration },

    /// Park the task at idle.
    GoIdle { clear_error: bool },

    /// Nothing to do (step still running, or nothing to start).
    Wait,

    /// A (step, progress) pair outside the table. Always recoverable.
    RaiseAnomaly(Anomaly<S>),
}

impl<S: Step> Action<S> {
    /// Short label for logs and decision records.
    pub fn label(&self) -> &'static str {
        match self {
            Action::RunStep { .. } => "run_step",
            Action::ScheduleRetry { .. } => "schedule_retry",
            Action::GoIdle { .. } => "go_idle",
            Action::Wait => "wait",
            Action::RaiseAnomaly(_) => "raise_anomaly",
        }
    }
}

/// State combinations that should not occur in normal operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anomaly<S> {
    /// `current_step == idle` with a non-idle progress.
    IdleWithProgress(Progress),

    /// A step was selected but never marked running. `exhausted` when the
    /// stored attempt already used up the retry budget.
    StepNeverStarted { step: S, attempt: u32, exhausted: bool },
}

impl<S: Step> Anomaly<S> {
    pub fn describe(&self) -> String {
        match self {
            Anomaly::IdleWithProgress(progress) => {
                format!("anomaly: idle task carried progress={progress:?}; forced back to idle")
            }
            Anomaly::StepNeverStarted {
                step,
                attempt,
                exhausted: false,
            } => format!(
                "anomaly: step {step} was selected but never marked running (attempt={attempt}); scheduled for retry"
            ),
            Anomaly::StepNeverStarted {
                step,
                attempt,
                exhausted: true,
            } => format!(
                "anomaly: step {step} was selected but never marked running (attempt={attempt}) and exhausted its retry budget"
            ),
        }
    }

    /// Force the state back into a known-good shape.
    pub fn recover(&self, state: &mut WorkflowState<S>, now: DateTime<Utc>) {
        match *self {
            Anomaly::IdleWithProgress(_) => {
                state.go_idle(true, now);
            }
            Anomaly::StepNeverStarted {
                step,
                exhausted: false,
                ..
            } => {
                // attempt はそのまま。0 なら次の tick で attempt 1 として走る
                state.progress = Progress::Retry;
                state.error_detail = Some(ErrorDetail::new(self.describe(), step, now));
                state.updated_at = now;
            }
            Anomaly::StepNeverStarted {
                step,
                exhausted: true,
                ..
            } => {
                state.go_idle(false, now);
                state.error_detail = Some(ErrorDetail::new(self.describe(), step, now));
            }
        }
    }
}

/// Transition table over `(current_step, progress)`.
///
/// First match wins; the match is exhaustive, so every combination has an arm.
#[derive(Debug, Clone)]
pub struct Decider {
    retry_policy: RetryPolicy,
}

impl Decider {
    pub fn new(retry_policy: RetryPolicy) -> Self {
        Self { retry_policy }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    pub fn decide<S: Step>(&self, state: &WorkflowState<S>) -> Action<S> {
        match (state.current_step, state.progress) {
            // start() だけが idle -> running の辺を作る
            (ActiveStep::Idle, Progress::Idle) => match S::first() {
                Some(first) if state.armed => Action::RunStep {
                    step: first,
                    attempt: 1,
                },
                _ => Action::Wait,
            },
            (ActiveStep::Idle, progress) => Action::RaiseAnomaly(Anomaly::IdleWithProgress(progress)),

            (ActiveStep::Step(step), Progress::Success) => match step.next() {
                Some(next) => Action::RunStep {
                    step: next,
                    attempt: 1,
                },
                None => Action::GoIdle { clear_error: true },
            },

            (ActiveStep::Step(step), Progress::Retry) => Action::RunStep {
                step,
                attempt: state.attempt.saturating_add(1),
            },

            (ActiveStep::Step(step), Progress::Failed)
                if !self.retry_policy.is_exhausted(state.attempt) =>
            {
                Action::ScheduleRetry {
                    step,
                    attempt: state.attempt,
                    delay: self.retry_policy.next_delay(state.attempt),
                }
            }
            (ActiveStep::Step(_), Progress::Failed) => Action::GoIdle { clear_error: false },

            (ActiveStep::Step(_), Progress::Running) => Action::Wait,

            (ActiveStep::Step(step), Progress::Idle) => {
                Action::RaiseAnomaly(Anomaly::StepNeverStarted {
                    step,
                    attempt: state.attempt,
                    exhausted: self.retry_policy.is_exhausted(state.attempt),
                })
            }
        }
    }
}

impl Default for Decider {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}
