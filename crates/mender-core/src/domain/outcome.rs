//! Step outcome and how it is recorded into the workflow state.

use chrono::{DateTime, Utc};

use super::errors::StepError;
use super::retry::RetryPolicy;
use super::state::{ErrorDetail, Progress, WorkflowState};
use super::step::Step;

/// Terminal result of one handler invocation.
#[derive(Debug, Clone)]
pub enum StepOutcome {
    Success,
    Failure(StepError),
}

impl From<Result<(), StepError>> for StepOutcome {
    fn from(result: Result<(), StepError>) -> Self {
        match result {
            Ok(()) => StepOutcome::Success,
            Err(err) => StepOutcome::Failure(err),
        }
    }
}

impl<S: Step> WorkflowState<S> {
    /// Record a successful attempt.
    ///
    /// `attempt` keeps the number the step succeeded on.
    pub fn record_success(&mut self, now: DateTime<Utc>) {
        self.progress = Progress::Success;
        self.error_detail = None;
        self.updated_at = now;
    }

    /// Record a failed attempt. `attempt` already holds the failed attempt's
    /// number and is not incremented here.
    ///
    /// Returns true when the failure is definitive (budget used up).
    /// `Decider` derives the same answer from the persisted state on the next tick.
    pub fn record_failure(
        &mut self,
        error: &StepError,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> bool {
        self.progress = Progress::Failed;
        if let Some(step) = self.current_step.step() {
            self.error_detail = Some(ErrorDetail::new(error.detail(), step, now));
        }
        self.updated_at = now;
        policy.is_exhausted(self.attempt)
    }

    /// Apply `outcome`; returns the "definitively failed" flag.
    pub fn record_outcome(
        &mut self,
        outcome: &StepOutcome,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> bool {
        match outcome {
            StepOutcome::Success => {
                self.record_success(now);
                false
            }
            StepOutcome::Failure(err) => self.record_failure(err, policy, now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Action, ActiveStep, Decider};
    use crate::test_support::{Letter, fixed_now, state_at};

    #[test]
    fn success_clears_error_and_keeps_attempt() {
        let mut state = state_at(ActiveStep::Step(Letter::C), Progress::Running, 3, false);
        state.error_detail = Some(ErrorDetail::new("earlier", Letter::C, fixed_now()));

        state.record_outcome(&StepOutcome::Success, &RetryPolicy::default(), fixed_now());
        assert_eq!(state.progress, Progress::Success);
        assert_eq!(state.attempt, 3);
        assert!(state.error_detail.is_none());
    }

    #[test]
    fn failure_records_step_and_message() {
        let mut state = state_at(ActiveStep::Step(Letter::B), Progress::Running, 1, false);
        let definitive = state.record_failure(
            &StepError::new("compile error"),
            &RetryPolicy::default(),
            fixed_now(),
        );

        assert!(!definitive);
        assert_eq!(state.progress, Progress::Failed);
        assert_eq!(state.attempt, 1);
        let detail = state.error_detail.as_ref().unwrap();
        assert_eq!(detail.failed_step, Letter::B);
        assert_eq!(detail.message, "compile error");
    }

    #[test]
    fn definitive_flag_agrees_with_decider() {
        let policy = RetryPolicy::default();
        let decider = Decider::new(policy.clone());
        for attempt in 1..=4 {
            let mut state = state_at(ActiveStep::Step(Letter::D), Progress::Running, attempt, false);
            let definitive = state.record_failure(&StepError::new("x"), &policy, fixed_now());
            let gives_up = matches!(decider.decide(&state), Action::GoIdle { clear_error: false });
            assert_eq!(definitive, gives_up, "attempt={attempt}");
        }
    }
}
