//! Interruption detection: a step persisted as running that this process
//! is not executing.
//!
//! In-flight markers are process-local, so after a restart every step that
//! was running looks interrupted. A slow step in the same process still has
//! its marker and is left alone.

use chrono::{DateTime, Utc};

use super::retry::RetryPolicy;
use super::state::{ErrorDetail, Progress, WorkflowState};
use super::step::Step;

/// A detected loss of execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interruption<S> {
    /// Budget left: rerun the step on the next tick.
    Resumable { step: S, attempt: u32 },

    /// Budget used up: park at idle.
    Exhausted { step: S, attempt: u32 },
}

impl<S: Step> Interruption<S> {
    /// Returns `Some` iff the state says running and no marker is held.
    pub fn detect(
        state: &WorkflowState<S>,
        marker_present: bool,
        policy: &RetryPolicy,
    ) -> Option<Self> {
        if state.progress != Progress::Running || marker_present {
            return None;
        }
        let step = state.current_step.step()?;
        let attempt = state.attempt;
        if policy.is_exhausted(attempt) {
            Some(Interruption::Exhausted { step, attempt })
        } else {
            Some(Interruption::Resumable { step, attempt })
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Interruption::Resumable { step, attempt } => {
                format!("step {step} was interrupted on attempt {attempt}")
            }
            Interruption::Exhausted { step, attempt } => format!(
                "step {step} was interrupted on attempt {attempt} and exhausted its retry budget"
            ),
        }
    }

    /// Write the recovery into `state`.
    ///
    /// Resumable keeps the attempt number; the upcoming run is `attempt + 1`,
    /// so an interruption consumes budget like a failure does.
    pub fn apply(&self, state: &mut WorkflowState<S>, now: DateTime<Utc>) {
        match *self {
            Interruption::Resumable { step, .. } => {
                state.progress = Progress::Retry;
                state.error_detail = Some(ErrorDetail::new(self.describe(), step, now));
                state.updated_at = now;
            }
            Interruption::Exhausted { step, .. } => {
                state.go_idle(false, now);
                state.error_detail = Some(ErrorDetail::new(self.describe(), step, now));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Action, ActiveStep, Decider};
    use crate::test_support::{Letter, fixed_now, state_at};

    #[test]
    fn marker_present_means_still_running() {
        let state = state_at(ActiveStep::Step(Letter::C), Progress::Running, 1, false);
        assert_eq!(Interruption::detect(&state, true, &RetryPolicy::default()), None);
    }

    #[test]
    fn non_running_states_are_never_interrupted() {
        for progress in [Progress::Success, Progress::Failed, Progress::Retry, Progress::Idle] {
            let state = state_at(ActiveStep::Step(Letter::C), progress, 1, false);
            assert_eq!(Interruption::detect(&state, false, &RetryPolicy::default()), None);
        }
    }

    #[test]
    fn resumable_interruption_moves_to_retry() {
        let mut state = state_at(ActiveStep::Step(Letter::C), Progress::Running, 2, false);
        let found = Interruption::detect(&state, false, &RetryPolicy::default()).unwrap();
        assert_eq!(found, Interruption::Resumable { step: Letter::C, attempt: 2 });

        found.apply(&mut state, fixed_now());
        assert_eq!(state.progress, Progress::Retry);
        assert_eq!(state.attempt, 2);
        assert!(state.error_detail.as_ref().unwrap().message.contains("interrupted"));

        assert_eq!(
            Decider::default().decide(&state),
            Action::RunStep { step: Letter::C, attempt: 3 }
        );
    }

    #[test]
    fn exhausted_interruption_parks_at_idle() {
        let mut state = state_at(ActiveStep::Step(Letter::E), Progress::Running, 3, false);
        let found = Interruption::detect(&state, false, &RetryPolicy::default()).unwrap();
        found.apply(&mut state, fixed_now());

        assert_eq!(state.current_step, ActiveStep::Idle);
        assert_eq!(state.attempt, 0);
        assert!(state.is_parked());
        let detail = state.error_detail.as_ref().unwrap();
        assert_eq!(detail.failed_step, Letter::E);
        assert!(detail.message.contains("exhausted"));
    }
}
