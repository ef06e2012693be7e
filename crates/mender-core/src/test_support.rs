//! Shared fixtures for unit tests: a six-step letter pipeline and scripted handlers.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::domain::{ActiveStep, Progress, RunId, Step, StepError, TaskKey, WorkflowState};
use crate::pipeline::{StepContext, StepHandler};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Letter {
    A,
    B,
    C,
    D,
    E,
    F,
}

impl Step for Letter {
    const ALL: &'static [Self] = &[
        Letter::A,
        Letter::B,
        Letter::C,
        Letter::D,
        Letter::E,
        Letter::F,
    ];

    fn name(&self) -> &'static str {
        match self {
            Letter::A => "a",
            Letter::B => "b",
            Letter::C => "c",
            Letter::D => "d",
            Letter::E => "e",
            Letter::F => "f",
        }
    }
}

impl fmt::Display for Letter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
}

pub fn run_id() -> RunId {
    RunId::from(ulid::Ulid::from_parts(fixed_now().timestamp_millis() as u64, 7))
}

pub fn task_key() -> TaskKey {
    TaskKey::new("acme/api@main")
}

/// Build a state directly at `(step, progress, attempt)`.
pub fn state_at(
    step: ActiveStep<Letter>,
    progress: Progress,
    attempt: u32,
    armed: bool,
) -> WorkflowState<Letter> {
    let mut state = WorkflowState::fresh(task_key(), run_id(), serde_json::Value::Null, fixed_now());
    state.current_step = step;
    state.progress = progress;
    state.attempt = attempt;
    state.armed = armed;
    state
}

/// Always succeeds; counts calls.
#[derive(Default)]
pub struct Succeed {
    pub calls: AtomicU32,
}

#[async_trait]
impl StepHandler<Letter> for Succeed {
    async fn run(&self, _ctx: StepContext<Letter>) -> Result<(), StepError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Fails the first `failures` calls, then succeeds.
pub struct FailTimes {
    failures: u32,
    pub calls: AtomicU32,
}

impl FailTimes {
    pub fn new(failures: u32) -> Self {
        Self {
            failures,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl StepHandler<Letter> for FailTimes {
    async fn run(&self, ctx: StepContext<Letter>) -> Result<(), StepError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= self.failures {
            return Err(StepError::new(format!("{} failed on call {n}", ctx.step)));
        }
        Ok(())
    }
}

/// Panics on every call.
pub struct Panics;

#[async_trait]
impl StepHandler<Letter> for Panics {
    async fn run(&self, _ctx: StepContext<Letter>) -> Result<(), StepError> {
        panic!("handler blew up");
    }
}

/// Blocks until `release` is notified, then succeeds.
#[derive(Default)]
pub struct Gate {
    pub entered: Notify,
    pub release: Notify,
}

#[async_trait]
impl StepHandler<Letter> for Gate {
    async fn run(&self, _ctx: StepContext<Letter>) -> Result<(), StepError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(())
    }
}
