//! Persisted workflow state: one record per task key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::RunId;
use super::step::{ActiveStep, Step};
use super::task::TaskKey;

/// Progress of the current step.
///
/// State transitions:
/// - Idle -> Running (start 後の最初の dispatch)
/// - Running -> Success | Failed
/// - Failed -> Retry -> Running (attempt < max_attempts)
/// - Failed -> Idle (attempt >= max_attempts)
/// - Success -> Running (next step) | Idle (terminal step)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Progress {
    Idle,
    Running,
    Success,
    Failed,
    Retry,
}

/// Why the most recent attempt did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail<S> {
    pub message: String,
    pub failed_step: S,
    pub at: DateTime<Utc>,
}

impl<S: Step> ErrorDetail<S> {
    pub fn new(message: impl Into<String>, failed_step: S, at: DateTime<Utc>) -> Self {
        Self {
            message: message.into(),
            failed_step,
            at,
        }
    }
}

/// Durable workflow state of one task.
///
/// Design:
/// - This is the single source of truth for the task.
/// - Only the engine mutates it, through the methods below and the
///   outcome/interruption helpers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(deserialize = "S: Step"))]
pub struct WorkflowState<S> {
    pub task_key: TaskKey,
    pub run_id: RunId,
    pub current_step: ActiveStep<S>,

    /// 1-indexed attempt of `current_step`; 0 only while idle.
    pub attempt: u32,
    pub progress: Progress,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<ErrorDetail<S>>,

    /// Caller-supplied parameters given to `start()`.
    #[serde(default)]
    pub params: serde_json::Value,

    /// Set by `start()`, cleared when the first step is dispatched.
    /// An idle task that is not armed has finished (or given up) and stays idle.
    #[serde(default)]
    pub armed: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<S: Step> WorkflowState<S> {
    /// Fresh idle state for a new run.
    pub fn fresh(
        task_key: TaskKey,
        run_id: RunId,
        params: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            task_key,
            run_id,
            current_step: ActiveStep::Idle,
            attempt: 0,
            progress: Progress::Idle,
            error_detail: None,
            params,
            armed: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Mark `step` as running on attempt `attempt`.
    pub fn begin_attempt(&mut self, step: S, attempt: u32, now: DateTime<Utc>) {
        self.current_step = ActiveStep::Step(step);
        self.attempt = attempt.max(1);
        self.progress = Progress::Running;
        self.armed = false;
        self.updated_at = now;
    }

    /// Failed -> Retry on the same step. The attempt counter is left alone;
    /// the next run uses `attempt + 1`.
    pub fn schedule_retry(&mut self, now: DateTime<Utc>) {
        self.progress = Progress::Retry;
        self.updated_at = now;
    }

    /// Park the task at idle.
    ///
    /// With `clear_error == false` the error detail stays as the terminal
    /// diagnostic explaining why the run stopped.
    pub fn go_idle(&mut self, clear_error: bool, now: DateTime<Utc>) {
        self.current_step = ActiveStep::Idle;
        self.attempt = 0;
        self.progress = Progress::Idle;
        self.armed = false;
        if clear_error {
            self.error_detail = None;
        }
        self.updated_at = now;
    }

    pub fn is_running(&self) -> bool {
        self.progress == Progress::Running
    }

    /// Idle and not armed: the run finished or gave up.
    pub fn is_parked(&self) -> bool {
        self.current_step.is_idle() && self.progress == Progress::Idle && !self.armed
    }

    /// Check structural invariants. Returns an empty vec when the state is sound.
    pub fn invariant_violations(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.current_step.is_idle() && self.attempt != 0 {
            errors.push(format!("idle task carries attempt={}", self.attempt));
        }
        if self.progress == Progress::Running && self.attempt == 0 {
            errors.push("running step has attempt=0".to_string());
        }
        if self.armed && !self.current_step.is_idle() {
            errors.push(format!("armed while step {} is active", self.current_step));
        }
        errors
    }
}
