//! Status - 外部から poll するための snapshot

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::inflight::Marker;
use crate::domain::{Progress, Step, WorkflowState};

/// Serializable view of one task, timestamps in epoch milliseconds.
///
/// # 使用例
/// ```ignore
/// if let Some(view) = engine.status(&key).await? {
///     println!("{}", serde_json::to_string_pretty(&view)?);
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusView {
    pub task_key: String,
    pub run_id: String,
    pub current_step: String,
    pub progress: Progress,
    pub attempt: u32,
    pub max_attempts: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StatusError>,

    /// This process is executing the current step right now.
    pub in_flight: bool,

    /// When the in-flight handler was dispatched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_flight_since_ms: Option<i64>,

    /// The run ended (finished or gave up) and ticks are no-ops.
    pub parked: bool,

    pub created_at_ms: i64,
    pub updated_at_ms: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_wake_at_ms: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusError {
    pub message: String,
    pub failed_step: String,
    pub at_ms: i64,
}

impl StatusView {
    pub fn from_state<S: Step>(
        state: &WorkflowState<S>,
        max_attempts: u32,
        in_flight: Option<&Marker>,
        next_wake_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            task_key: state.task_key.to_string(),
            run_id: state.run_id.to_string(),
            current_step: state.current_step.name().to_string(),
            progress: state.progress,
            attempt: state.attempt,
            max_attempts,
            error: state.error_detail.as_ref().map(|e| StatusError {
                message: e.message.clone(),
                failed_step: e.failed_step.name().to_string(),
                at_ms: e.at.timestamp_millis(),
            }),
            in_flight: in_flight.is_some(),
            in_flight_since_ms: in_flight.map(|m| m.started_at.timestamp_millis()),
            parked: state.is_parked(),
            created_at_ms: state.created_at.timestamp_millis(),
            updated_at_ms: state.updated_at.timestamp_millis(),
            next_wake_at_ms: next_wake_at.map(|at| at.timestamp_millis()),
        }
    }
}
