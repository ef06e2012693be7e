//! Decision records: the diagnostic history of a task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{DecisionId, RunId};
use super::task::TaskKey;

/// A decision made by the engine that a reader may later want explained.
///
/// Records:
/// - What was observed (trigger: step, attempt, error)
/// - Which policy applied ("retry_policy", "interruption", "anomaly")
/// - What was done ("schedule_retry", "give_up", "resume", "force_idle", ...)
///
/// Routine transitions (run next step, wait) are not recorded; they are
/// visible in the state itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub id: DecisionId,
    pub task_key: TaskKey,
    pub run_id: RunId,

    pub trigger: serde_json::Value,
    pub policy: String,
    pub decision: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,

    pub decided_at: DateTime<Utc>,
}

impl DecisionRecord {
    pub fn new(
        id: DecisionId,
        task_key: TaskKey,
        run_id: RunId,
        trigger: serde_json::Value,
        policy: impl Into<String>,
        decision: impl Into<String>,
        decided_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            task_key,
            run_id,
            trigger,
            policy: policy.into(),
            decision: decision.into(),
            context: None,
            decided_at,
        }
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }
}
