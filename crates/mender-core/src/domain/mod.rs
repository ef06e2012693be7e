//! Domain model (IDs, steps, workflow state, transition table, outcomes).
//!
//! このモジュールは I/O を持ちません。永続化・タイマー・handler 実行は
//! `ports` / `app` 側の責務です。

pub mod attempt;
pub mod decision;
pub mod errors;
pub mod ids;
pub mod interruption;
pub mod outcome;
pub mod retry;
pub mod state;
pub mod step;
pub mod task;

pub use attempt::DecisionRecord;
pub use decision::{Action, Anomaly, Decider};
pub use errors::{EngineError, StepError, StepErrorKind, StoreError};
pub use ids::{DecisionId, RunId};
pub use interruption::Interruption;
pub use outcome::StepOutcome;
pub use retry::{DEFAULT_MAX_ATTEMPTS, RetryPolicy};
pub use state::{ErrorDetail, Progress, WorkflowState};
pub use step::{ActiveStep, Step};
pub use task::TaskKey;
