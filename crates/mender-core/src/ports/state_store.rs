//! StateStore port - workflow state の正本（source of truth）
//!
//! StateStore は task key ごとに以下を保持します：
//! - 状態（WorkflowState）
//! - 次の wake 時刻
//! - 履歴（DecisionRecord）
//!
//! # 実装
//! - `impls::memory_store::InMemoryStateStore`: テスト・demo 用
//! - `impls::file_store::JsonFileStateStore`: 1 task = 1 JSON ファイル

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{DecisionRecord, Step, StoreError, TaskKey, WorkflowState};

/// Decision records kept per task; older entries are dropped first.
pub const DECISION_HISTORY_LIMIT: usize = 256;

/// Durable key-value storage of workflow state.
///
/// # 設計原則
/// - `save` は全体上書き（read-modify-write は engine が per-task lock の中で行う）
/// - 同じ key に別プロセスから書き込むのは呼び出し側の設定ミス
/// - wake 時刻を永続化するので、再起動後に timer を復元できる
#[async_trait]
pub trait StateStore<S: Step>: Send + Sync {
    async fn load(&self, key: &TaskKey) -> Result<Option<WorkflowState<S>>, StoreError>;

    /// Replace the stored state. An unreadable record for the same key is
    /// overwritten rather than reported.
    async fn save(&self, state: &WorkflowState<S>) -> Result<(), StoreError>;

    /// Record when `key` should next be ticked. Replaces any previous value.
    async fn save_wake(&self, key: &TaskKey, at: DateTime<Utc>) -> Result<(), StoreError>;

    async fn load_wake(&self, key: &TaskKey) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Every persisted wake, used to re-arm timers on process start.
    async fn pending_wakes(&self) -> Result<Vec<(TaskKey, DateTime<Utc>)>, StoreError>;

    async fn append_decision(&self, record: &DecisionRecord) -> Result<(), StoreError>;

    /// Decision history of `key`, oldest first.
    async fn decisions(&self, key: &TaskKey) -> Result<Vec<DecisionRecord>, StoreError>;
}
