//! In-memory state store.
//!
//! プロセスが落ちると消えるので「永続」ではありませんが、
//! 同じ `Arc<InMemoryStateStore>` の上に engine を作り直すことで
//! 再起動をシミュレートできます（in-flight marker は engine 側にしかない）。

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{DecisionRecord, Step, StoreError, TaskKey, WorkflowState};
use crate::ports::{DECISION_HISTORY_LIMIT, StateStore};

struct Entry<S> {
    state: Option<WorkflowState<S>>,
    wake_at: Option<DateTime<Utc>>,
    decisions: VecDeque<DecisionRecord>,
}

impl<S> Default for Entry<S> {
    fn default() -> Self {
        Self {
            state: None,
            wake_at: None,
            decisions: VecDeque::new(),
        }
    }
}

pub struct InMemoryStateStore<S> {
    entries: Mutex<HashMap<TaskKey, Entry<S>>>,
}

impl<S: Step> InMemoryStateStore<S> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries
            .lock()
            .await
            .values()
            .filter(|e| e.state.is_some())
            .count()
    }
}

impl<S: Step> Default for InMemoryStateStore<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<S: Step> StateStore<S> for InMemoryStateStore<S> {
    async fn load(&self, key: &TaskKey) -> Result<Option<WorkflowState<S>>, StoreError> {
        let entries = self.entries.lock().await;
        Ok(entries.get(key).and_then(|e| e.state.clone()))
    }

    async fn save(&self, state: &WorkflowState<S>) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        entries.entry(state.task_key.clone()).or_default().state = Some(state.clone());
        Ok(())
    }

    async fn save_wake(&self, key: &TaskKey, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        entries.entry(key.clone()).or_default().wake_at = Some(at);
        Ok(())
    }

    async fn load_wake(&self, key: &TaskKey) -> Result<Option<DateTime<Utc>>, StoreError> {
        let entries = self.entries.lock().await;
        Ok(entries.get(key).and_then(|e| e.wake_at))
    }

    async fn pending_wakes(&self) -> Result<Vec<(TaskKey, DateTime<Utc>)>, StoreError> {
        let entries = self.entries.lock().await;
        let mut wakes: Vec<_> = entries
            .iter()
            .filter_map(|(key, e)| e.wake_at.map(|at| (key.clone(), at)))
            .collect();
        wakes.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        Ok(wakes)
    }

    async fn append_decision(&self, record: &DecisionRecord) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        let decisions = &mut entries.entry(record.task_key.clone()).or_default().decisions;
        decisions.push_back(record.clone());
        while decisions.len() > DECISION_HISTORY_LIMIT {
            decisions.pop_front();
        }
        Ok(())
    }

    async fn decisions(&self, key: &TaskKey) -> Result<Vec<DecisionRecord>, StoreError> {
        let entries = self.entries.lock().await;
        Ok(entries
            .get(key)
            .map(|e| e.decisions.iter().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DecisionId;
    use crate::test_support::{Letter, fixed_now, run_id, task_key};
    use serde_json::json;

    fn record(n: usize) -> DecisionRecord {
        DecisionRecord::new(
            DecisionId::from(ulid::Ulid::from_parts(n as u64, 0)),
            task_key(),
            run_id(),
            json!({ "n": n }),
            "retry_policy",
            "schedule_retry",
            fixed_now(),
        )
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let store = InMemoryStateStore::<Letter>::new();
        assert!(store.load(&task_key()).await.unwrap().is_none());

        let state = WorkflowState::fresh(task_key(), run_id(), json!({}), fixed_now());
        store.save(&state).await.unwrap();

        assert_eq!(store.load(&task_key()).await.unwrap(), Some(state));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_pending_wakes_sorted_by_time() {
        let store = InMemoryStateStore::<Letter>::new();
        let later = fixed_now() + chrono::Duration::seconds(10);
        store.save_wake(&TaskKey::new("b"), later).await.unwrap();
        store.save_wake(&TaskKey::new("a"), fixed_now()).await.unwrap();
        // 上書き
        store.save_wake(&TaskKey::new("a"), later + chrono::Duration::seconds(1)).await.unwrap();

        let wakes = store.pending_wakes().await.unwrap();
        let keys: Vec<_> = wakes.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_decision_history_is_bounded() {
        let store = InMemoryStateStore::<Letter>::new();
        for n in 0..DECISION_HISTORY_LIMIT + 4 {
            store.append_decision(&record(n)).await.unwrap();
        }
        let decisions = store.decisions(&task_key()).await.unwrap();
        assert_eq!(decisions.len(), DECISION_HISTORY_LIMIT);
        assert_eq!(decisions[0].trigger["n"], 4);
    }
}
