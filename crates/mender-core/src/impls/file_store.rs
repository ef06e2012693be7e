//! File-backed state store: one JSON document per task.
//!
//! Layout: `<dir>/<encoded task key>.json` holding the state, the next wake
//! and the bounded decision history. Every write goes to a temp file first
//! and is renamed into place, so a crash never leaves a half-written document.

use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::domain::{DecisionRecord, Step, StoreError, TaskKey, WorkflowState};
use crate::ports::{DECISION_HISTORY_LIMIT, StateStore};

#[derive(Debug, Serialize, Deserialize)]
#[serde(bound(deserialize = "S: Step"))]
struct TaskDocument<S> {
    task_key: TaskKey,
    #[serde(default)]
    state: Option<WorkflowState<S>>,
    #[serde(default)]
    wake_at: Option<DateTime<Utc>>,
    #[serde(default)]
    decisions: Vec<DecisionRecord>,
}

impl<S: Step> TaskDocument<S> {
    fn empty(task_key: TaskKey) -> Self {
        Self {
            task_key,
            state: None,
            wake_at: None,
            decisions: Vec::new(),
        }
    }
}

pub struct JsonFileStateStore<S> {
    dir: PathBuf,
    // read-modify-write を直列化する
    write_lock: Mutex<()>,
    _marker: PhantomData<fn() -> S>,
}

impl<S: Step> JsonFileStateStore<S> {
    /// Open (and create if needed) a store rooted at `dir`.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::io(&dir, e))?;
        debug!(dir = %dir.display(), "opened state directory");
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
            _marker: PhantomData,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the document for `key`.
    pub fn path_for(&self, key: &TaskKey) -> PathBuf {
        self.dir.join(format!("{}.json", encode_key(key)))
    }

    async fn read_document(&self, key: &TaskKey) -> Result<Option<TaskDocument<S>>, StoreError> {
        let path = self.path_for(key);
        let contents = match fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(&path, e)),
        };
        let doc: TaskDocument<S> = serde_json::from_str(&contents)
            .map_err(|e| StoreError::Corrupt(key.clone(), e.to_string()))?;
        if &doc.task_key != key {
            return Err(StoreError::Corrupt(
                key.clone(),
                format!("document belongs to task_key={}", doc.task_key),
            ));
        }
        Ok(Some(doc))
    }

    async fn write_document(&self, doc: &TaskDocument<S>) -> Result<(), StoreError> {
        let path = self.path_for(&doc.task_key);
        let mut buf = serde_json::to_string_pretty(doc)?;
        buf.push('\n');
        write_atomic(&path, &buf).await
    }

    /// Load, mutate and write back the document of `key` under the write lock.
    ///
    /// With `replace_corrupt`, an unreadable document is replaced by an empty
    /// one (its wake and decisions are lost) instead of failing the write.
    async fn update<F>(&self, key: &TaskKey, replace_corrupt: bool, mutate: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut TaskDocument<S>) + Send,
    {
        let _guard = self.write_lock.lock().await;
        let existing = match self.read_document(key).await {
            Err(StoreError::Corrupt(_, reason)) if replace_corrupt => {
                warn!(task_key = %key, reason = %reason, "overwriting unreadable task document");
                None
            }
            other => other?,
        };
        let mut doc = existing.unwrap_or_else(|| TaskDocument::empty(key.clone()));
        mutate(&mut doc);
        self.write_document(&doc).await
    }
}

async fn write_atomic(path: &Path, contents: &str) -> Result<(), StoreError> {
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .await
        .map_err(|e| StoreError::io(&tmp_path, e))?;
    fs::rename(&tmp_path, path)
        .await
        .map_err(|e| StoreError::io(path, e))?;
    debug!(path = %path.display(), "wrote task document");
    Ok(())
}

/// Filesystem-safe file stem for a task key.
///
/// ASCII alphanumerics, `-` and `_` are kept; every other byte becomes `%XX`.
/// The mapping is injective, so distinct keys never share a file.
pub fn encode_key(key: &TaskKey) -> String {
    let mut out = String::with_capacity(key.as_str().len());
    for byte in key.as_str().bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

#[async_trait]
impl<S: Step> StateStore<S> for JsonFileStateStore<S> {
    async fn load(&self, key: &TaskKey) -> Result<Option<WorkflowState<S>>, StoreError> {
        Ok(self.read_document(key).await?.and_then(|doc| doc.state))
    }

    async fn save(&self, state: &WorkflowState<S>) -> Result<(), StoreError> {
        let state = state.clone();
        self.update(&state.task_key.clone(), true, move |doc| doc.state = Some(state))
            .await
    }

    async fn save_wake(&self, key: &TaskKey, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.update(key, false, move |doc| doc.wake_at = Some(at)).await
    }

    async fn load_wake(&self, key: &TaskKey) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self.read_document(key).await?.and_then(|doc| doc.wake_at))
    }

    async fn pending_wakes(&self) -> Result<Vec<(TaskKey, DateTime<Utc>)>, StoreError> {
        let mut wakes = Vec::new();
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| StoreError::io(&self.dir, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&self.dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let contents = match fs::read_to_string(&path).await {
                Ok(contents) => contents,
                Err(e) => return Err(StoreError::io(&path, e)),
            };
            match serde_json::from_str::<TaskDocument<S>>(&contents) {
                Ok(doc) => {
                    if let Some(at) = doc.wake_at {
                        wakes.push((doc.task_key, at));
                    }
                }
                Err(e) => {
                    // 壊れた 1 件のせいで全 task の timer 復元を止めない
                    warn!(path = %path.display(), error = %e, "skipping unreadable task document");
                }
            }
        }
        wakes.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        Ok(wakes)
    }

    async fn append_decision(&self, record: &DecisionRecord) -> Result<(), StoreError> {
        let record = record.clone();
        self.update(&record.task_key.clone(), false, move |doc| {
            doc.decisions.push(record);
            let overflow = doc.decisions.len().saturating_sub(DECISION_HISTORY_LIMIT);
            doc.decisions.drain(..overflow);
        })
        .await
    }

    async fn decisions(&self, key: &TaskKey) -> Result<Vec<DecisionRecord>, StoreError> {
        Ok(self
            .read_document(key)
            .await?
            .map(|doc| doc.decisions)
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::EngineBuilder;
    use crate::domain::{Action, DecisionId, Progress};
    use crate::ports::FixedClock;
    use crate::test_support::{Letter, Succeed, fixed_now, run_id, task_key};
    use std::sync::Arc;
    use serde_json::json;
    use tempfile::TempDir;

    async fn open() -> (TempDir, JsonFileStateStore<Letter>) {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStateStore::open(dir.path().join("state")).await.unwrap();
        (dir, store)
    }

    #[test]
    fn encode_key_is_filesystem_safe() {
        assert_eq!(encode_key(&TaskKey::new("acme/api@main")), "acme%2Fapi%40main");
        assert_eq!(encode_key(&TaskKey::new("../etc")), "%2E%2E%2Fetc");
        assert_eq!(encode_key(&TaskKey::new("plain_key-1")), "plain_key-1");
    }

    #[tokio::test]
    async fn state_survives_reopen() {
        let (dir, store) = open().await;
        let mut state = WorkflowState::fresh(task_key(), run_id(), json!({"branch": "main"}), fixed_now());
        state.begin_attempt(Letter::B, 2, fixed_now());
        store.save(&state).await.unwrap();
        store.save_wake(&task_key(), fixed_now()).await.unwrap();

        let reopened = JsonFileStateStore::<Letter>::open(dir.path().join("state")).await.unwrap();
        let loaded = reopened.load(&task_key()).await.unwrap().unwrap();
        assert_eq!(loaded.progress, Progress::Running);
        assert_eq!(loaded.attempt, 2);
        assert_eq!(loaded, state);
        assert_eq!(reopened.load_wake(&task_key()).await.unwrap(), Some(fixed_now()));
    }

    #[tokio::test]
    async fn missing_task_loads_as_none() {
        let (_dir, store) = open().await;
        assert!(store.load(&TaskKey::new("nobody")).await.unwrap().is_none());
        assert!(store.decisions(&TaskKey::new("nobody")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn no_temp_files_are_left_behind() {
        let (_dir, store) = open().await;
        let state = WorkflowState::<Letter>::fresh(task_key(), run_id(), json!(null), fixed_now());
        store.save(&state).await.unwrap();

        let mut names = Vec::new();
        let mut entries = fs::read_dir(store.dir()).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        assert_eq!(names, vec!["acme%2Fapi%40main.json".to_string()]);
    }

    #[tokio::test]
    async fn corrupt_document_is_reported() {
        let (_dir, store) = open().await;
        fs::write(store.path_for(&task_key()), "{ not json").await.unwrap();

        let err = store.load(&task_key()).await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(key, _) if key == task_key()));

        // pending_wakes は壊れた文書を飛ばす
        store.save_wake(&TaskKey::new("other"), fixed_now()).await.unwrap();
        let wakes = store.pending_wakes().await.unwrap();
        assert_eq!(wakes, vec![(TaskKey::new("other"), fixed_now())]);
    }

    #[tokio::test]
    async fn save_replaces_corrupt_document() {
        let (_dir, store) = open().await;
        fs::write(store.path_for(&task_key()), "{ not json").await.unwrap();

        // wake と decision の書き込みは壊れた文書を上書きしない
        let err = store.save_wake(&task_key(), fixed_now()).await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(..)));

        let state = WorkflowState::<Letter>::fresh(task_key(), run_id(), json!(null), fixed_now());
        store.save(&state).await.unwrap();
        assert_eq!(store.load(&task_key()).await.unwrap(), Some(state));
        assert_eq!(store.load_wake(&task_key()).await.unwrap(), None);
        assert!(store.decisions(&task_key()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn start_recovers_task_with_corrupt_document() {
        let (_dir, store) = open().await;
        fs::write(store.path_for(&task_key()), "{ not json").await.unwrap();
        let store = Arc::new(store);

        let mut builder = EngineBuilder::<Letter>::new()
            .store(store.clone())
            .clock(Arc::new(FixedClock::new(fixed_now())));
        for step in Letter::ALL {
            builder = builder.register(*step, Succeed::default()).unwrap();
        }
        let engine = builder.build().unwrap();

        let receipt = engine.start(task_key(), json!({})).await.unwrap();
        let state = store.load(&task_key()).await.unwrap().unwrap();
        assert_eq!(state.run_id, receipt.run_id);
        assert_eq!(state.progress, Progress::Idle);
        assert!(state.armed);
        assert!(store.load_wake(&task_key()).await.unwrap().is_some());

        let report = engine.tick(&task_key()).await.unwrap();
        assert_eq!(report.action, Action::RunStep { step: Letter::A, attempt: 1 });
        report.join().await.unwrap();
        let state = store.load(&task_key()).await.unwrap().unwrap();
        assert_eq!(state.progress, Progress::Success);
    }

    #[tokio::test]
    async fn decisions_are_appended_and_bounded() {
        let (_dir, store) = open().await;
        for n in 0..DECISION_HISTORY_LIMIT + 2 {
            let record = DecisionRecord::new(
                DecisionId::from(ulid::Ulid::from_parts(n as u64, 0)),
                task_key(),
                run_id(),
                json!({ "n": n }),
                "retry_policy",
                "schedule_retry",
                fixed_now(),
            );
            store.append_decision(&record).await.unwrap();
        }
        let decisions = store.decisions(&task_key()).await.unwrap();
        assert_eq!(decisions.len(), DECISION_HISTORY_LIMIT);
        assert_eq!(decisions[0].trigger["n"], 2);
        assert_eq!(decisions.last().unwrap().trigger["n"], DECISION_HISTORY_LIMIT + 1);
    }
}
