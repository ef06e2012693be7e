//! In-flight markers: which steps this process is executing right now.
//!
//! markers は永続化しません。プロセスが落ちると消えるので、
//! 再起動後に running のまま残った state は interruption として検出されます。

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{RunId, TaskKey};

/// One dispatched handler that has not resolved yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    pub run_id: RunId,
    pub step: &'static str,
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct InFlight {
    markers: Mutex<HashMap<TaskKey, Marker>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false (and keeps the existing marker) if `key` is already in flight.
    pub async fn insert(&self, key: TaskKey, marker: Marker) -> bool {
        let mut markers = self.markers.lock().await;
        if markers.contains_key(&key) {
            return false;
        }
        markers.insert(key, marker);
        true
    }

    /// Remove the marker of `key` if it belongs to `run_id`/`attempt`.
    pub async fn remove(&self, key: &TaskKey, run_id: RunId, attempt: u32) -> Option<Marker> {
        let mut markers = self.markers.lock().await;
        match markers.get(key) {
            Some(m) if m.run_id == run_id && m.attempt == attempt => markers.remove(key),
            _ => None,
        }
    }

    pub async fn contains(&self, key: &TaskKey) -> bool {
        self.markers.lock().await.contains_key(key)
    }

    pub async fn get(&self, key: &TaskKey) -> Option<Marker> {
        self.markers.lock().await.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.markers.lock().await.len()
    }
}
