//! In-process wake queue driven by tokio timers.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::domain::TaskKey;
use crate::ports::{Clock, WakeScheduler};

/// Scheduled wake entry for priority queue.
///
/// We use Reverse ordering so BinaryHeap acts as a min-heap (earliest first).
#[derive(Debug, Clone, PartialEq, Eq)]
struct ScheduledWake {
    due: Instant,
    seq: u64,
    task_key: TaskKey,
}

impl PartialOrd for ScheduledWake {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledWake {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering: earlier times have higher priority
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct WakeQueueState {
    heap: BinaryHeap<ScheduledWake>,
    /// Latest seq per key; heap entries with an older seq are stale.
    latest: HashMap<TaskKey, u64>,
    next_seq: u64,
}

impl WakeQueueState {
    fn push(&mut self, task_key: TaskKey, due: Instant) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.latest.insert(task_key.clone(), seq);
        self.heap.push(ScheduledWake { due, seq, task_key });
    }

    /// Drop stale heads so `peek` sees a live entry.
    fn discard_stale(&mut self) {
        while let Some(head) = self.heap.peek() {
            if self.latest.get(&head.task_key) == Some(&head.seq) {
                break;
            }
            self.heap.pop();
        }
    }

    fn pop_due(&mut self, now: Instant) -> Option<TaskKey> {
        self.discard_stale();
        match self.heap.peek() {
            Some(head) if head.due <= now => {}
            _ => return None,
        }
        let head = self.heap.pop()?;
        self.latest.remove(&head.task_key);
        Some(head.task_key)
    }
}

/// Min-heap of `(due, task_key)` shared between the engine (producer) and
/// the tick loop (consumer).
///
/// - At most one pending wake per key; a newer `schedule` replaces the older
/// - Wall-clock times are converted to tokio `Instant`s at schedule time
pub struct TokioWakeQueue {
    state: Mutex<WakeQueueState>,
    notify: Notify,
    clock: Arc<dyn Clock>,
}

impl TokioWakeQueue {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(WakeQueueState::default()),
            notify: Notify::new(),
            clock,
        }
    }

    fn to_instant(&self, at: DateTime<Utc>) -> Instant {
        let delay = (at - self.clock.now()).to_std().unwrap_or_default();
        Instant::now() + delay
    }

    /// Wait until some key is due and return it.
    pub async fn next_due(&self) -> TaskKey {
        loop {
            let next_wake = {
                let mut state = self.state.lock().await;
                if let Some(key) = state.pop_due(Instant::now()) {
                    return key;
                }
                state.heap.peek().map(|entry| entry.due)
            };

            // Wait for notification OR next scheduled wake time
            if let Some(wake_time) = next_wake {
                tokio::select! {
                    _ = self.notify.notified() => {},
                    _ = tokio::time::sleep_until(wake_time) => {},
                }
            } else {
                self.notify.notified().await;
            }
        }
    }

    /// Number of live pending wakes.
    pub async fn pending(&self) -> usize {
        self.state.lock().await.latest.len()
    }
}

#[async_trait]
impl WakeScheduler for TokioWakeQueue {
    async fn schedule(&self, key: &TaskKey, at: DateTime<Utc>) {
        let due = self.to_instant(at);
        self.state.lock().await.push(key.clone(), due);
        self.notify.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::SystemClock;
    use std::time::Duration;

    fn queue() -> TokioWakeQueue {
        TokioWakeQueue::new(Arc::new(SystemClock))
    }

    #[tokio::test(start_paused = true)]
    async fn earliest_wake_comes_first() {
        let q = queue();
        let now = Utc::now();
        q.schedule(&TaskKey::new("late"), now + chrono::Duration::seconds(10)).await;
        q.schedule(&TaskKey::new("early"), now + chrono::Duration::seconds(1)).await;

        assert_eq!(q.next_due().await, TaskKey::new("early"));
        assert_eq!(q.next_due().await, TaskKey::new("late"));
        assert_eq!(q.pending().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reschedule_replaces_previous_wake() {
        let q = queue();
        let now = Utc::now();
        let key = TaskKey::new("acme/api@main");
        q.schedule(&key, now + chrono::Duration::seconds(1)).await;
        q.schedule(&key, now + chrono::Duration::seconds(30)).await;
        assert_eq!(q.pending().await, 1);

        let started = Instant::now();
        assert_eq!(q.next_due().await, key);
        assert!(started.elapsed() >= Duration::from_secs(29));
    }

    #[tokio::test(start_paused = true)]
    async fn past_wakes_are_due_immediately() {
        let q = queue();
        q.schedule(&TaskKey::new("k"), Utc::now() - chrono::Duration::seconds(5)).await;
        let got = tokio::time::timeout(Duration::from_millis(10), q.next_due()).await;
        assert_eq!(got.unwrap(), TaskKey::new("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_is_woken_by_new_schedule() {
        let q = Arc::new(queue());
        let waiter = {
            let q = Arc::clone(&q);
            tokio::spawn(async move { q.next_due().await })
        };
        tokio::task::yield_now().await;
        q.schedule(&TaskKey::new("k"), Utc::now()).await;
        assert_eq!(waiter.await.unwrap(), TaskKey::new("k"));
    }
}
