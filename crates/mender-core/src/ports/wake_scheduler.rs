//! WakeScheduler port - 「この時刻に tick して」を外部タイマーに依頼する

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::TaskKey;

/// Arms a one-shot timer that ends in `WorkflowEngine::tick(key)`.
///
/// Scheduling never cancels: a newer wake for the same key simply replaces
/// the older one. Implementations must not call back into the engine while
/// `schedule` is running.
#[async_trait]
pub trait WakeScheduler: Send + Sync {
    async fn schedule(&self, key: &TaskKey, at: DateTime<Utc>);
}

/// Drops every request. Used when the caller drives ticks by hand.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManualWakes;

#[async_trait]
impl WakeScheduler for ManualWakes {
    async fn schedule(&self, _key: &TaskKey, _at: DateTime<Utc>) {}
}
