//! TickLoop - due になった task key を engine に渡し続ける driver

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::engine::WorkflowEngine;
use crate::domain::{EngineError, Step};
use crate::impls::TokioWakeQueue;

/// Tick loop handle.
/// - `request_shutdown()` で新しい tick を取らなくなる
/// - `shutdown_and_join()` で loop の終了を待てる
///
/// 実行中の handler は止めません（spawn 済みの task として走り続ける）。
pub struct TickLoop {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl TickLoop {
    /// Spawn the driver. `wakes` must be the scheduler the engine was built with.
    pub fn spawn<S: Step>(engine: WorkflowEngine<S>, wakes: Arc<TokioWakeQueue>) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(async move {
            tick_loop(engine, wakes, &mut shutdown_rx).await;
        });
        Self { shutdown_tx, join }
    }

    /// Re-arm persisted wakes, then spawn the driver.
    pub async fn resume<S: Step>(
        engine: WorkflowEngine<S>,
        wakes: Arc<TokioWakeQueue>,
    ) -> Result<Self, EngineError> {
        engine.resume_wakes().await?;
        Ok(Self::spawn(engine, wakes))
    }

    pub fn request_shutdown(&self) {
        // ignore send error: receiver may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        let _ = self.join.await;
    }
}

async fn tick_loop<S: Step>(
    engine: WorkflowEngine<S>,
    wakes: Arc<TokioWakeQueue>,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    info!("tick loop started");
    loop {
        // shutdown が来ていたら抜ける
        if *shutdown_rx.borrow() {
            break;
        }

        let key = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            key = wakes.next_due() => key,
        };

        match engine.tick(&key).await {
            Ok(report) => {
                debug!(task_key = %key, action = report.action.label(), "tick");
            }
            Err(EngineError::UnknownTask(key)) => {
                // state のない wake は捨てる（再予約しない）
                warn!(task_key = %key, "wake for unknown task dropped");
            }
            Err(err) => {
                error!(task_key = %key, error = %err, "tick failed; retrying after one interval");
                let interval = engine.config().tick_interval();
                if let Err(err) = engine.schedule_next(&key, interval).await {
                    error!(task_key = %key, error = %err, "could not re-arm wake");
                }
            }
        }
    }
    info!("tick loop stopped");
}
