//! WorkflowEngine - tick ごとに workflow state を 1 歩進める
//!
//! 1 tick の流れ:
//! 1. load state（per-task lock の中）
//! 2. interruption 検出（running なのに in-flight marker がない）
//! 3. `Decider::decide` で次の action を決める
//! 4. 次の wake を予約（action ごとに delay を選ぶ）
//! 5. action を適用（RunStep なら handler を spawn）
//!
//! handler の結果は spawn 先で同じ per-task lock を取ってから記録します。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::Mutex;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

use super::inflight::{InFlight, Marker};
use super::status::StatusView;
use crate::config::EngineConfig;
use crate::domain::{
    Action, ActiveStep, Anomaly, Decider, DecisionRecord, EngineError, Interruption, Progress, RunId, Step,
    StepError, StepOutcome, StoreError, TaskKey, WorkflowState,
};
use crate::pipeline::{StepContext, StepHandler, StepRegistry};
use crate::ports::{Clock, IdGenerator, StateStore, WakeScheduler};

/// Returned by `start()`.
#[derive(Debug, Clone, PartialEq)]
pub struct StartReceipt<S> {
    pub task_key: TaskKey,
    pub run_id: RunId,
    pub current_step: ActiveStep<S>,
    pub progress: Progress,
}

/// What one tick did.
#[derive(Debug)]
pub struct TickReport<S> {
    pub action: Action<S>,

    /// Set when the tick recovered an interrupted step instead of deciding.
    pub interrupted: Option<Interruption<S>>,

    /// Completion of the dispatched handler, outcome recording included.
    pub dispatched: Option<JoinHandle<()>>,
}

impl<S> TickReport<S> {
    /// Wait for the dispatched step (if any) to be recorded.
    pub async fn join(self) -> Result<(), JoinError> {
        match self.dispatched {
            Some(handle) => handle.await,
            None => Ok(()),
        }
    }
}

/// Identity of one dispatched attempt. Outcomes that no longer match the
/// stored state are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepExecution<S> {
    pub run_id: RunId,
    pub step: S,
    pub attempt: u32,
}

pub(crate) struct EngineParts<S: Step> {
    pub store: Arc<dyn StateStore<S>>,
    pub wakes: Arc<dyn WakeScheduler>,
    pub registry: Arc<StepRegistry<S>>,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
    pub config: EngineConfig,
}

struct EngineInner<S: Step> {
    store: Arc<dyn StateStore<S>>,
    wakes: Arc<dyn WakeScheduler>,
    registry: Arc<StepRegistry<S>>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    decider: Decider,
    config: EngineConfig,
    inflight: InFlight,
    /// One lock per task key ever touched. Entries are never pruned; the map
    /// grows with the number of distinct keys, not with ticks.
    locks: Mutex<HashMap<TaskKey, Arc<Mutex<()>>>>,
}

/// Durable workflow engine over a fixed step pipeline.
///
/// Cheap to clone; clones share the store, markers and locks.
pub struct WorkflowEngine<S: Step> {
    inner: Arc<EngineInner<S>>,
}

impl<S: Step> Clone for WorkflowEngine<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: Step> WorkflowEngine<S> {
    pub(crate) fn from_parts(parts: EngineParts<S>) -> Self {
        let decider = Decider::new(parts.config.retry_policy());
        Self {
            inner: Arc::new(EngineInner {
                store: parts.store,
                wakes: parts.wakes,
                registry: parts.registry,
                clock: parts.clock,
                ids: parts.ids,
                decider,
                config: parts.config,
                inflight: InFlight::new(),
                locks: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &StepRegistry<S> {
        &self.inner.registry
    }

    fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    async fn task_lock(&self, key: &TaskKey) -> Arc<Mutex<()>> {
        let mut locks = self.inner.locks.lock().await;
        Arc::clone(locks.entry(key.clone()).or_default())
    }

    /// Reset `task_key` to a fresh run and schedule its first tick.
    ///
    /// Any previous state for the key is overwritten, whatever it was.
    /// A handler still in flight from the previous run finishes on its own;
    /// its outcome is dropped.
    pub async fn start(
        &self,
        task_key: TaskKey,
        params: serde_json::Value,
    ) -> Result<StartReceipt<S>, EngineError> {
        if !task_key.is_valid() {
            return Err(EngineError::InvalidTaskKey(task_key));
        }
        let lock = self.task_lock(&task_key).await;
        let _guard = lock.lock().await;

        // 前の state はログにしか使わないので、読めなくても start は止めない
        let previous = match self.inner.store.load(&task_key).await {
            Ok(previous) => previous,
            Err(err) => {
                warn!(task_key = %task_key, error = %err, "previous state unreadable; starting fresh");
                None
            }
        };
        let run_id = self.inner.ids.generate_run_id();
        let state = WorkflowState::fresh(task_key.clone(), run_id, params, self.now());
        self.inner.store.save(&state).await?;

        if let Some(prev) = previous {
            info!(
                task_key = %task_key,
                previous_run_id = %prev.run_id,
                previous_step = %prev.current_step,
                previous_progress = ?prev.progress,
                "restarting task"
            );
        }
        self.schedule_next(&task_key, self.inner.config.initial_delay())
            .await?;
        info!(task_key = %task_key, run_id = %run_id, "task started");

        Ok(StartReceipt {
            task_key,
            run_id,
            current_step: state.current_step,
            progress: state.progress,
        })
    }

    /// Timer entry point: advance `task_key` by at most one transition.
    pub async fn tick(&self, task_key: &TaskKey) -> Result<TickReport<S>, EngineError> {
        let lock = self.task_lock(task_key).await;
        let _guard = lock.lock().await;

        let mut state = self
            .inner
            .store
            .load(task_key)
            .await?
            .ok_or_else(|| EngineError::UnknownTask(task_key.clone()))?;
        let running = self.inner.inflight.get(task_key).await;
        let marker_present = running.is_some();

        if let Some(interruption) =
            Interruption::detect(&state, marker_present, self.inner.decider.retry_policy())
        {
            self.recover_interruption(&mut state, interruption).await?;
            self.schedule_next(task_key, self.inner.config.tick_interval())
                .await?;
            return Ok(TickReport {
                action: Action::Wait,
                interrupted: Some(interruption),
                dispatched: None,
            });
        }

        let action = self.inner.decider.decide(&state);
        let delay = match &action {
            Action::ScheduleRetry { delay, .. } => *delay,
            _ => self.inner.config.tick_interval(),
        };
        self.schedule_next(task_key, delay).await?;

        let now = self.now();
        let mut reported = action.clone();
        let mut dispatched = None;
        match action {
            Action::RunStep { step, attempt } if marker_present => {
                // 前の run の handler がまだ動いている（start() で上書きされた直後など）
                debug!(
                    task_key = %task_key,
                    step = %step,
                    attempt,
                    running_step = running.as_ref().map(|m| m.step).unwrap_or("unknown"),
                    running_attempt = running.as_ref().map(|m| m.attempt).unwrap_or(0),
                    "previous handler still in flight; deferring dispatch"
                );
                reported = Action::Wait;
            }
            Action::RunStep { step, attempt } => {
                dispatched = Some(self.dispatch(&mut state, step, attempt).await?);
            }
            Action::ScheduleRetry {
                step,
                attempt,
                delay,
            } => {
                state.schedule_retry(now);
                self.inner.store.save(&state).await?;
                info!(
                    task_key = %task_key,
                    step = %step,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retry scheduled"
                );
                let error = state.error_detail.as_ref().map(|e| e.message.clone());
                self.append_decision(
                    &state,
                    json!({ "step": step.name(), "attempt": attempt, "error": error }),
                    "retry_policy",
                    "schedule_retry",
                    Some(json!({ "delay_ms": delay.as_millis() as u64 })),
                )
                .await?;
            }
            Action::GoIdle { clear_error } => {
                let step = state.current_step;
                state.go_idle(clear_error, now);
                self.inner.store.save(&state).await?;
                if clear_error {
                    info!(task_key = %task_key, run_id = %state.run_id, last_step = %step, "pipeline finished");
                } else {
                    warn!(task_key = %task_key, run_id = %state.run_id, failed_step = %step, "pipeline gave up");
                }
            }
            Action::Wait => {
                debug!(task_key = %task_key, step = %state.current_step, progress = ?state.progress, "nothing to do");
            }
            Action::RaiseAnomaly(anomaly) => {
                let observed = json!({
                    "step": state.current_step.name(),
                    "progress": state.progress,
                    "attempt": state.attempt,
                });
                anomaly.recover(&mut state, now);
                self.inner.store.save(&state).await?;
                warn!(task_key = %task_key, anomaly = %anomaly.describe(), "recovered from anomalous state");
                let decision = match anomaly {
                    Anomaly::IdleWithProgress(_) => "force_idle",
                    Anomaly::StepNeverStarted {
                        exhausted: false, ..
                    } => "schedule_retry",
                    Anomaly::StepNeverStarted { exhausted: true, .. } => "give_up",
                };
                self.append_decision(&state, observed, "anomaly", decision, None)
                    .await?;
            }
        }

        Ok(TickReport {
            action: reported,
            interrupted: None,
            dispatched,
        })
    }

    async fn recover_interruption(
        &self,
        state: &mut WorkflowState<S>,
        interruption: Interruption<S>,
    ) -> Result<(), EngineError> {
        let (step, attempt) = match interruption {
            Interruption::Resumable { step, attempt } | Interruption::Exhausted { step, attempt } => {
                (step, attempt)
            }
        };
        interruption.apply(state, self.now());
        self.inner.store.save(state).await?;
        warn!(
            task_key = %state.task_key,
            run_id = %state.run_id,
            step = %step,
            attempt,
            "{}",
            interruption.describe()
        );
        let decision = match interruption {
            Interruption::Resumable { .. } => "resume",
            Interruption::Exhausted { .. } => "give_up",
        };
        self.append_decision(
            state,
            json!({ "step": step.name(), "attempt": attempt }),
            "interruption",
            decision,
            None,
        )
        .await?;
        Ok(())
    }

    /// Persist the next wake and arm the scheduler. Returns the wake time.
    pub async fn schedule_next(
        &self,
        task_key: &TaskKey,
        delay: Duration,
    ) -> Result<DateTime<Utc>, EngineError> {
        let now = self.now();
        let delta = chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::days(1));
        let at = now.checked_add_signed(delta).unwrap_or(now);
        self.inner.store.save_wake(task_key, at).await?;
        self.inner.wakes.schedule(task_key, at).await;
        debug!(task_key = %task_key, delay_ms = delay.as_millis() as u64, "next wake scheduled");
        Ok(at)
    }

    /// Re-arm every persisted wake; call once on process start.
    ///
    /// Wakes already in the past fire immediately.
    pub async fn resume_wakes(&self) -> Result<usize, EngineError> {
        let wakes = self.inner.store.pending_wakes().await?;
        for (key, at) in &wakes {
            self.inner.wakes.schedule(key, *at).await;
        }
        info!(count = wakes.len(), "resumed persisted wakes");
        Ok(wakes.len())
    }

    /// Dispatch `step` as attempt `attempt` outside the normal tick flow.
    ///
    /// Refuses (returns `None`) while another handler of the task is in flight.
    pub async fn run_step(
        &self,
        task_key: &TaskKey,
        step: S,
        attempt: u32,
    ) -> Result<Option<JoinHandle<()>>, EngineError> {
        let lock = self.task_lock(task_key).await;
        let _guard = lock.lock().await;

        let mut state = self
            .inner
            .store
            .load(task_key)
            .await?
            .ok_or_else(|| EngineError::UnknownTask(task_key.clone()))?;
        if self.inner.inflight.contains(task_key).await {
            return Ok(None);
        }
        Ok(Some(self.dispatch(&mut state, step, attempt).await?))
    }

    /// Mark the step running, persist, set the marker and spawn the handler.
    ///
    /// Caller holds the per-task lock.
    async fn dispatch(
        &self,
        state: &mut WorkflowState<S>,
        step: S,
        attempt: u32,
    ) -> Result<JoinHandle<()>, EngineError> {
        let now = self.now();
        state.begin_attempt(step, attempt, now);
        self.inner.store.save(state).await?;

        let execution = StepExecution {
            run_id: state.run_id,
            step,
            attempt: state.attempt,
        };
        self.inner
            .inflight
            .insert(
                state.task_key.clone(),
                Marker {
                    run_id: execution.run_id,
                    step: step.name(),
                    attempt: execution.attempt,
                    started_at: now,
                },
            )
            .await;
        info!(
            task_key = %state.task_key,
            run_id = %state.run_id,
            step = %step,
            attempt = execution.attempt,
            "step started"
        );

        let ctx = StepContext {
            task_key: state.task_key.clone(),
            run_id: state.run_id,
            step,
            attempt: execution.attempt,
            params: state.params.clone(),
        };
        let handler = self.inner.registry.get(step);
        let engine = self.clone();
        let task_key = state.task_key.clone();
        Ok(tokio::spawn(async move {
            let outcome = execute(handler, ctx).await;
            engine.finish(&task_key, execution, outcome).await;
        }))
    }

    async fn finish(&self, task_key: &TaskKey, execution: StepExecution<S>, outcome: StepOutcome) {
        let lock = self.task_lock(task_key).await;
        let _guard = lock.lock().await;

        self.inner
            .inflight
            .remove(task_key, execution.run_id, execution.attempt)
            .await;
        if let Err(err) = self.record_outcome_locked(task_key, execution, outcome).await {
            // 記録できなかった attempt は running のまま残り、次の tick で interruption 扱いになる
            error!(
                task_key = %task_key,
                step = %execution.step,
                attempt = execution.attempt,
                error = %err,
                "failed to record step outcome"
            );
        }
    }

    /// Write the outcome of `execution` into the stored state.
    ///
    /// Returns false when the outcome is stale (the task was restarted or
    /// moved on) and was dropped.
    pub async fn record_outcome(
        &self,
        task_key: &TaskKey,
        execution: StepExecution<S>,
        outcome: StepOutcome,
    ) -> Result<bool, EngineError> {
        let lock = self.task_lock(task_key).await;
        let _guard = lock.lock().await;
        self.record_outcome_locked(task_key, execution, outcome).await
    }

    async fn record_outcome_locked(
        &self,
        task_key: &TaskKey,
        execution: StepExecution<S>,
        outcome: StepOutcome,
    ) -> Result<bool, EngineError> {
        let Some(mut state) = self.inner.store.load(task_key).await? else {
            warn!(task_key = %task_key, step = %execution.step, "dropping outcome for unknown task");
            return Ok(false);
        };
        let current = state.run_id == execution.run_id
            && state.current_step == ActiveStep::Step(execution.step)
            && state.attempt == execution.attempt
            && state.is_running();
        if !current {
            warn!(
                task_key = %task_key,
                run_id = %execution.run_id,
                step = %execution.step,
                attempt = execution.attempt,
                "dropping stale step outcome"
            );
            return Ok(false);
        }

        let policy = self.inner.decider.retry_policy();
        let definitive = state.record_outcome(&outcome, policy, self.now());
        self.inner.store.save(&state).await?;

        match &outcome {
            StepOutcome::Success => info!(
                task_key = %task_key,
                run_id = %state.run_id,
                step = %execution.step,
                attempt = execution.attempt,
                "step succeeded"
            ),
            StepOutcome::Failure(err) => warn!(
                task_key = %task_key,
                run_id = %state.run_id,
                step = %execution.step,
                attempt = execution.attempt,
                max_attempts = policy.max_attempts,
                error = %err.detail(),
                definitive,
                "step failed"
            ),
        }
        if let (true, StepOutcome::Failure(err)) = (definitive, &outcome) {
            self.append_decision(
                &state,
                json!({
                    "step": execution.step.name(),
                    "attempt": execution.attempt,
                    "error": err.detail(),
                }),
                "retry_policy",
                "exhausted",
                Some(json!({ "max_attempts": policy.max_attempts })),
            )
            .await?;
        }
        Ok(true)
    }

    async fn append_decision(
        &self,
        state: &WorkflowState<S>,
        trigger: serde_json::Value,
        policy: &str,
        decision: &str,
        context: Option<serde_json::Value>,
    ) -> Result<(), StoreError> {
        let mut record = DecisionRecord::new(
            self.inner.ids.generate_decision_id(),
            state.task_key.clone(),
            state.run_id,
            trigger,
            policy,
            decision,
            self.now(),
        );
        if let Some(context) = context {
            record = record.with_context(context);
        }
        self.inner.store.append_decision(&record).await
    }

    pub async fn state(&self, task_key: &TaskKey) -> Result<Option<WorkflowState<S>>, EngineError> {
        Ok(self.inner.store.load(task_key).await?)
    }

    pub async fn status(&self, task_key: &TaskKey) -> Result<Option<StatusView>, EngineError> {
        let Some(state) = self.inner.store.load(task_key).await? else {
            return Ok(None);
        };
        let next_wake = self.inner.store.load_wake(task_key).await?;
        let marker = self.inner.inflight.get(task_key).await;
        Ok(Some(StatusView::from_state(
            &state,
            self.inner.config.max_attempts,
            marker.as_ref(),
            next_wake,
        )))
    }

    pub async fn decisions(&self, task_key: &TaskKey) -> Result<Vec<DecisionRecord>, EngineError> {
        Ok(self.inner.store.decisions(task_key).await?)
    }

    /// Handlers currently executing in this process.
    pub async fn in_flight(&self) -> usize {
        self.inner.inflight.len().await
    }
}

/// Run the handler on its own task so a panic becomes a failure.
async fn execute<S: Step>(
    handler: Option<Arc<dyn StepHandler<S>>>,
    ctx: StepContext<S>,
) -> StepOutcome {
    let Some(handler) = handler else {
        return StepOutcome::Failure(StepError::permanent(format!(
            "no handler registered for step {}",
            ctx.step
        )));
    };
    match tokio::spawn(async move { handler.run(ctx).await }).await {
        Ok(result) => StepOutcome::from(result),
        Err(err) => StepOutcome::Failure(StepError::new(join_error_message(err))),
    }
}

fn join_error_message(err: JoinError) -> String {
    if !err.is_panic() {
        return "handler task was cancelled".to_string();
    }
    let payload = err.into_panic();
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("handler panicked: {msg}")
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("handler panicked: {msg}")
    } else {
        "handler panicked".to_string()
    }
}
