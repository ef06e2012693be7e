//! StepHandler trait - step 本体を実行する callback の定義

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{RunId, Step, StepError, TaskKey};

/// Snapshot handed to a handler when its step is dispatched.
///
/// handler は workflow state を直接触りません。結果は戻り値だけで返します。
#[derive(Debug, Clone)]
pub struct StepContext<S> {
    pub task_key: TaskKey,
    pub run_id: RunId,
    pub step: S,
    pub attempt: u32,
    pub params: serde_json::Value,
}

impl<S: Step> StepContext<S> {
    /// Deserialize the run's params into a concrete type.
    pub fn params_as<P: serde::de::DeserializeOwned>(&self) -> Result<P, StepError> {
        serde_json::from_value(self.params.clone())
            .map_err(|e| StepError::permanent(format!("invalid params: {e}")))
    }
}

/// Handler は 1 つの step を実行する
///
/// # 使用例
/// ```ignore
/// struct Provision;
///
/// #[async_trait]
/// impl StepHandler<MyStep> for Provision {
///     async fn run(&self, ctx: StepContext<MyStep>) -> Result<(), StepError> {
///         tracing::info!(task_key = %ctx.task_key, "provisioning");
///         Ok(())
///     }
/// }
/// ```
///
/// - `Ok(())` は success、`Err` は failure として記録される
/// - panic も failure として扱われる（呼び出し元には伝播しない）
#[async_trait]
pub trait StepHandler<S: Step>: Send + Sync {
    async fn run(&self, ctx: StepContext<S>) -> Result<(), StepError>;
}

#[async_trait]
impl<S: Step, H: StepHandler<S> + ?Sized> StepHandler<S> for Arc<H> {
    async fn run(&self, ctx: StepContext<S>) -> Result<(), StepError> {
        (**self).run(ctx).await
    }
}
