//! StepRegistry - step と handler の対応表
//!
//! - step の並びは `Step::ALL` で固定（登録順ではない）
//! - 全 step に handler が揃っていないと build() できない（fail-fast）

use std::collections::HashMap;
use std::sync::Arc;

use super::handler::StepHandler;
use crate::domain::Step;

/// RegistryError は登録・構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Handler for step '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("Missing handlers for steps: {0:?}. Every step must have a handler before the engine starts.")]
    MissingHandlers(Vec<String>),

    #[error("Pipeline has no steps")]
    EmptyPipeline,
}

/// Immutable step -> handler table.
///
/// 構築後は変更不可。engine は `Arc<StepRegistry<S>>` で共有します。
pub struct StepRegistry<S: Step> {
    handlers: HashMap<S, Arc<dyn StepHandler<S>>>,
}

impl<S: Step> StepRegistry<S> {
    pub fn builder() -> RegistryBuilder<S> {
        RegistryBuilder::new()
    }

    pub fn get(&self, step: S) -> Option<Arc<dyn StepHandler<S>>> {
        self.handlers.get(&step).cloned()
    }

    /// Steps in execution order.
    pub fn steps(&self) -> &'static [S] {
        S::ALL
    }

    pub fn first(&self) -> Option<S> {
        S::first()
    }

    pub fn next(&self, step: S) -> Option<S> {
        step.next()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// RegistryBuilder で handler を登録
///
/// # 使用例
/// ```ignore
/// let registry = StepRegistry::builder()
///     .register(Deploy::Build, BuildHandler)?
///     .register(Deploy::Ship, ShipHandler)?
///     .build()?;
/// ```
pub struct RegistryBuilder<S: Step> {
    handlers: HashMap<S, Arc<dyn StepHandler<S>>>,
}

impl<S: Step> RegistryBuilder<S> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register<H: StepHandler<S> + 'static>(
        self,
        step: S,
        handler: H,
    ) -> Result<Self, RegistryError> {
        self.register_arc(step, Arc::new(handler))
    }

    pub fn register_arc(
        mut self,
        step: S,
        handler: Arc<dyn StepHandler<S>>,
    ) -> Result<Self, RegistryError> {
        if self.handlers.contains_key(&step) {
            return Err(RegistryError::AlreadyRegistered(step.name().to_string()));
        }
        self.handlers.insert(step, handler);
        Ok(self)
    }

    /// # 検証
    /// - `S::ALL` が空なら EmptyPipeline
    /// - handler のない step があれば MissingHandlers（`S::ALL` の順）
    pub fn build(self) -> Result<StepRegistry<S>, RegistryError> {
        if S::ALL.is_empty() {
            return Err(RegistryError::EmptyPipeline);
        }
        let missing: Vec<String> = S::ALL
            .iter()
            .filter(|step| !self.handlers.contains_key(*step))
            .map(|step| step.name().to_string())
            .collect();
        if !missing.is_empty() {
            return Err(RegistryError::MissingHandlers(missing));
        }
        Ok(StepRegistry {
            handlers: self.handlers,
        })
    }
}

impl<S: Step> Default for RegistryBuilder<S> {
    fn default() -> Self {
        Self::new()
    }
}
