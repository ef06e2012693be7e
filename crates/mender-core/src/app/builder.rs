//! EngineBuilder - engine の構築とワイヤリング
//!
//! # Fail-fast 設計
//! - 全 step に handler が登録されていないと build() できない
//! - config は build() 時に検証する

use std::sync::Arc;

use crate::app::engine::{EngineParts, WorkflowEngine};
use crate::config::{ConfigError, EngineConfig};
use crate::domain::Step;
use crate::pipeline::{RegistryBuilder, RegistryError, StepHandler};
use crate::ports::{Clock, IdGenerator, ManualWakes, StateStore, SystemClock, UlidGenerator, WakeScheduler};

/// EngineBuilder は WorkflowEngine を構築
///
/// # 使用例
/// ```ignore
/// let engine = EngineBuilder::new()
///     .register(Deploy::Build, BuildHandler)?
///     .register(Deploy::Ship, ShipHandler)?
///     .store(Arc::new(InMemoryStateStore::new()))
///     .wakes(wake_queue.clone())
///     .build()?;
/// ```
pub struct EngineBuilder<S: Step> {
    registry: RegistryBuilder<S>,
    store: Option<Arc<dyn StateStore<S>>>,
    wakes: Option<Arc<dyn WakeScheduler>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    config: EngineConfig,
}

/// BuildError は engine 構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("No state store configured. Call `store(...)` before `build()`.")]
    MissingStore,
}

impl<S: Step> EngineBuilder<S> {
    pub fn new() -> Self {
        Self {
            registry: RegistryBuilder::new(),
            store: None,
            wakes: None,
            clock: None,
            ids: None,
            config: EngineConfig::default(),
        }
    }

    /// Handler を登録
    pub fn register<H: StepHandler<S> + 'static>(
        mut self,
        step: S,
        handler: H,
    ) -> Result<Self, RegistryError> {
        self.registry = self.registry.register(step, handler)?;
        Ok(self)
    }

    pub fn register_arc(
        mut self,
        step: S,
        handler: Arc<dyn StepHandler<S>>,
    ) -> Result<Self, RegistryError> {
        self.registry = self.registry.register_arc(step, handler)?;
        Ok(self)
    }

    pub fn store(mut self, store: Arc<dyn StateStore<S>>) -> Self {
        self.store = Some(store);
        self
    }

    /// 省略時は ManualWakes（tick は呼び出し側が手で回す）
    pub fn wakes(mut self, wakes: Arc<dyn WakeScheduler>) -> Self {
        self.wakes = Some(wakes);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// # 検証
    /// - 全 step に handler があるか（RegistryError::MissingHandlers）
    /// - config が妥当か（ConfigError::Invalid）
    /// - store が設定されているか（BuildError::MissingStore）
    pub fn build(self) -> Result<WorkflowEngine<S>, BuildError> {
        let registry = self.registry.build()?;
        self.config.validate()?;
        let store = self.store.ok_or(BuildError::MissingStore)?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));
        let wakes = self.wakes.unwrap_or_else(|| Arc::new(ManualWakes));

        Ok(WorkflowEngine::from_parts(EngineParts {
            store,
            wakes,
            registry: Arc::new(registry),
            clock,
            ids,
            config: self.config,
        }))
    }
}

impl<S: Step> Default for EngineBuilder<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryStateStore;
    use crate::test_support::{Letter, Succeed};

    fn complete() -> EngineBuilder<Letter> {
        let mut builder = EngineBuilder::new();
        for step in Letter::ALL {
            builder = builder.register(*step, Succeed::default()).unwrap();
        }
        builder
    }

    #[test]
    fn test_build_success() {
        let engine = complete()
            .store(Arc::new(InMemoryStateStore::<Letter>::new()))
            .build();
        assert!(engine.is_ok());
    }

    #[test]
    fn test_build_missing_handlers() {
        let engine = EngineBuilder::<Letter>::new()
            .register(Letter::A, Succeed::default())
            .unwrap()
            .store(Arc::new(InMemoryStateStore::<Letter>::new()))
            .build();
        assert!(matches!(
            engine,
            Err(BuildError::Registry(RegistryError::MissingHandlers(missing))) if missing.len() == 5
        ));
    }

    #[test]
    fn test_build_missing_store() {
        assert!(matches!(complete().build(), Err(BuildError::MissingStore)));
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let config = EngineConfig {
            max_attempts: 0,
            ..EngineConfig::default()
        };
        let engine = complete()
            .store(Arc::new(InMemoryStateStore::<Letter>::new()))
            .config(config)
            .build();
        assert!(matches!(engine, Err(BuildError::Config(ConfigError::Invalid(_)))));
    }
}
