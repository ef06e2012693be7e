//! mender-core
//!
//! Durable, tick-driven workflow engine for automated build remediation.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task, step, state, retry, decision, outcome, interruption, errors）
//! - **ports**: 抽象化レイヤー（StateStore, WakeScheduler, Clock, IdGenerator）
//! - **pipeline**: StepHandler と StepRegistry
//! - **app**: engine 本体（builder, engine, inflight, status, tick_loop）
//! - **impls**: 実装（InMemoryStateStore, JsonFileStateStore, TokioWakeQueue）
//! - **remediation**: 6-step の remediation pipeline と collaborator ports
//! - **config**: TOML で読む engine 設定

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod pipeline;
pub mod ports;
pub mod remediation;

#[cfg(test)]
mod test_support;
