//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryStateStore**: テスト・demo 用の正本
//! - **JsonFileStateStore**: task ごとの JSON 文書（atomic write）
//! - **TokioWakeQueue**: tokio timer による WakeScheduler

pub mod file_store;
pub mod memory_store;
pub mod tokio_wakes;

// 主要な型を再エクスポート
pub use self::file_store::JsonFileStateStore;
pub use self::memory_store::InMemoryStateStore;
pub use self::tokio_wakes::TokioWakeQueue;
