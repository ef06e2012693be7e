//! App - アプリケーション層
//!
//! ports を組み合わせて workflow engine を実装します。
//!
//! # 主要コンポーネント
//! - **EngineBuilder**: engine の構築とワイヤリング（fail-fast 検証）
//! - **WorkflowEngine**: start / tick / outcome 記録
//! - **InFlight**: プロセス内の実行中 marker
//! - **TickLoop**: wake queue から tick を回す driver
//! - **StatusView**: poll 用 snapshot

pub mod builder;
pub mod engine;
pub mod inflight;
pub mod status;
pub mod tick_loop;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, EngineBuilder};
pub use self::engine::{StartReceipt, StepExecution, TickReport, WorkflowEngine};
pub use self::inflight::{InFlight, Marker};
pub use self::status::{StatusError, StatusView};
pub use self::tick_loop::TickLoop;
