//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」を定義します。
//! engine は永続化・タイマー・時刻・ID 生成をすべてここ経由で扱い、
//! 実装の詳細（ファイル、tokio の timer など）を知りません。

pub mod clock;
pub mod id_generator;
pub mod state_store;
pub mod wake_scheduler;

// 主要な trait を再エクスポート
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::state_store::{DECISION_HISTORY_LIMIT, StateStore};
pub use self::wake_scheduler::{ManualWakes, WakeScheduler};
