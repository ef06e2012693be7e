//! Errors - エラー型と分類
//!
//! - `StepError`: handler が返す失敗。workflow state に吸収され、呼び出し元には伝播しない
//! - `StoreError`: StateStore の障害
//! - `EngineError`: engine の公開 API が返すエラー

use std::path::PathBuf;

use thiserror::Error;

use super::task::TaskKey;

/// Classification of a step failure.
///
/// The retry budget applies uniformly; the kind only shows up in diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepErrorKind {
    /// 一時的なエラー（リトライで直る見込みあり）
    Transient,
    /// 恒久的なエラー（リトライしても同じ結果になりそう）
    Permanent,
}

/// Failure reported by a step handler.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct StepError {
    kind: StepErrorKind,
    message: String,
}

impl StepError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            kind: StepErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: StepErrorKind::Permanent,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> StepErrorKind {
        self.kind
    }

    /// Message as recorded in `ErrorDetail`.
    pub fn detail(&self) -> String {
        match self.kind {
            StepErrorKind::Transient => self.message.clone(),
            StepErrorKind::Permanent => format!("permanent: {}", self.message),
        }
    }
}

/// State store failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("corrupt record for task_key={0}: {1}")]
    Corrupt(TaskKey, String),
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors returned by the engine's public operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown task_key={0}")]
    UnknownTask(TaskKey),

    #[error("invalid task_key={0:?}: must not be blank")]
    InvalidTaskKey(TaskKey),

    #[error(transparent)]
    Store(#[from] StoreError),
}
