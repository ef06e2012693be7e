//! Collaborator ports used by the remediation steps.
//!
//! container 実行・パッチ生成・git/PR は外部システムの責務です。
//! ここでは handler から見える最小限の interface だけを定義します。

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{StepError, TaskKey};

use super::steps::RemediationParams;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stdout and stderr joined, for logs handed to the fix generator.
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
        }
    }
}

/// An isolated checkout of the repository, one per task key.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Create (or recreate) the sandbox with `params.branch` checked out.
    async fn provision(&self, key: &TaskKey, params: &RemediationParams) -> Result<(), StepError>;

    async fn run(&self, key: &TaskKey, command: &str) -> Result<CommandOutput, StepError>;

    async fn read_file(&self, key: &TaskKey, path: &str) -> Result<Option<String>, StepError>;

    async fn write_file(&self, key: &TaskKey, path: &str, contents: &str) -> Result<(), StepError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixRequest {
    pub repository: String,
    pub branch: String,
    pub build_command: String,
    pub failure_log: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub contents: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    pub summary: String,
    pub changes: Vec<FileChange>,
}

/// Proposes a patch for a failure log (an AI text-generation service in practice).
#[async_trait]
pub trait FixGenerator: Send + Sync {
    async fn propose_fix(&self, request: &FixRequest) -> Result<Patch, StepError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub repository: String,
    pub head: String,
    pub base: String,
    pub title: String,
    pub body: String,
}

#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Commit the sandbox's changes onto `branch` and push. Returns the commit id.
    async fn commit_and_push(
        &self,
        key: &TaskKey,
        branch: &str,
        message: &str,
    ) -> Result<String, StepError>;

    /// Returns the pull request URL.
    async fn open_pull_request(&self, request: &PullRequest) -> Result<String, StepError>;
}

/// Everything the remediation handlers depend on.
#[derive(Clone)]
pub struct Collaborators {
    pub sandbox: Arc<dyn Sandbox>,
    pub fixer: Arc<dyn FixGenerator>,
    pub scm: Arc<dyn SourceControl>,
}
