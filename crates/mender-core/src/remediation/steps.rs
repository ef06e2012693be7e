//! The remediation pipeline's steps and run parameters.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::Step;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemediationStep {
    ProvisionSandbox,
    ReproduceFailure,
    GenerateFix,
    ApplyFix,
    VerifyFix,
    OpenPullRequest,
}

impl Step for RemediationStep {
    const ALL: &'static [Self] = &[
        RemediationStep::ProvisionSandbox,
        RemediationStep::ReproduceFailure,
        RemediationStep::GenerateFix,
        RemediationStep::ApplyFix,
        RemediationStep::VerifyFix,
        RemediationStep::OpenPullRequest,
    ];

    fn name(&self) -> &'static str {
        match self {
            RemediationStep::ProvisionSandbox => "provision_sandbox",
            RemediationStep::ReproduceFailure => "reproduce_failure",
            RemediationStep::GenerateFix => "generate_fix",
            RemediationStep::ApplyFix => "apply_fix",
            RemediationStep::VerifyFix => "verify_fix",
            RemediationStep::OpenPullRequest => "open_pull_request",
        }
    }
}

impl fmt::Display for RemediationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parameters passed to `start()` for one remediation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemediationParams {
    /// e.g. `acme/api`
    pub repository: String,

    /// Branch whose build is failing.
    pub branch: String,

    /// Pull request target; defaults to `branch`.
    #[serde(default)]
    pub base_branch: Option<String>,

    #[serde(default = "default_build_command")]
    pub build_command: String,
}

fn default_build_command() -> String {
    "cargo test".to_string()
}

impl RemediationParams {
    pub fn new(repository: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            branch: branch.into(),
            base_branch: None,
            build_command: default_build_command(),
        }
    }

    pub fn base_branch(&self) -> &str {
        self.base_branch.as_deref().unwrap_or(&self.branch)
    }

    /// Branch the fix is pushed to.
    pub fn fix_branch(&self) -> String {
        format!("mender/fix-{}", self.branch.replace('/', "-"))
    }

    /// Conventional task key for this repository and branch.
    pub fn task_key(&self) -> String {
        format!("{}@{}", self.repository, self.branch)
    }
}
