//! Remediation pipeline: provision a sandbox, reproduce the failing build,
//! generate and apply a fix, verify it, open a pull request.

pub mod collaborators;
pub mod handlers;
pub mod scripted;
pub mod steps;

pub use collaborators::{
    Collaborators, CommandOutput, FileChange, FixGenerator, FixRequest, Patch, PullRequest,
    Sandbox, SourceControl,
};
pub use handlers::{RemediationHandler, register_all};
pub use steps::{RemediationParams, RemediationStep};
