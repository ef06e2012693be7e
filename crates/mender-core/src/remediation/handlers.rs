//! Step handlers: thin adapters from a `StepContext` to the collaborators.
//!
//! 各 step は sandbox の中に成果物を残し、次の step はそれを読みます：
//! - reproduce_failure -> `.mender/failure.log`
//! - generate_fix      -> `.mender/patch.json`
//! - open_pull_request -> `.mender/pull_request`

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::collaborators::{Collaborators, FixRequest, Patch, PullRequest};
use super::steps::{RemediationParams, RemediationStep};
use crate::app::EngineBuilder;
use crate::domain::{Step, StepError};
use crate::pipeline::{RegistryError, StepContext, StepHandler};

pub const FAILURE_LOG_PATH: &str = ".mender/failure.log";
pub const PATCH_PATH: &str = ".mender/patch.json";
pub const PULL_REQUEST_PATH: &str = ".mender/pull_request";

pub struct RemediationHandler {
    collaborators: Collaborators,
}

impl RemediationHandler {
    pub fn new(collaborators: Collaborators) -> Self {
        Self { collaborators }
    }

    async fn provision(&self, ctx: &StepContext<RemediationStep>, params: &RemediationParams) -> Result<(), StepError> {
        self.collaborators.sandbox.provision(&ctx.task_key, params).await
    }

    async fn reproduce(&self, ctx: &StepContext<RemediationStep>, params: &RemediationParams) -> Result<(), StepError> {
        let sandbox = &self.collaborators.sandbox;
        let output = sandbox.run(&ctx.task_key, &params.build_command).await?;
        if output.success() {
            return Err(StepError::permanent(format!(
                "`{}` passes on {}; nothing to remediate",
                params.build_command, params.branch
            )));
        }
        info!(task_key = %ctx.task_key, exit_code = output.exit_code, "failure reproduced");
        sandbox
            .write_file(&ctx.task_key, FAILURE_LOG_PATH, &output.combined())
            .await
    }

    async fn generate(&self, ctx: &StepContext<RemediationStep>, params: &RemediationParams) -> Result<(), StepError> {
        let sandbox = &self.collaborators.sandbox;
        let failure_log = sandbox
            .read_file(&ctx.task_key, FAILURE_LOG_PATH)
            .await?
            .ok_or_else(|| StepError::new("failure log missing from sandbox"))?;
        let request = FixRequest {
            repository: params.repository.clone(),
            branch: params.branch.clone(),
            build_command: params.build_command.clone(),
            failure_log,
        };
        let patch = self.collaborators.fixer.propose_fix(&request).await?;
        if patch.changes.is_empty() {
            return Err(StepError::new("fix generator returned an empty patch"));
        }
        info!(task_key = %ctx.task_key, files = patch.changes.len(), summary = %patch.summary, "fix proposed");
        let encoded = serde_json::to_string(&patch)
            .map_err(|e| StepError::permanent(format!("encode patch: {e}")))?;
        sandbox.write_file(&ctx.task_key, PATCH_PATH, &encoded).await
    }

    async fn load_patch(&self, ctx: &StepContext<RemediationStep>) -> Result<Patch, StepError> {
        let raw = self
            .collaborators
            .sandbox
            .read_file(&ctx.task_key, PATCH_PATH)
            .await?
            .ok_or_else(|| StepError::new("patch missing from sandbox"))?;
        serde_json::from_str(&raw).map_err(|e| StepError::new(format!("decode patch: {e}")))
    }

    async fn apply(&self, ctx: &StepContext<RemediationStep>) -> Result<(), StepError> {
        let patch = self.load_patch(ctx).await?;
        for change in &patch.changes {
            self.collaborators
                .sandbox
                .write_file(&ctx.task_key, &change.path, &change.contents)
                .await?;
        }
        Ok(())
    }

    async fn verify(&self, ctx: &StepContext<RemediationStep>, params: &RemediationParams) -> Result<(), StepError> {
        let output = self
            .collaborators
            .sandbox
            .run(&ctx.task_key, &params.build_command)
            .await?;
        if !output.success() {
            return Err(StepError::new(format!(
                "`{}` still fails after the fix (exit {})",
                params.build_command, output.exit_code
            )));
        }
        Ok(())
    }

    async fn open_pull_request(
        &self,
        ctx: &StepContext<RemediationStep>,
        params: &RemediationParams,
    ) -> Result<(), StepError> {
        let patch = self.load_patch(ctx).await?;
        let head = params.fix_branch();
        let scm = &self.collaborators.scm;
        let commit = scm
            .commit_and_push(&ctx.task_key, &head, &patch.summary)
            .await?;
        let request = PullRequest {
            repository: params.repository.clone(),
            head,
            base: params.base_branch().to_string(),
            title: format!("Fix failing build on {}", params.branch),
            body: format!(
                "{}\n\nCommit {commit} makes `{}` pass again.",
                patch.summary, params.build_command
            ),
        };
        let url = scm.open_pull_request(&request).await?;
        info!(task_key = %ctx.task_key, url = %url, "pull request opened");
        self.collaborators
            .sandbox
            .write_file(&ctx.task_key, PULL_REQUEST_PATH, &url)
            .await
    }
}

#[async_trait]
impl StepHandler<RemediationStep> for RemediationHandler {
    async fn run(&self, ctx: StepContext<RemediationStep>) -> Result<(), StepError> {
        let params: RemediationParams = ctx.params_as()?;
        match ctx.step {
            RemediationStep::ProvisionSandbox => self.provision(&ctx, &params).await,
            RemediationStep::ReproduceFailure => self.reproduce(&ctx, &params).await,
            RemediationStep::GenerateFix => self.generate(&ctx, &params).await,
            RemediationStep::ApplyFix => self.apply(&ctx).await,
            RemediationStep::VerifyFix => self.verify(&ctx, &params).await,
            RemediationStep::OpenPullRequest => self.open_pull_request(&ctx, &params).await,
        }
    }
}

/// Register one shared handler for every remediation step.
pub fn register_all(
    builder: EngineBuilder<RemediationStep>,
    collaborators: Collaborators,
) -> Result<EngineBuilder<RemediationStep>, RegistryError> {
    let handler: Arc<dyn StepHandler<RemediationStep>> =
        Arc::new(RemediationHandler::new(collaborators));
    RemediationStep::ALL
        .iter()
        .try_fold(builder, |builder, step| {
            builder.register_arc(*step, Arc::clone(&handler))
        })
}
