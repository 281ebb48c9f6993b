//! The fix pipeline
//!
//! Strictly linear: validate, acquire workspace, sync, write context, run the
//! agent (describe, apply), stage, commit (tolerating a no-op), resolve HEAD,
//! push, release workspace. The first failure ends the run; the workspace is
//! released on every path before the outcome is returned.

mod session;


pub use session::Session;

use crate::agent;
use crate::config::Config;
use crate::context;
use crate::error::PipelineError;
use crate::publish;
use crate::redact::Redactor;
use crate::request::FixRequest;
use crate::runner::CommandRunner;
use crate::sync;
use crate::workspace::{Workspace, WorkspaceManager};
use std::sync::Arc;
use tracing::Instrument;

/// Successful end of a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixReport {
    /// The commit this run pushed, if it created one and could resolve its id.
    pub commit_sha: Option<String>,
    /// The agent made no changes; the branch was pushed as it was.
    pub no_changes: bool,
}

pub type PipelineOutcome = Result<FixReport, PipelineError>;

pub struct Pipeline {
    config: Arc<Config>,
    runner: Arc<dyn CommandRunner>,
    workspaces: WorkspaceManager,
}

impl Pipeline {
    pub fn new(config: Arc<Config>, runner: Arc<dyn CommandRunner>) -> Self {
        let workspaces = WorkspaceManager::new(&config.workspace);
        Self {
            config,
            runner,
            workspaces,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run one request to completion and report a single outcome.
    pub async fn run(&self, request: &FixRequest) -> PipelineOutcome {
        let span = tracing::info_span!(
            "fix_build",
            request_id = %uuid::Uuid::new_v4(),
            repo = %request.slug(),
            branch = %request.head_branch,
        );
        self.run_logged(request).instrument(span).await
    }

    async fn run_logged(&self, request: &FixRequest) -> PipelineOutcome {
        let outcome = self.run_bracketed(request).await;
        match &outcome {
            Ok(report) => tracing::info!(
                commit_sha = report.commit_sha.as_deref().unwrap_or(""),
                no_changes = report.no_changes,
                "fix pipeline succeeded"
            ),
            Err(err) => tracing::warn!(code = err.code(), error = %err, "fix pipeline failed"),
        }
        outcome
    }

    async fn run_bracketed(&self, request: &FixRequest) -> PipelineOutcome {
        request.validate()?;
        tracing::info!(sha = %request.head_sha, annotations = request.annotations.len(), "starting fix");

        let workspace = self.workspaces.acquire()?;
        let outcome = self.run_stages(&workspace, request).await;
        workspace.release();
        outcome
    }

    async fn run_stages(&self, workspace: &Workspace, request: &FixRequest) -> PipelineOutcome {
        let redactor = Redactor::new([request.installation_token.as_str()]);
        let session = Session::new(
            self.runner.as_ref(),
            &self.config,
            workspace.path(),
            &redactor,
        );

        sync::sync(&session, request).await?;
        context::materialize(workspace.path(), request)?;
        agent::invoke(&session, agent::FIX_INSTRUCTION).await?;
        let published = publish::publish(&session, &request.head_branch).await?;

        Ok(FixReport {
            commit_sha: published.commit_sha,
            no_changes: published.no_changes,
        })
    }
}
