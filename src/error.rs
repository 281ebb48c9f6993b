//! Failure taxonomy for a fix pipeline run
//!
//! Every way a request can end badly is a [`PipelineError`]. Each variant
//! knows its caller-facing code and HTTP status, so the server never has to
//! guess which stage failed.

use axum::http::StatusCode;
use std::fmt;
use std::time::Duration;

/// A single shell-level step of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Clone,
    Checkout,
    Reset,
    Describe,
    Apply,
    StageChanges,
    Commit,
    ResolveSha,
    Push,
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::Clone => "clone",
            Step::Checkout => "checkout branch",
            Step::Reset => "reset",
            Step::Describe => "fix describe",
            Step::Apply => "fix apply",
            Step::StageChanges => "git add",
            Step::Commit => "git commit",
            Step::ResolveSha => "rev-parse",
            Step::Push => "git push",
        }
    }

    /// Caller-facing failure code for this step.
    pub fn failure_code(&self) -> &'static str {
        match self {
            Step::Clone | Step::Checkout | Step::Reset => "sync-failed",
            Step::Describe | Step::Apply => "fix-failed",
            Step::StageChanges | Step::Commit | Step::ResolveSha => "publish-failed",
            Step::Push => "push-failed",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Why a step's command did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    Exit(Option<i32>),
    TimedOut(Duration),
    Start(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Exit(Some(code)) => write!(f, "exit status {}", code),
            FailureReason::Exit(None) => f.write_str("terminated by signal"),
            FailureReason::TimedOut(after) => {
                write!(f, "command timed out after {}s", after.as_secs_f64())
            }
            FailureReason::Start(err) => write!(f, "could not run command: {}", err),
        }
    }
}

/// A failed step: the reason plus the redacted tail of what it printed.
#[derive(Debug, Clone)]
pub struct StepFailure {
    pub reason: FailureReason,
    pub output: String,
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.reason.fmt(f)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("missing required fields: {}", .missing.join(", "))]
    Validation { missing: Vec<&'static str> },

    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("{program} CLI not available in PATH; add {program} to the server image")]
    ToolUnavailable { program: String },

    #[error("failed to create work dir: {0}")]
    WorkspaceUnavailable(#[source] std::io::Error),

    #[error("{step} failed: {failure}")]
    Step { step: Step, failure: StepFailure },

    #[error("failed to write context file: {0}")]
    ContextWrite(#[source] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::Validation { .. } | PipelineError::InvalidField { .. } => "validation",
            PipelineError::ToolUnavailable { .. } => "tool-unavailable",
            PipelineError::WorkspaceUnavailable(_) => "workspace-unavailable",
            PipelineError::Step { step, .. } => step.failure_code(),
            PipelineError::ContextWrite(_) => "context-write-failed",
            PipelineError::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            PipelineError::Validation { .. } | PipelineError::InvalidField { .. } => {
                StatusCode::BAD_REQUEST
            }
            PipelineError::ToolUnavailable { .. } => StatusCode::NOT_IMPLEMENTED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Captured command output, when the failure came from a command.
    pub fn output(&self) -> Option<&str> {
        match self {
            PipelineError::Step { failure, .. } if !failure.output.is_empty() => {
                Some(failure.output.as_str())
            }
            _ => None,
        }
    }
}
