//! Fixing agent invocation
//!
//! The agent is driven in two non-interactive phases against the workspace:
//! describe the fix, then apply and verify it. Either phase failing ends the
//! request; a half-applied fix is treated the same as no fix.

use crate::config::PROMPT_PLACEHOLDER;
use crate::error::{PipelineError, Step};
use crate::pipeline::Session;
use crate::runner::CommandResult;
use std::path::PathBuf;

/// Instruction given to the agent's describe phase.
pub const FIX_INSTRUCTION: &str = "Fix the failing test(s) or build. \
Read BUILD_FAILURE_CONTEXT.md for the failure output and annotations. \
Apply minimal changes, then run the failing test or build command to verify it passes. \
Do not create a new branch or open a PR.";

/// Make sure the agent binary is resolvable before anything runs it.
///
/// A missing agent is a deployment problem, not a problem with the request,
/// so it gets its own error.
pub fn preflight(session: &Session<'_>) -> Result<PathBuf, PipelineError> {
    let program = &session.config().agent.program;
    match session.runner().locate(program) {
        Some(path) => {
            tracing::debug!(program = %program, path = %path.display(), "agent resolved");
            Ok(path)
        }
        None => {
            tracing::error!(program = %program, "agent not found in PATH");
            Err(PipelineError::ToolUnavailable {
                program: program.clone(),
            })
        }
    }
}

fn expand_args(template: &[String], instruction: &str) -> Vec<String> {
    template
        .iter()
        .map(|arg| arg.replace(PROMPT_PLACEHOLDER, instruction))
        .collect()
}

/// Run both agent phases in the workspace.
pub async fn invoke(
    session: &Session<'_>,
    instruction: &str,
) -> Result<CommandResult, PipelineError> {
    preflight(session)?;
    let agent = &session.config().agent;

    session
        .check(
            Step::Describe,
            session
                .command(&agent.program)
                .args(expand_args(&agent.describe_args, instruction))
                .timeout(agent.timeout()),
        )
        .await?;

    session
        .check(
            Step::Apply,
            session
                .command(&agent.program)
                .args(expand_args(&agent.apply_args, instruction))
                .timeout(agent.timeout()),
        )
        .await
}
