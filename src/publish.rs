//! Commit & publish: stage everything, commit, push back to the same branch
//!
//! The push always targets the branch named in the request, spelled as a full
//! `HEAD:refs/heads/<branch>` refspec so git can never read it as an option.
//! There is no force and no rebase-and-retry.

use crate::error::{PipelineError, Step};
use crate::pipeline::Session;
use crate::runner::{CommandOutcome, CommandResult};

pub const COMMIT_MESSAGE: &str = "fix: resolve failing test from CI";

/// What the publish stage did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    /// Id of the commit created by this run, when one was created and resolved.
    pub commit_sha: Option<String>,
    /// The agent left the tree unchanged, so the commit was a no-op.
    pub no_changes: bool,
}

fn is_nothing_to_commit(result: &CommandResult) -> bool {
    matches!(result.outcome, CommandOutcome::NonZeroExit { .. })
        && result.output_text().contains("nothing to commit")
}

pub async fn publish(session: &Session<'_>, branch: &str) -> Result<Published, PipelineError> {
    let git = &session.config().git;

    session
        .check(
            Step::StageChanges,
            session
                .command("git")
                .args(["add", "-A"])
                .timeout(git.add_timeout()),
        )
        .await?;

    let commit = session
        .run(
            Step::Commit,
            session
                .command("git")
                .args([
                    "-c".to_string(),
                    format!("user.name={}", git.author_name),
                    "-c".to_string(),
                    format!("user.email={}", git.author_email),
                    "commit".to_string(),
                    "-m".to_string(),
                    COMMIT_MESSAGE.to_string(),
                ])
                .timeout(git.commit_timeout()),
        )
        .await?;

    let committed = if commit.outcome.is_success() {
        true
    } else if is_nothing_to_commit(&commit) {
        tracing::info!("agent left no changes; nothing to commit");
        false
    } else {
        return Err(session.failure(Step::Commit, &commit));
    };

    let head = resolve_head(session).await;

    session
        .check(
            Step::Push,
            session
                .command("git")
                .args(["push".to_string(), "origin".to_string(), push_refspec(branch)])
                .timeout(git.push_timeout()),
        )
        .await?;

    Ok(Published {
        commit_sha: if committed { head } else { None },
        no_changes: !committed,
    })
}

fn push_refspec(branch: &str) -> String {
    format!("HEAD:refs/heads/{}", branch)
}

/// Current HEAD id, or `None` if it cannot be resolved. Never fatal.
async fn resolve_head(session: &Session<'_>) -> Option<String> {
    let spec = session
        .command("git")
        .args(["rev-parse", "HEAD"])
        .timeout(session.config().git.rev_parse_timeout());

    match session.run(Step::ResolveSha, spec).await {
        Ok(result) if result.outcome.is_success() => {
            let sha = result.output_text().trim().to_string();
            if sha.is_empty() {
                None
            } else {
                tracing::info!(sha = %sha, "resolved HEAD");
                Some(sha)
            }
        }
        Ok(result) => {
            tracing::warn!(outcome = ?result.outcome, "could not resolve HEAD; continuing without it");
            None
        }
        Err(err) => {
            tracing::warn!(error = %err, "could not resolve HEAD; continuing without it");
            None
        }
    }
}
