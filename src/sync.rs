//! Repository sync: shallow clone, checkout, hard reset to the failing commit

use crate::error::{FailureReason, PipelineError, Step, StepFailure};
use crate::pipeline::Session;
use crate::request::FixRequest;
use crate::runner::CommandResult;
use url::Url;

const TOKEN_USER: &str = "x-access-token";

/// Token-authenticated clone URL: `<host>/<owner>/<name>.git` with the
/// installation token as userinfo.
pub fn clone_url(host: &str, owner: &str, name: &str, token: &str) -> Result<Url, String> {
    let mut url = Url::parse(host).map_err(|e| format!("invalid git host '{}': {}", host, e))?;
    url.set_username(TOKEN_USER)
        .map_err(|_| format!("git host '{}' cannot carry credentials", host))?;
    url.set_password(Some(token))
        .map_err(|_| format!("git host '{}' cannot carry credentials", host))?;
    url.path_segments_mut()
        .map_err(|_| format!("git host '{}' cannot hold a repository path", host))?
        .pop_if_empty()
        .push(owner)
        .push(&format!("{}.git", name));
    Ok(url)
}

/// Put the workspace at exactly the failing commit.
///
/// The clone depth is fixed; if `head_sha` is deeper than that below the
/// branch tip, the reset fails and so does the sync.
pub async fn sync(session: &Session<'_>, request: &FixRequest) -> Result<CommandResult, PipelineError> {
    let git = &session.config().git;
    let url = clone_url(
        &git.host,
        &request.repo.owner,
        &request.repo.name,
        &request.installation_token,
    )
    .map_err(|message| PipelineError::Step {
        step: Step::Clone,
        failure: StepFailure {
            reason: FailureReason::Start(session.redact(&message)),
            output: String::new(),
        },
    })?;

    session
        .check(
            Step::Clone,
            session
                .command("git")
                .args([
                    "clone".to_string(),
                    "--depth".to_string(),
                    git.clone_depth.to_string(),
                    url.to_string(),
                    ".".to_string(),
                ])
                .timeout(git.clone_timeout()),
        )
        .await?;

    session
        .check(
            Step::Checkout,
            session
                .command("git")
                .args(["checkout", request.head_branch.as_str()])
                .timeout(git.checkout_timeout()),
        )
        .await?;

    session
        .check(
            Step::Reset,
            session
                .command("git")
                .args(["reset", "--hard", request.head_sha.as_str()])
                .timeout(git.reset_timeout()),
        )
        .await
}
