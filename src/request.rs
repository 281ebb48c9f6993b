//! Inbound fix request as posted by the CI webhook.

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoRef {
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub name: String,
}

/// One CI annotation. Purely descriptive; line numbers are passed through as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub start_line: i64,
    #[serde(default)]
    pub end_line: i64,
    #[serde(default)]
    pub annotation_level: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_details: Option<String>,
}

/// Everything needed to reproduce and fix one failing build.
///
/// Absent JSON fields deserialize to empty values; [`FixRequest::validate`]
/// is what rejects them.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixRequest {
    #[serde(default)]
    pub repo: RepoRef,
    #[serde(default)]
    pub head_branch: String,
    #[serde(default)]
    pub head_sha: String,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
    #[serde(default)]
    pub output_summary: String,
    #[serde(default)]
    pub installation_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_run_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_run_url: Option<String>,
}

impl FixRequest {
    /// Reject requests missing any field the pipeline cannot run without, or
    /// whose branch or commit id git could misread.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let required = [
            ("repo.owner", &self.repo.owner),
            ("repo.name", &self.repo.name),
            ("headBranch", &self.head_branch),
            ("headSha", &self.head_sha),
            ("installationToken", &self.installation_token),
        ];
        let missing: Vec<&'static str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(field, _)| *field)
            .collect();

        if !missing.is_empty() {
            return Err(PipelineError::Validation { missing });
        }

        if let Err(reason) = check_branch_name(&self.head_branch) {
            return Err(PipelineError::InvalidField {
                field: "headBranch",
                reason: reason.to_string(),
            });
        }
        if let Err(reason) = check_commit_id(&self.head_sha) {
            return Err(PipelineError::InvalidField {
                field: "headSha",
                reason: reason.to_string(),
            });
        }
        Ok(())
    }

    /// `owner/name`, for logs.
    pub fn slug(&self) -> String {
        format!("{}/{}", self.repo.owner, self.repo.name)
    }
}

/// Git's branch naming rules (`git check-ref-format --branch`). The name is
/// passed to git as an argument, so nothing starting with `-` gets through.
fn check_branch_name(name: &str) -> Result<(), &'static str> {
    if name.starts_with('-') {
        return Err("must not start with '-'");
    }
    if name == "@" || name.contains("@{") {
        return Err("must not be '@' or contain '@{'");
    }
    if name.contains("..") {
        return Err("must not contain '..'");
    }
    let forbidden = |c: char| {
        c.is_ascii_control() || matches!(c, ' ' | '~' | '^' | ':' | '?' | '*' | '[' | '\\')
    };
    if name.chars().any(forbidden) {
        return Err("contains a character git does not allow in ref names");
    }
    if name.ends_with('.') || name.ends_with(".lock") {
        return Err("must not end with '.' or '.lock'");
    }
    if name
        .split('/')
        .any(|component| component.is_empty() || component.starts_with('.'))
    {
        return Err("has an empty path component or one starting with '.'");
    }
    Ok(())
}

/// A full or abbreviated hex object id.
fn check_commit_id(sha: &str) -> Result<(), &'static str> {
    if !(4..=64).contains(&sha.len()) || !sha.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err("must be a hex commit id");
    }
    Ok(())
}

// Hand-written so the installation token can never end up in a log line.
impl fmt::Debug for FixRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixRequest")
            .field("repo", &self.repo)
            .field("head_branch", &self.head_branch)
            .field("head_sha", &self.head_sha)
            .field("annotations", &self.annotations.len())
            .field("output_summary_len", &self.output_summary.len())
            .field("installation_token", &"<redacted>")
            .field("check_run_url", &self.check_run_url)
            .field("workflow_run_url", &self.workflow_run_url)
            .finish()
    }
}
