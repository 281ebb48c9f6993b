//! Failure context handed to the fixing agent
//!
//! The webhook payload reaches the agent only through this markdown file at
//! the workspace root. Annotations keep the order they arrived in. The file is
//! listed in the clone's `.git/info/exclude`, so `git add -A` never stages it
//! and it never reaches the pushed branch.

use crate::error::PipelineError;
use crate::request::{Annotation, FixRequest};
use std::fmt::Write as _;
use std::fs::{self, OpenOptions};
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};

pub const CONTEXT_FILE_NAME: &str = "BUILD_FAILURE_CONTEXT.md";

fn present(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

/// Render the context document for `request`.
pub fn render(request: &FixRequest) -> String {
    let mut out = String::new();
    out.push_str("# Build failure context\n\n");

    if !request.output_summary.is_empty() {
        out.push_str("## Output summary\n\n");
        out.push_str(&request.output_summary);
        out.push_str("\n\n");
    }
    if let Some(url) = present(request.check_run_url.as_deref()) {
        let _ = write!(out, "Check run: {}\n\n", url);
    }
    if let Some(url) = present(request.workflow_run_url.as_deref()) {
        let _ = write!(out, "Workflow run: {}\n\n", url);
    }

    if !request.annotations.is_empty() {
        out.push_str("## Annotations\n\n");
        for annotation in &request.annotations {
            render_annotation(&mut out, annotation);
        }
    }
    out
}

fn render_annotation(out: &mut String, annotation: &Annotation) {
    let _ = writeln!(
        out,
        "- **{}** (lines {}-{}): {}",
        annotation.path, annotation.start_line, annotation.end_line, annotation.message
    );
    if let Some(title) = present(annotation.title.as_deref()) {
        let _ = writeln!(out, "  - {}", title);
    }
    if let Some(details) = present(annotation.raw_details.as_deref()) {
        out.push_str("  - Details:\n");
        for line in details.split('\n') {
            out.push_str("    ");
            out.push_str(line);
            out.push('\n');
        }
    }
}

/// Write the context file into the workspace and return its path.
pub fn materialize(workdir: &Path, request: &FixRequest) -> Result<PathBuf, PipelineError> {
    let path = workdir.join(CONTEXT_FILE_NAME);
    fs::write(&path, render(request)).map_err(PipelineError::ContextWrite)?;
    exclude_from_git(workdir).map_err(PipelineError::ContextWrite)?;
    tracing::debug!(
        path = %path.display(),
        annotations = request.annotations.len(),
        "context written"
    );
    Ok(path)
}

/// Add the context file to the repository's local exclude list. A no-op
/// outside a git checkout, and when the entry is already there.
fn exclude_from_git(workdir: &Path) -> io::Result<()> {
    let git_dir = workdir.join(".git");
    if !git_dir.is_dir() {
        return Ok(());
    }
    let info = git_dir.join("info");
    fs::create_dir_all(&info)?;
    let exclude = info.join("exclude");

    let existing = match fs::read_to_string(&exclude) {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => String::new(),
        Err(err) => return Err(err),
    };
    let pattern = format!("/{}", CONTEXT_FILE_NAME);
    if existing.lines().any(|line| line.trim() == pattern) {
        return Ok(());
    }

    let mut file = OpenOptions::new().create(true).append(true).open(&exclude)?;
    if !existing.is_empty() && !existing.ends_with('\n') {
        writeln!(file)?;
    }
    writeln!(file, "{}", pattern)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::tests::sample_request;
    use pretty_assertions::assert_eq;

    #[test]
    fn renders_summary_and_annotation_bullet() {
        let rendered = render(&sample_request());
        assert_eq!(
            rendered,
            "# Build failure context\n\
             \n\
             ## Output summary\n\
             \n\
             build failed: type error\n\
             \n\
             ## Annotations\n\
             \n\
             - **src/x.go** (lines 10-12): type mismatch\n"
        );
    }

    #[test]
    fn renders_links_title_and_indented_details() {
        let mut request = sample_request();
        request.output_summary.clear();
        request.check_run_url = Some("https://github.com/acme/widgets/runs/7".to_string());
        request.workflow_run_url = Some("https://github.com/acme/widgets/actions/runs/9".to_string());
        request.annotations[0].title = Some("Type error".to_string());
        request.annotations[0].raw_details = Some("expected int\n  got string".to_string());

        assert_eq!(
            render(&request),
            "# Build failure context\n\
             \n\
             Check run: https://github.com/acme/widgets/runs/7\n\
             \n\
             Workflow run: https://github.com/acme/widgets/actions/runs/9\n\
             \n\
             ## Annotations\n\
             \n\
             - **src/x.go** (lines 10-12): type mismatch\n  \
             - Type error\n  \
             - Details:\n    \
             expected int\n      \
             got string\n"
        );
    }

    #[test]
    fn empty_optional_values_are_skipped() {
        let mut request = sample_request();
        request.check_run_url = Some(String::new());
        request.annotations[0].title = Some(String::new());
        request.annotations.clear();

        let rendered = render(&request);

        assert!(!rendered.contains("Check run"));
        assert!(!rendered.contains("## Annotations"));
    }

    #[test]
    fn annotation_order_is_preserved() {
        let mut request = sample_request();
        let mut second = request.annotations[0].clone();
        second.path = "a_first_alphabetically.go".to_string();
        request.annotations.push(second.clone());
        request.annotations.push(second);

        let rendered = render(&request);

        let x = rendered.find("src/x.go").unwrap();
        let a = rendered.find("a_first_alphabetically.go").unwrap();
        assert!(x < a);
        assert_eq!(rendered.matches("a_first_alphabetically.go").count(), 2);
    }

    #[test]
    fn materialize_writes_well_known_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = materialize(dir.path(), &sample_request()).unwrap();
        assert_eq!(path, dir.path().join(CONTEXT_FILE_NAME));
        assert_eq!(fs::read_to_string(path).unwrap(), render(&sample_request()));
    }

    #[test]
    fn materialize_excludes_file_from_checkout_once() {
        let dir = tempfile::tempdir().unwrap();
        let info = dir.path().join(".git/info");
        fs::create_dir_all(&info).unwrap();
        fs::write(info.join("exclude"), "# local ignores\n*.swp").unwrap();

        materialize(dir.path(), &sample_request()).unwrap();
        materialize(dir.path(), &sample_request()).unwrap();

        assert_eq!(
            fs::read_to_string(info.join("exclude")).unwrap(),
            "# local ignores\n*.swp\n/BUILD_FAILURE_CONTEXT.md\n"
        );
    }

    #[test]
    fn materialize_creates_missing_info_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join(".git")).unwrap();

        materialize(dir.path(), &sample_request()).unwrap();

        assert_eq!(
            fs::read_to_string(dir.path().join(".git/info/exclude")).unwrap(),
            "/BUILD_FAILURE_CONTEXT.md\n"
        );
    }

    #[test]
    fn materialize_outside_checkout_writes_no_git_metadata() {
        let dir = tempfile::tempdir().unwrap();
        materialize(dir.path(), &sample_request()).unwrap();
        assert!(!dir.path().join(".git").exists());
    }

    #[test]
    fn materialize_into_missing_dir_is_context_write_error() {
        let dir = tempfile::tempdir().unwrap();
        let gone = dir.path().join("gone");
        let err = materialize(&gone, &sample_request()).unwrap_err();
        assert_eq!(err.code(), "context-write-failed");
    }
}
