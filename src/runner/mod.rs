//! Bounded external command execution
//!
//! Every shell-level step of a fix (git and the fixing agent) goes through
//! [`CommandRunner`]. The production implementation is [`ProcessRunner`];
//! tests substitute a scripted fake so orchestration can be exercised without
//! network access or a real agent.

mod process;

#[cfg(test)]
pub(crate) mod fake;

pub use process::ProcessRunner;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment applied to every spawned command.
///
/// Interactive credential prompting is disabled so an auth failure surfaces as
/// a non-zero exit instead of a process blocked on a terminal prompt.
pub fn env_overrides() -> Vec<(String, String)> {
    vec![("GIT_TERMINAL_PROMPT".to_string(), "0".to_string())]
}

/// One subprocess invocation: what to run, where, and for how long at most.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub timeout: Duration,
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(cwd: impl AsRef<Path>, program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.as_ref().to_path_buf(),
            timeout: Duration::from_secs(600),
            env: env_overrides(),
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// `program arg1 arg2 ...` for logs. Callers must redact before emitting.
    pub fn label(&self) -> String {
        let mut label = self.program.clone();
        for arg in &self.args {
            label.push(' ');
            label.push_str(arg);
        }
        label
    }
}

/// How a command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Success,
    /// The process exited unsuccessfully. `code` is `None` when it was ended
    /// by a signal.
    NonZeroExit { code: Option<i32> },
    /// The deadline passed and the process was killed.
    TimedOut { after: Duration },
}

impl CommandOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CommandOutcome::Success)
    }
}

/// Combined stdout/stderr plus the outcome of one run.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub output: Vec<u8>,
    pub outcome: CommandOutcome,
    pub elapsed: Duration,
}

impl CommandResult {
    pub fn output_text(&self) -> String {
        crate::util::lossy_text(&self.output)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to wait for `{program}`: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// The narrow seam between the pipeline and the outside world.
///
/// `run` never retries and never returns before the process it started has
/// terminated.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandResult, RunnerError>;

    /// Resolve an executable the way `PATH` lookup would.
    fn locate(&self, program: &str) -> Option<PathBuf>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_defaults_disable_terminal_prompt() {
        let spec = CommandSpec::new("/tmp", "git");
        assert!(spec
            .env
            .iter()
            .any(|(k, v)| k == "GIT_TERMINAL_PROMPT" && v == "0"));
    }

    #[test]
    fn spec_label_joins_program_and_args() {
        let spec = CommandSpec::new("/tmp", "git").args(["reset", "--hard", "abc123"]);
        assert_eq!(spec.label(), "git reset --hard abc123");
    }

    #[test]
    fn outcome_success_only_for_success() {
        assert!(CommandOutcome::Success.is_success());
        assert!(!CommandOutcome::NonZeroExit { code: Some(1) }.is_success());
        assert!(!CommandOutcome::TimedOut {
            after: Duration::from_secs(1)
        }
        .is_success());
    }
}
