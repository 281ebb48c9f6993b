//! Scripted stand-in for git and the fixing agent.

use super::{CommandOutcome, CommandResult, CommandRunner, CommandSpec, RunnerError};
use crate::context::CONTEXT_FILE_NAME;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Ok(String),
    Fail(i32, String),
    Timeout(String),
    SpawnError,
}

impl Reply {
    pub(crate) fn ok(output: &str) -> Self {
        Reply::Ok(output.to_string())
    }

    pub(crate) fn fail(code: i32, output: &str) -> Self {
        Reply::Fail(code, output.to_string())
    }
}

#[derive(Debug)]
struct Rule {
    program: String,
    arg: Option<String>,
    reply: Reply,
}

/// A recorded call, with what its working directory looked like at the time.
#[derive(Debug, Clone)]
pub(crate) struct Call {
    pub spec: CommandSpec,
    pub cwd_existed: bool,
    pub context_file: Option<String>,
}

impl Call {
    pub(crate) fn is(&self, program: &str, arg: &str) -> bool {
        self.spec.program == program && self.spec.args.iter().any(|a| a == arg)
    }
}

/// Matches calls against rules in insertion order; unmatched calls succeed
/// with empty output.
#[derive(Debug, Default)]
pub(crate) struct ScriptedRunner {
    rules: Vec<Rule>,
    installed: Vec<String>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedRunner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Reply to `program` whenever one of its arguments equals `arg`.
    pub(crate) fn on(mut self, program: &str, arg: &str, reply: Reply) -> Self {
        self.rules.push(Rule {
            program: program.to_string(),
            arg: Some(arg.to_string()),
            reply,
        });
        self
    }

    pub(crate) fn installed(mut self, program: &str) -> Self {
        self.installed.push(program.to_string());
        self
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn ran(&self, program: &str, arg: &str) -> bool {
        self.calls().iter().any(|c| c.is(program, arg))
    }

    fn reply_for(&self, spec: &CommandSpec) -> Reply {
        self.rules
            .iter()
            .find(|rule| {
                rule.program == spec.program
                    && rule
                        .arg
                        .as_ref()
                        .map(|arg| spec.args.iter().any(|a| a == arg))
                        .unwrap_or(true)
            })
            .map(|rule| rule.reply.clone())
            .unwrap_or_else(|| Reply::Ok(String::new()))
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandResult, RunnerError> {
        self.calls.lock().unwrap().push(Call {
            spec: spec.clone(),
            cwd_existed: spec.cwd.is_dir(),
            context_file: std::fs::read_to_string(spec.cwd.join(CONTEXT_FILE_NAME)).ok(),
        });

        let (output, outcome) = match self.reply_for(spec) {
            Reply::Ok(out) => (out, CommandOutcome::Success),
            Reply::Fail(code, out) => (out, CommandOutcome::NonZeroExit { code: Some(code) }),
            Reply::Timeout(out) => (
                out,
                CommandOutcome::TimedOut {
                    after: spec.timeout,
                },
            ),
            Reply::SpawnError => {
                return Err(RunnerError::Spawn {
                    program: spec.program.clone(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
                })
            }
        };

        Ok(CommandResult {
            output: output.into_bytes(),
            outcome,
            elapsed: Duration::from_millis(1),
        })
    }

    fn locate(&self, program: &str) -> Option<PathBuf> {
        self.installed
            .iter()
            .any(|p| p == program)
            .then(|| PathBuf::from("/usr/local/bin").join(program))
    }
}
