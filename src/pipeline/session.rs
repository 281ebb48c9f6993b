use crate::config::Config;
use crate::error::{FailureReason, PipelineError, Step, StepFailure};
use crate::redact::Redactor;
use crate::runner::{CommandOutcome, CommandResult, CommandRunner, CommandSpec};
use crate::util::{tail_chars, truncate};
use std::path::Path;

const OUTPUT_TAIL_MAX_CHARS: usize = 8_000;
const LABEL_MAX_CHARS: usize = 160;

/// What every stage of one request shares: where to run, how to run, and
/// what must never be printed.
pub struct Session<'a> {
    runner: &'a dyn CommandRunner,
    config: &'a Config,
    workdir: &'a Path,
    redactor: &'a Redactor,
}

impl<'a> Session<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        config: &'a Config,
        workdir: &'a Path,
        redactor: &'a Redactor,
    ) -> Self {
        Self {
            runner,
            config,
            workdir,
            redactor,
        }
    }

    pub fn config(&self) -> &Config {
        self.config
    }

    pub fn runner(&self) -> &dyn CommandRunner {
        self.runner
    }

    pub fn redact(&self, text: &str) -> String {
        self.redactor.redact(text)
    }

    /// A command rooted in the workspace.
    pub fn command(&self, program: &str) -> CommandSpec {
        CommandSpec::new(self.workdir, program)
    }

    /// Run a step and hand back its result whatever the outcome. Only a
    /// failure to start the process is an error here.
    pub async fn run(&self, step: Step, spec: CommandSpec) -> Result<CommandResult, PipelineError> {
        let label = truncate(&self.redact(&spec.label()), LABEL_MAX_CHARS);
        tracing::info!(step = step.name(), command = %label, "running");

        match self.runner.run(&spec).await {
            Ok(result) => {
                tracing::debug!(
                    step = step.name(),
                    elapsed_ms = result.elapsed.as_millis() as u64,
                    outcome = ?result.outcome,
                    "finished"
                );
                Ok(result)
            }
            Err(err) => {
                let message = self.redact(&err.to_string());
                tracing::warn!(step = step.name(), error = %message, "could not start command");
                Err(PipelineError::Step {
                    step,
                    failure: StepFailure {
                        reason: FailureReason::Start(message),
                        output: String::new(),
                    },
                })
            }
        }
    }

    /// Run a step that must succeed.
    pub async fn check(
        &self,
        step: Step,
        spec: CommandSpec,
    ) -> Result<CommandResult, PipelineError> {
        let result = self.run(step, spec).await?;
        if result.outcome.is_success() {
            Ok(result)
        } else {
            Err(self.failure(step, &result))
        }
    }

    /// Turn an unsuccessful result into the pipeline error for `step`.
    pub fn failure(&self, step: Step, result: &CommandResult) -> PipelineError {
        let reason = match result.outcome {
            CommandOutcome::NonZeroExit { code } => FailureReason::Exit(code),
            CommandOutcome::TimedOut { after } => FailureReason::TimedOut(after),
            CommandOutcome::Success => FailureReason::Exit(Some(0)),
        };
        let output = tail_chars(&self.redact(&result.output_text()), OUTPUT_TAIL_MAX_CHARS);
        tracing::warn!(step = step.name(), reason = %reason, output = %output, "step failed");
        PipelineError::Step {
            step,
            failure: StepFailure { reason, output },
        }
    }
}
