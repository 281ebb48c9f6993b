use super::{CommandOutcome, CommandResult, CommandRunner, CommandSpec, RunnerError};
use async_trait::async_trait;
use std::io::{self, PipeReader, Read};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;

const DEFAULT_DRAIN_GRACE: Duration = Duration::from_secs(2);
const READ_CHUNK: usize = 8 * 1024;

/// Runs commands as real child processes under a hard deadline.
///
/// stdout and stderr share a single pipe so the captured output keeps the
/// order the process wrote it in. On unix the child leads its own process
/// group, and the whole group is killed on timeout and again after exit, so
/// nothing it started outlives the call. The post-exit kill happens before the
/// leader is reaped.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    drain_grace: Duration,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self {
            drain_grace: DEFAULT_DRAIN_GRACE,
        }
    }
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// How long to keep collecting output after the process has exited.
    pub fn with_drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace = grace;
        self
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandResult, RunnerError> {
        let spawn_err = |source| RunnerError::Spawn {
            program: spec.program.clone(),
            source,
        };
        let wait_err = |source| RunnerError::Wait {
            program: spec.program.clone(),
            source,
        };

        let (reader, writer) = std::io::pipe().map_err(spawn_err)?;
        let stderr_writer = writer.try_clone().map_err(spawn_err)?;

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .current_dir(&spec.cwd)
            .stdin(Stdio::null())
            .stdout(writer)
            .stderr(stderr_writer)
            .kill_on_drop(true);
        for (key, value) in &spec.env {
            command.env(key, value);
        }
        #[cfg(unix)]
        command.process_group(0);

        let start = Instant::now();
        let spawned = command.spawn();
        // The write ends held by `command` must close, or the reader never sees EOF.
        drop(command);
        let mut child = spawned.map_err(spawn_err)?;
        let pgid = child.id();
        let (captured, drained) = spawn_reader(reader);

        // Until the leader is reaped its pid cannot be reused, so `pgid` still
        // names this child's group and nobody else's.
        let exited = tokio::time::timeout(spec.timeout, leader_exit(&mut child)).await;
        let (timed_out, group_pinned) = match exited {
            Ok(Ok(())) => (false, true),
            Ok(Err(err)) => {
                tracing::debug!(program = %spec.program, error = %err, "could not observe exit");
                (false, false)
            }
            Err(_) => {
                tracing::warn!(
                    program = %spec.program,
                    timeout_secs = spec.timeout.as_secs_f64(),
                    "deadline exceeded, killing process"
                );
                if let Some(pgid) = pgid {
                    kill_group(pgid);
                }
                let _ = child.start_kill();
                (true, true)
            }
        };

        // Background descendants would otherwise keep the pipe open.
        if group_pinned {
            if let Some(pgid) = pgid {
                kill_group(pgid);
            }
        }
        let status = child.wait().await.map_err(wait_err)?;

        let outcome = if timed_out {
            CommandOutcome::TimedOut {
                after: spec.timeout,
            }
        } else if status.success() {
            CommandOutcome::Success
        } else {
            CommandOutcome::NonZeroExit {
                code: status.code(),
            }
        };

        if tokio::time::timeout(self.drain_grace, drained).await.is_err() {
            tracing::debug!(program = %spec.program, "output still open after drain grace");
        }

        let output = match captured.lock() {
            Ok(buf) => buf.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };

        Ok(CommandResult {
            output,
            outcome,
            elapsed: start.elapsed(),
        })
    }

    fn locate(&self, program: &str) -> Option<PathBuf> {
        which::which(program).ok()
    }
}

/// Wait for the child to exit without reaping it.
#[cfg(unix)]
async fn leader_exit(child: &mut Child) -> io::Result<()> {
    let pid = child
        .id()
        .ok_or_else(|| io::Error::other("child already reaped"))?;
    tokio::task::spawn_blocking(move || loop {
        // SAFETY: siginfo_t is plain data; waitid only writes into it. WNOWAIT
        // leaves the child waitable, so tokio still reaps it later.
        let rc = unsafe {
            let mut info: libc::siginfo_t = std::mem::zeroed();
            libc::waitid(
                libc::P_PID,
                pid as libc::id_t,
                &mut info,
                libc::WEXITED | libc::WNOWAIT,
            )
        };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    })
    .await
    .map_err(io::Error::other)?
}

#[cfg(not(unix))]
async fn leader_exit(child: &mut Child) -> io::Result<()> {
    child.wait().await.map(|_| ())
}

fn spawn_reader(mut reader: PipeReader) -> (Arc<Mutex<Vec<u8>>>, oneshot::Receiver<()>) {
    let captured = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&captured);
    let (done_tx, done_rx) = oneshot::channel();

    std::thread::spawn(move || {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => match sink.lock() {
                    Ok(mut buf) => buf.extend_from_slice(&chunk[..n]),
                    Err(poisoned) => poisoned.into_inner().extend_from_slice(&chunk[..n]),
                },
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        let _ = done_tx.send(());
    });

    (captured, done_rx)
}

#[cfg(unix)]
fn kill_group(pgid: u32) {
    // SAFETY: killpg only delivers a signal; a group that no longer exists
    // yields ESRCH, which is ignored.
    unsafe {
        libc::killpg(pgid as libc::pid_t, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: u32) {}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::tempdir;

    fn sh(cwd: &Path, script: &str, timeout: Duration) -> CommandSpec {
        CommandSpec::new(cwd, "sh")
            .args(["-c", script])
            .timeout(timeout)
    }

    #[tokio::test]
    async fn combined_output_keeps_write_order() {
        let dir = tempdir().unwrap();
        let spec = sh(
            dir.path(),
            "echo one; echo two 1>&2; echo three",
            Duration::from_secs(10),
        );

        let result = ProcessRunner::new().run(&spec).await.unwrap();

        assert_eq!(result.outcome, CommandOutcome::Success);
        assert_eq!(result.output_text(), "one\ntwo\nthree\n");
    }

    #[tokio::test]
    async fn non_zero_exit_keeps_output_and_code() {
        let dir = tempdir().unwrap();
        let spec = sh(dir.path(), "echo broken 1>&2; exit 3", Duration::from_secs(10));

        let result = ProcessRunner::new().run(&spec).await.unwrap();

        assert_eq!(result.outcome, CommandOutcome::NonZeroExit { code: Some(3) });
        assert!(result.output_text().contains("broken"));
    }

    #[tokio::test]
    async fn deadline_kills_process_and_returns_partial_output() {
        let dir = tempdir().unwrap();
        let timeout = Duration::from_millis(300);
        let spec = sh(dir.path(), "echo started; sleep 30", timeout);

        let result = ProcessRunner::new().run(&spec).await.unwrap();

        assert_eq!(result.outcome, CommandOutcome::TimedOut { after: timeout });
        assert!(result.output_text().contains("started"));
        assert!(
            result.elapsed < Duration::from_secs(5),
            "runner took {:?}",
            result.elapsed
        );
    }

    #[tokio::test]
    async fn background_children_do_not_hold_the_call_open() {
        let dir = tempdir().unwrap();
        let spec = sh(dir.path(), "sleep 30 & echo done", Duration::from_secs(20));

        let result = ProcessRunner::new().run(&spec).await.unwrap();

        assert_eq!(result.outcome, CommandOutcome::Success);
        assert!(result.output_text().contains("done"));
        assert!(result.elapsed < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn terminal_prompt_is_disabled_in_child_env() {
        let dir = tempdir().unwrap();
        let spec = sh(
            dir.path(),
            "printf '%s' \"$GIT_TERMINAL_PROMPT\"",
            Duration::from_secs(10),
        );

        let result = ProcessRunner::new().run(&spec).await.unwrap();

        assert_eq!(result.output_text(), "0");
    }

    #[tokio::test]
    async fn runs_in_requested_directory() {
        let dir = tempdir().unwrap();
        let spec = sh(dir.path(), "pwd", Duration::from_secs(10));

        let result = ProcessRunner::new().run(&spec).await.unwrap();

        let reported = PathBuf::from(result.output_text().trim());
        assert_eq!(
            reported.canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let dir = tempdir().unwrap();
        let spec = CommandSpec::new(dir.path(), "fixbuild-definitely-not-installed");

        let err = ProcessRunner::new().run(&spec).await.unwrap_err();

        assert!(matches!(err, RunnerError::Spawn { .. }));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn exit_is_observed_before_the_leader_is_reaped() {
        let mut child = Command::new("sh")
            .args(["-c", "exit 4"])
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();

        leader_exit(&mut child).await.unwrap();

        let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid)).unwrap();
        assert!(stat.contains(") Z "), "leader already reaped: {}", stat);
        assert_eq!(child.wait().await.unwrap().code(), Some(4));
    }

    #[tokio::test]
    async fn exit_code_survives_deferred_reaping() {
        let dir = tempdir().unwrap();
        let spec = sh(dir.path(), "sleep 0.2; exit 7", Duration::from_secs(10));

        let result = ProcessRunner::new().run(&spec).await.unwrap();

        assert_eq!(result.outcome, CommandOutcome::NonZeroExit { code: Some(7) });
    }

    #[test]
    fn locate_resolves_only_installed_programs() {
        let runner = ProcessRunner::new();
        assert!(runner.locate("sh").is_some());
        assert!(runner.locate("fixbuild-definitely-not-installed").is_none());
    }
}
