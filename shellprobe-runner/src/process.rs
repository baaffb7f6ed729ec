// Shell process spawning with captured output and a hard timeout

use crate::environment::Environment;
use shellprobe_core::{ProbeError, Result, DEFAULT_MAX_OUTPUT_BYTES};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// How long pipe readers may keep draining after the child is gone.
/// A backgrounded grandchild can hold the pipes open indefinitely.
const READER_GRACE: Duration = Duration::from_millis(100);

pub struct ProcessConfig {
    pub timeout: Option<Duration>,
    pub env: Environment,
    pub working_directory: Option<PathBuf>,
    pub shell: ShellCommand,
    /// Per-stream capture limit; bytes past it are read and discarded
    pub max_output_bytes: usize,
}

impl ProcessConfig {
    /// No timeout, the current process environment, the current directory
    pub fn new(shell: ShellCommand) -> Self {
        Self {
            timeout: None,
            env: Environment::snapshot(),
            working_directory: None,
            shell,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }
}

/// The shell program and the flag that makes it run a command string
#[derive(Debug, Clone, PartialEq)]
pub struct ShellCommand {
    pub program: PathBuf,
    pub flag: &'static str,
}

impl ShellCommand {
    /// Resolve `shell` on PATH, or the platform shell when `None`.
    pub fn resolve(shell: Option<&str>) -> Result<Self> {
        let name = match shell {
            Some(name) => name,
            None if cfg!(target_os = "windows") => "cmd",
            None => "sh",
        };

        let program = which::which(name)
            .map_err(|e| ProbeError::ShellNotFound(format!("{}: {}", name, e)))?;
        let flag = if is_cmd(&program) { "/C" } else { "-c" };

        Ok(Self { program, flag })
    }
}

fn is_cmd(program: &Path) -> bool {
    program
        .file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.eq_ignore_ascii_case("cmd"))
        .unwrap_or(false)
}

/// Raw result of one shell invocation
#[derive(Debug)]
pub struct Captured {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub status: Option<ExitStatus>,
    pub timed_out: bool,
    /// Either stream went past `max_output_bytes`
    pub truncated: bool,
}

/// Run `command` through the configured shell, capturing both streams.
///
/// On timeout the child is killed and whatever it wrote so far is returned
/// with `timed_out` set. Only a failure to start the shell is an error.
pub async fn execute(command: &str, config: &ProcessConfig) -> Result<Captured> {
    let started = Instant::now();
    let shell = &config.shell;

    let mut cmd = Command::new(&shell.program);
    cmd.arg(shell.flag)
        .arg(command)
        .env_clear()
        .envs(config.env.iter())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(dir) = &config.working_directory {
        cmd.current_dir(dir);
    }

    let mut child = cmd.spawn().map_err(|e| {
        ProbeError::Spawn(format!(
            "{} {} {:?}: {}",
            shell.program.display(),
            shell.flag,
            command,
            e
        ))
    })?;

    let max_output = config.max_output_bytes;
    let stdout = child.stdout.take().map(|pipe| PipeReader::spawn(pipe, max_output));
    let stderr = child.stderr.take().map(|pipe| PipeReader::spawn(pipe, max_output));

    let (status, timed_out) = match config.timeout {
        Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
            Ok(status) => (Some(status?), false),
            Err(_) => {
                let timeout_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX);
                warn!(command = %command, timeout_ms, "Command timed out, killing");
                if let Err(e) = child.kill().await {
                    warn!(command = %command, error = %e, "Failed to kill timed out command");
                }
                (None, true)
            }
        },
        None => (Some(child.wait().await?), false),
    };

    // Readers share whatever is left of the timeout, and at least the grace period.
    let drain_until = config
        .timeout
        .and_then(|limit| started.checked_add(limit))
        .filter(|deadline| *deadline > Instant::now() + READER_GRACE)
        .unwrap_or_else(|| Instant::now() + READER_GRACE);

    let (stdout, stdout_truncated) = match stdout {
        Some(reader) => reader.finish(drain_until).await,
        None => (Vec::new(), false),
    };
    let (stderr, stderr_truncated) = match stderr {
        Some(reader) => reader.finish(drain_until).await,
        None => (Vec::new(), false),
    };
    let truncated = stdout_truncated || stderr_truncated;

    if truncated {
        warn!(
            command = %command,
            max_output_bytes = max_output,
            "Command output exceeded the capture limit and was truncated"
        );
    }

    debug!(
        command = %command,
        stdout_bytes = stdout.len(),
        stderr_bytes = stderr.len(),
        "Captured command output"
    );

    Ok(Captured {
        stdout,
        stderr,
        status,
        timed_out,
        truncated,
    })
}

#[derive(Default)]
struct Sink {
    data: Vec<u8>,
    overflowed: bool,
}

/// Drains a pipe in the background into a buffer that survives cancellation
struct PipeReader {
    sink: Arc<Mutex<Sink>>,
    task: JoinHandle<()>,
}

impl PipeReader {
    fn spawn<R>(mut pipe: R, limit: usize) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let sink = Arc::new(Mutex::new(Sink::default()));
        let shared = Arc::clone(&sink);
        let task = tokio::spawn(async move {
            let mut chunk = [0u8; 8192];
            loop {
                match pipe.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => {
                        let mut sink = shared.lock().unwrap_or_else(|e| e.into_inner());
                        let room = limit.saturating_sub(sink.data.len());
                        if n > room {
                            sink.overflowed = true;
                        }
                        let keep = n.min(room);
                        sink.data.extend_from_slice(&chunk[..keep]);
                    }
                    Err(e) => {
                        debug!(error = %e, "Pipe read failed");
                        break;
                    }
                }
            }
        });
        Self { sink, task }
    }

    async fn finish(mut self, deadline: Instant) -> (Vec<u8>, bool) {
        if tokio::time::timeout_at(deadline, &mut self.task).await.is_err() {
            debug!("Pipe still open after command exited, abandoning reader");
            self.task.abort();
        }
        let mut sink = self.sink.lock().unwrap_or_else(|e| e.into_inner());
        (std::mem::take(&mut sink.data), sink.overflowed)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn config(timeout: Option<Duration>) -> ProcessConfig {
        ProcessConfig {
            timeout,
            ..ProcessConfig::new(ShellCommand::resolve(None).unwrap())
        }
    }

    #[test]
    fn test_resolve_default_shell() {
        let shell = ShellCommand::resolve(None).unwrap();
        assert_eq!(shell.flag, "-c");
        assert!(shell.program.is_absolute());
    }

    #[test]
    fn test_resolve_missing_shell() {
        let err = ShellCommand::resolve(Some("definitely-not-a-shell-4f2a")).unwrap_err();
        assert!(matches!(err, ProbeError::ShellNotFound(_)));
    }

    #[tokio::test]
    async fn test_execute_captures_both_streams() {
        let captured = execute("echo out; echo err >&2; exit 3", &config(None))
            .await
            .unwrap();
        assert_eq!(captured.stdout, b"out\n");
        assert_eq!(captured.stderr, b"err\n");
        assert_eq!(captured.status.and_then(|s| s.code()), Some(3));
        assert!(!captured.timed_out);
        assert!(!captured.truncated);
    }

    #[tokio::test]
    async fn test_execute_timeout_keeps_partial_output() {
        let started = std::time::Instant::now();
        let captured = execute(
            "echo before; sleep 5; echo after",
            &config(Some(Duration::from_millis(300))),
        )
        .await
        .unwrap();
        assert!(captured.timed_out);
        assert!(captured.status.is_none());
        assert_eq!(captured.stdout, b"before\n");
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_execute_huge_timeout_does_not_overflow() {
        let captured = execute("echo ok", &config(Some(Duration::MAX)))
            .await
            .unwrap();
        assert_eq!(captured.stdout, b"ok\n");
        assert!(!captured.timed_out);
    }

    #[tokio::test]
    async fn test_execute_uses_only_given_environment() {
        let process = ProcessConfig {
            timeout: Some(Duration::from_secs(5)),
            env: Environment::empty().with_var("ONLY_VAR", "present"),
            ..config(None)
        };
        let captured = execute("echo \"$ONLY_VAR:${CARGO_PKG_NAME:-unset}\"", &process)
            .await
            .unwrap();
        assert_eq!(captured.stdout, b"present:unset\n");
    }

    #[tokio::test]
    async fn test_execute_caps_each_stream() {
        let process = ProcessConfig {
            timeout: Some(Duration::from_secs(10)),
            max_output_bytes: 1000,
            ..config(None)
        };
        let captured = execute("yes | head -c 5000; echo short >&2", &process)
            .await
            .unwrap();
        assert_eq!(captured.stdout.len(), 1000);
        assert!(captured.stdout.starts_with(b"y\ny\n"));
        assert_eq!(captured.stderr, b"short\n");
        assert!(captured.truncated);
        assert_eq!(captured.status.and_then(|s| s.code()), Some(0));
    }

    #[tokio::test]
    async fn test_execute_output_at_limit_is_not_truncated() {
        let process = ProcessConfig {
            max_output_bytes: 6,
            ..config(Some(Duration::from_secs(5)))
        };
        let captured = execute("printf 'abcdef'", &process).await.unwrap();
        assert_eq!(captured.stdout, b"abcdef");
        assert!(!captured.truncated);
    }

    #[tokio::test]
    async fn test_execute_in_missing_directory_fails_to_spawn() {
        let process = ProcessConfig {
            working_directory: Some(PathBuf::from("/nonexistent/shellprobe/dir")),
            ..config(None)
        };
        let err = execute("true", &process).await.unwrap_err();
        assert!(matches!(err, ProbeError::Spawn(_)));
    }
}
