//! Interpreter runner
//!
//! Writes the submission into a fresh temp directory, starts the configured
//! interpreter on it and races the child against the wall-clock deadline.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{RunLimits, RunOutcome, Runner};
use crate::core::languages::LanguageConfig;
use crate::core::Verdict;
use crate::error::ExecutionError;

/// Bytes kept from each of stdout/stderr. Anything beyond is drained and dropped.
const MAX_CAPTURE_BYTES: usize = 8 * 1024 * 1024;

/// How long output readers may keep going once the child is gone.
/// Something outside the process group can hold the pipes open indefinitely.
const CAPTURE_GRACE: Duration = Duration::from_millis(200);

type Captured = Arc<Mutex<Vec<u8>>>;

/// Runner that starts submissions with a single interpreter
#[derive(Debug, Clone)]
pub struct InterpreterRunner {
    language: LanguageConfig,
}

impl InterpreterRunner {
    pub fn new(language: LanguageConfig) -> Self {
        Self { language }
    }

    pub fn language(&self) -> &LanguageConfig {
        &self.language
    }

    async fn execute_in(
        &self,
        work_dir: &Path,
        limits: &RunLimits,
        source_code: &str,
        stdin: &[u8],
    ) -> Result<RunOutcome, ExecutionError> {
        let source_path = work_dir.join(&self.language.source_file);
        fs::write(&source_path, source_code)
            .await
            .map_err(ExecutionError::Workspace)?;

        let mut perms = fs::metadata(&source_path)
            .await
            .map_err(ExecutionError::Workspace)?
            .permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&source_path, perms)
            .await
            .map_err(ExecutionError::Workspace)?;

        let (program, args) = self
            .language
            .run_command
            .split_first()
            .ok_or(ExecutionError::EmptyCommand)?;

        // Own process group so a timeout also takes down anything the submission forked
        let mut child = Command::new(program)
            .args(args)
            .current_dir(work_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExecutionError::Spawn {
                program: program.clone(),
                source,
            })?;

        let pgid = child.id().map(|pid| Pid::from_raw(pid as i32));

        let feeder = child.stdin.take().map(|mut pipe| {
            let input = stdin.to_vec();
            tokio::spawn(async move {
                // The child may exit without reading its input
                if let Err(e) = pipe.write_all(&input).await {
                    debug!("stdin not fully consumed: {}", e);
                }
            })
        });
        let stdout = spawn_capture(child.stdout.take());
        let stderr = spawn_capture(child.stderr.take());

        let exited: Option<ExitStatus> = tokio::select! {
            status = child.wait() => Some(status.map_err(ExecutionError::Wait)?),
            _ = tokio::time::sleep(limits.time_limit) => None,
        };

        let verdict = match exited {
            Some(status) if status.success() => Verdict::Ok,
            Some(status) => {
                debug!("Submission exited with {}", status);
                Verdict::RuntimeError
            }
            None => match terminate(&mut child).await {
                Ok(()) => Verdict::TimeLimit,
                Err(e) => {
                    warn!("Failed to kill timed out submission: {}", e);
                    Verdict::Unknown
                }
            },
        };

        if let Some(feeder) = feeder {
            feeder.abort();
        }

        // Background processes left behind would hold the output pipes open
        if exited.is_some() {
            if let Some(pgid) = pgid {
                match killpg(pgid, Signal::SIGKILL) {
                    Ok(()) | Err(Errno::ESRCH) => {}
                    Err(e) => warn!("killpg({}) after exit failed: {}", pgid, e),
                }
            }
        }

        let stdout = collect(stdout).await?;
        let stderr = collect(stderr).await?;

        Ok(RunOutcome {
            verdict,
            stdout,
            stderr,
        })
    }
}

#[async_trait]
impl Runner for InterpreterRunner {
    async fn run_one_test(
        &self,
        limits: &RunLimits,
        source_code: &str,
        stdin: &[u8],
    ) -> Result<RunOutcome, ExecutionError> {
        let work_dir = tempfile::Builder::new()
            .prefix("judge-run-")
            .tempdir()
            .map_err(ExecutionError::Workspace)?;

        let result = self
            .execute_in(work_dir.path(), limits, source_code, stdin)
            .await;

        let path = work_dir.path().to_path_buf();
        if let Err(e) = work_dir.close() {
            warn!("Failed to remove working directory {}: {}", path.display(), e);
        }

        result
    }
}

/// Kill the child's whole process group and reap the child
async fn terminate(child: &mut Child) -> std::io::Result<()> {
    if let Some(pid) = child.id() {
        match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => {
                warn!("killpg({}) failed: {}, killing child only", pid, e);
                return child.kill().await;
            }
        }
    }
    child.wait().await.map(|_| ())
}

fn spawn_capture<R>(pipe: Option<R>) -> (Captured, JoinHandle<std::io::Result<()>>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let buf = Captured::default();
    let task = tokio::spawn(capture(pipe, buf.clone()));
    (buf, task)
}

/// Read the pipe to EOF, keeping the first `MAX_CAPTURE_BYTES`
async fn capture<R>(pipe: Option<R>, buf: Captured) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let Some(mut pipe) = pipe else {
        return Ok(());
    };

    let mut chunk = [0u8; 8192];
    loop {
        let n = pipe.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        let mut buf = buf.lock().await;
        let room = MAX_CAPTURE_BYTES.saturating_sub(buf.len());
        buf.extend_from_slice(&chunk[..n.min(room)]);
    }
}

/// Wait briefly for a reader to hit EOF, then take whatever it has read
async fn collect(
    (buf, mut task): (Captured, JoinHandle<std::io::Result<()>>),
) -> Result<Vec<u8>, ExecutionError> {
    match tokio::time::timeout(CAPTURE_GRACE, &mut task).await {
        Ok(joined) => joined
            .map_err(|e| ExecutionError::Capture(e.to_string()))?
            .map_err(|e| ExecutionError::Capture(e.to_string()))?,
        Err(_) => {
            task.abort();
            debug!("Output pipe still open after the child finished, keeping partial output");
        }
    }

    let mut buf = buf.lock().await;
    Ok(std::mem::take(&mut *buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn shell_runner() -> InterpreterRunner {
        InterpreterRunner::new(LanguageConfig::new("main.sh", ["sh", "main.sh"]))
    }

    /// False once the process is gone or only its zombie is left
    fn is_running(pid: i32) -> bool {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => !matches!(stat.rsplit(") ").next(), Some(rest) if rest.starts_with('Z')),
            Err(_) => false,
        }
    }

    fn limits(time_ms: u64) -> RunLimits {
        RunLimits::new(time_ms, 256)
    }

    #[tokio::test]
    async fn test_echoes_stdin() {
        let outcome = shell_runner()
            .run_one_test(&limits(5000), "cat", b"hello\n")
            .await
            .unwrap();

        assert_eq!(outcome.verdict, Verdict::Ok);
        assert_eq!(outcome.stdout, b"hello\n");
        assert!(outcome.stderr.is_empty());
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_runtime_error() {
        let outcome = shell_runner()
            .run_one_test(&limits(5000), "echo boom >&2\nexit 3", b"")
            .await
            .unwrap();

        assert_eq!(outcome.verdict, Verdict::RuntimeError);
        assert_eq!(outcome.stderr_lossy(), "boom\n");
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let started = Instant::now();
        let outcome = shell_runner()
            .run_one_test(&limits(300), "echo $$ >&2\nsleep 30", b"")
            .await
            .unwrap();

        assert_eq!(outcome.verdict, Verdict::TimeLimit);
        assert!(started.elapsed() < Duration::from_secs(10));

        let pid: i32 = outcome.stderr_lossy().trim().parse().unwrap();
        assert!(!is_running(pid));
    }

    #[tokio::test]
    async fn test_timeout_kills_forked_children() {
        let outcome = shell_runner()
            .run_one_test(&limits(300), "sleep 30 &\necho $! >&2\nwait", b"")
            .await
            .unwrap();

        assert_eq!(outcome.verdict, Verdict::TimeLimit);
        let pid: i32 = outcome.stderr_lossy().trim().parse().unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!is_running(pid));
    }

    #[tokio::test]
    async fn test_exit_reaps_background_children() {
        let started = Instant::now();
        let outcome = shell_runner()
            .run_one_test(&limits(5000), "sleep 30 &\necho $! >&2\necho ok", b"")
            .await
            .unwrap();

        assert_eq!(outcome.verdict, Verdict::Ok);
        assert_eq!(outcome.stdout_lossy(), "ok\n");
        assert!(started.elapsed() < Duration::from_secs(5));

        let pid: i32 = outcome.stderr_lossy().trim().parse().unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!is_running(pid));
    }

    #[tokio::test]
    async fn test_escaped_session_does_not_block_exit() {
        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            shell_runner().run_one_test(
                &limits(2000),
                "setsid sleep 20 &\nsleep 0.1\necho ok",
                b"",
            ),
        )
        .await
        .expect("run_one_test must return once the child exits")
        .unwrap();

        assert_eq!(outcome.verdict, Verdict::Ok);
        assert_eq!(outcome.stdout_lossy(), "ok\n");
    }

    #[tokio::test]
    async fn test_escaped_session_does_not_block_timeout() {
        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            shell_runner().run_one_test(
                &limits(300),
                "setsid sleep 20 &\necho started\nsleep 20",
                b"",
            ),
        )
        .await
        .expect("run_one_test must return soon after the time limit")
        .unwrap();

        assert_eq!(outcome.verdict, Verdict::TimeLimit);
        assert_eq!(outcome.stdout_lossy(), "started\n");
    }

    #[tokio::test]
    async fn test_output_is_capped() {
        let outcome = shell_runner()
            .run_one_test(&limits(10000), "head -c 9000000 /dev/zero", b"")
            .await
            .unwrap();

        assert_eq!(outcome.verdict, Verdict::Ok);
        assert_eq!(outcome.stdout.len(), MAX_CAPTURE_BYTES);
    }

    #[tokio::test]
    async fn test_runs_in_fresh_directory() {
        let runner = shell_runner();
        let first = runner
            .run_one_test(&limits(5000), "pwd\nls", b"")
            .await
            .unwrap();
        let second = runner
            .run_one_test(&limits(5000), "pwd\nls", b"")
            .await
            .unwrap();

        let first_out = first.stdout_lossy();
        let second_out = second.stdout_lossy();
        let first_dir = first_out.lines().next().unwrap();
        let second_dir = second_out.lines().next().unwrap();

        assert_ne!(first_dir, second_dir);
        assert_eq!(first_out.lines().skip(1).collect::<Vec<_>>(), vec!["main.sh"]);
        assert!(!Path::new(first_dir).exists());
        assert!(!Path::new(second_dir).exists());
    }

    #[tokio::test]
    async fn test_source_is_executable() {
        let outcome = shell_runner()
            .run_one_test(&limits(5000), "test -x main.sh && echo yes", b"")
            .await
            .unwrap();

        assert_eq!(outcome.stdout_lossy(), "yes\n");
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_execution_error() {
        let runner = InterpreterRunner::new(LanguageConfig::new(
            "main.x",
            ["/nonexistent/interpreter", "main.x"],
        ));
        let err = runner
            .run_one_test(&limits(1000), "", b"")
            .await
            .unwrap_err();

        assert!(matches!(err, ExecutionError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_unread_stdin_does_not_fail() {
        let input = vec![b'x'; 1024 * 1024];
        let outcome = shell_runner()
            .run_one_test(&limits(5000), "echo done", &input)
            .await
            .unwrap();

        assert_eq!(outcome.verdict, Verdict::Ok);
        assert_eq!(outcome.stdout_lossy(), "done\n");
    }
}
