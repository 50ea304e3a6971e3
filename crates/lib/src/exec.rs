//! Execution supervisor: run a sanitized script invocation with a wall-clock limit.
//! No shell parses the command; the interpreter gets the script path and arguments as a list.
//!
//! On unix the child leads its own process group. A timeout kills the whole group, so
//! processes the script started die with it.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;

use crate::sanitize::SanitizedCommand;

/// How long to keep draining pipes after the child is gone (a grandchild may still hold them open).
const DRAIN_GRACE: Duration = Duration::from_millis(500);

const TRUNCATED_MARKER: &str = "\n[output truncated]\n";

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Exit status zero.
    Success,
    /// Non-zero exit. `code` is None when the child died from a signal.
    Failure { code: Option<i32> },
    /// Killed after exceeding the time limit.
    Timeout,
    /// The process could not be started.
    LaunchError(String),
}

impl Outcome {
    /// Wire name: success, failure, timeout, launch-error.
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure { .. } => "failure",
            Outcome::Timeout => "timeout",
            Outcome::LaunchError(_) => "launch-error",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

/// Result of one execution attempt.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub outcome: Outcome,
    pub stdout: String,
    pub stderr: String,
    pub command: SanitizedCommand,
    pub elapsed: Duration,
}

/// Launches sanitized commands through an interpreter with a time limit and output caps.
#[derive(Debug, Clone)]
pub struct Supervisor {
    interpreter: String,
    timeout: Duration,
    max_output_bytes: usize,
    working_dir: Option<PathBuf>,
}

impl Supervisor {
    pub fn new(interpreter: impl Into<String>, timeout: Duration, max_output_bytes: usize) -> Self {
        Self {
            interpreter: interpreter.into(),
            timeout,
            max_output_bytes,
            working_dir: None,
        }
    }

    /// Run children in `dir` (the data root) when it exists.
    pub fn with_working_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = Some(dir);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `interpreter <script> <args...>`, wait at most `timeout`, and classify the outcome.
    /// Both streams are returned whatever the outcome.
    pub async fn execute(&self, command: SanitizedCommand) -> ExecutionResult {
        let started = Instant::now();
        let mut cmd = Command::new(&self.interpreter);
        cmd.arg(command.program())
            .args(command.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        if let Some(ref dir) = self.working_dir {
            if dir.is_dir() {
                cmd.current_dir(dir);
            }
        }

        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                log::warn!("exec: failed to launch {}: {}", command, e);
                return ExecutionResult {
                    outcome: Outcome::LaunchError(format!("{}: {}", self.interpreter, e)),
                    stdout: String::new(),
                    stderr: String::new(),
                    command,
                    elapsed: started.elapsed(),
                };
            }
        };
        // The group id equals the child's pid; read it before the child is reaped.
        let group = child.id();

        let limit = self.max_output_bytes;
        let mut stdout = Capture::spawn(child.stdout.take(), limit);
        let mut stderr = Capture::spawn(child.stderr.take(), limit);

        let outcome = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) if status.success() => Outcome::Success,
            Ok(Ok(status)) => Outcome::Failure {
                code: status.code(),
            },
            Ok(Err(e)) => Outcome::LaunchError(format!("waiting for child: {}", e)),
            Err(_) => {
                kill_process_group(group).await;
                if let Err(e) = child.kill().await {
                    log::warn!("exec: killing timed-out child failed: {}", e);
                }
                Outcome::Timeout
            }
        };

        // Leftover background processes keep the pipes open; kill them once the grace runs out.
        let stdout_done = stdout.finish_within(DRAIN_GRACE).await;
        let stderr_done = stderr.finish_within(DRAIN_GRACE).await;
        if !(stdout_done && stderr_done) {
            log::warn!("exec: {} left processes holding its output open", command);
            kill_process_group(group).await;
        }
        let stdout = stdout.into_string().await;
        let stderr = stderr.into_string().await;

        let elapsed = started.elapsed();
        match &outcome {
            Outcome::Success => log::info!("exec: {} succeeded in {}ms", command, elapsed.as_millis()),
            Outcome::Timeout => log::warn!(
                "exec: {} timed out after {}s and was killed",
                command,
                self.timeout.as_secs()
            ),
            other => log::warn!("exec: {} ended with {:?}", command, other),
        }
        ExecutionResult {
            outcome,
            stdout,
            stderr,
            command,
            elapsed,
        }
    }
}

/// SIGKILL every process in the child's group. Failures are logged; the group may already be gone.
#[cfg(unix)]
async fn kill_process_group(group: Option<u32>) {
    let Some(pgid) = group else {
        return;
    };
    match Command::new("kill")
        .arg("-KILL")
        .arg("--")
        .arg(format!("-{}", pgid))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
    {
        Ok(status) if status.success() => log::debug!("exec: killed process group {}", pgid),
        Ok(status) => log::debug!("exec: kill for group {} exited with {}", pgid, status),
        Err(e) => log::warn!("exec: could not run kill for group {}: {}", pgid, e),
    }
}

#[cfg(not(unix))]
async fn kill_process_group(_group: Option<u32>) {}

#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: bool,
}

/// One output stream being read in the background. What was read so far stays reachable
/// even when the reader has to be abandoned.
struct Capture {
    buf: Arc<Mutex<Captured>>,
    task: Option<JoinHandle<()>>,
}

impl Capture {
    fn spawn<R>(stream: Option<R>, limit: usize) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buf = Arc::new(Mutex::new(Captured::default()));
        let task = stream.map(|s| tokio::spawn(read_capped(s, limit, buf.clone())));
        Self { buf, task }
    }

    /// Wait up to `grace` for the stream to hit EOF. False when it is still open.
    async fn finish_within(&mut self, grace: Duration) -> bool {
        let Some(task) = self.task.as_mut() else {
            return true;
        };
        if tokio::time::timeout(grace, task).await.is_err() {
            return false;
        }
        self.task = None;
        true
    }

    /// Everything captured so far. A reader still blocked after another grace period is
    /// abandoned and the text is marked truncated.
    async fn into_string(mut self) -> String {
        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(DRAIN_GRACE, &mut task).await.is_err() {
                task.abort();
                if let Ok(mut c) = self.buf.lock() {
                    c.truncated = true;
                }
            }
        }
        let Ok(c) = self.buf.lock() else {
            return String::new();
        };
        let mut s = String::from_utf8_lossy(&c.bytes).into_owned();
        if c.truncated {
            s.push_str(TRUNCATED_MARKER);
        }
        s
    }
}

/// Read a stream to EOF, keeping at most `limit` bytes in `sink`.
async fn read_capped<R: AsyncRead + Unpin>(mut r: R, limit: usize, sink: Arc<Mutex<Captured>>) {
    let mut buf = [0u8; 8192];
    loop {
        let n = match r.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        let Ok(mut c) = sink.lock() else {
            break;
        };
        let room = limit.saturating_sub(c.bytes.len());
        if n > room {
            c.truncated = true;
        }
        c.bytes.extend_from_slice(&buf[..n.min(room)]);
    }
}
