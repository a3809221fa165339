// Subprocess runner implementation
// reason: async-trait, tokio for async process management
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use openssl_exec_core::domain::{ChunkBuffer, ProcessOutput};
use openssl_exec_core::port::{
    ExecutionError, ProcessRunner, ProcessSpec, RunningProcess, TerminateSignal,
};

use crate::config::RunnerConfig;

/// Subprocess runner
/// Spawns child processes with all three standard streams piped
pub struct SubprocessRunner {
    config: RunnerConfig,
}

impl SubprocessRunner {
    /// Create a new subprocess runner
    ///
    /// # Example
    /// ```ignore
    /// let runner = SubprocessRunner::new(RunnerConfig::from_env());
    /// let invoker = Invoker::new(Arc::new(runner));
    /// ```
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Filter environment variables to allowlist only
    fn filter_env<I>(&self, vars: I) -> HashMap<String, String>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let allowlist = self.config.env_allowlist.as_deref().unwrap_or_default();
        vars.into_iter()
            .filter(|(k, _)| allowlist.contains(k))
            .collect()
    }

    fn build_command(&self, spec: &ProcessSpec) -> Command {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if self.config.env_allowlist.is_some() {
            command.env_clear().envs(self.filter_env(std::env::vars()));
        }
        if let Some(dir) = &self.config.working_dir {
            command.current_dir(dir);
        }

        command
    }
}

/// A spawned child with its pipes and pending stdin bytes
struct SubprocessHandle {
    child: Child,
    pid: Option<u32>,
    input: Option<Vec<u8>>,
    read_chunk_size: usize,
    terminate_grace: Duration,
}

/// Send SIGTERM (or SIGKILL when `force`) to a child that has not been
/// reaped yet. Failures are logged; the wait loop still collects the exit.
async fn stop_child(pid: Option<u32>, force: bool) {
    let Some(pid) = pid else {
        return;
    };

    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let signal = if force { Signal::SIGKILL } else { Signal::SIGTERM };
        let Ok(raw) = i32::try_from(pid) else {
            warn!(pid = %pid, "Pid out of range, cannot signal");
            return;
        };

        info!(pid = %pid, signal = %signal, "Signalling openssl");
        if let Err(e) = kill(Pid::from_raw(raw), signal) {
            warn!(pid = %pid, signal = %signal, error = %e, "Signal failed");
        }
    }

    #[cfg(windows)]
    {
        // Windows: taskkill /PID, with /F once the grace period is over
        info!(pid = %pid, force = force, "Killing process on Windows");
        let mut args = vec!["/PID".to_string(), pid.to_string()];
        if force {
            args.insert(0, "/F".to_string());
        }
        match Command::new("taskkill").args(&args).output().await {
            Ok(output) if !output.status.success() => warn!(
                pid = %pid,
                stderr = %String::from_utf8_lossy(&output.stderr),
                "taskkill failed"
            ),
            Err(e) => warn!(pid = %pid, error = %e, "taskkill failed"),
            Ok(_) => {}
        }
    }
}

/// Write `input` (if any) then close stdin. A process that exits without
/// reading its input is not an error.
async fn feed_stdin(
    stdin: Option<ChildStdin>,
    input: Option<Vec<u8>>,
    pid: Option<u32>,
) -> Result<(), ExecutionError> {
    let Some(mut stdin) = stdin else {
        return Ok(());
    };

    if let Some(bytes) = input.filter(|b| !b.is_empty()) {
        let written = match stdin.write_all(&bytes).await {
            Ok(()) => stdin.flush().await,
            Err(e) => Err(e),
        };
        match written {
            Ok(()) => trace!(pid = ?pid, bytes = bytes.len(), "Wrote stdin"),
            Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                warn!(pid = ?pid, "Process closed stdin before reading all input");
            }
            Err(e) => return Err(ExecutionError::IoError(e.to_string())),
        }
    }

    // Dropping the handle closes the pipe
    drop(stdin);
    Ok(())
}

/// Read a stream to EOF, one chunk per read
async fn drain<R>(
    reader: Option<R>,
    read_chunk_size: usize,
    stream: &'static str,
) -> Result<ChunkBuffer, ExecutionError>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = ChunkBuffer::new();
    let Some(mut reader) = reader else {
        return Ok(buffer);
    };

    let mut chunk = vec![0u8; read_chunk_size];
    loop {
        let n = reader
            .read(&mut chunk)
            .await
            .map_err(|e| ExecutionError::IoError(format!("{} read failed: {}", stream, e)))?;
        if n == 0 {
            break;
        }
        trace!(stream = stream, bytes = n, total = buffer.len() + n, "Received chunk");
        buffer.push(&chunk[..n]);
    }

    Ok(buffer)
}

#[async_trait]
impl RunningProcess for SubprocessHandle {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    async fn wait_with_output(
        self: Box<Self>,
        terminate: TerminateSignal,
    ) -> Result<ProcessOutput, ExecutionError> {
        let SubprocessHandle {
            mut child,
            pid,
            input,
            read_chunk_size,
            terminate_grace,
        } = *self;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let run = async {
            // All three concurrently, so a large input cannot block on a full
            // output pipe
            let (fed, stdout, stderr) = tokio::join!(
                feed_stdin(stdin, input, pid),
                drain(stdout, read_chunk_size, "stdout"),
                drain(stderr, read_chunk_size, "stderr"),
            );
            fed?;
            let stdout = stdout?;
            let stderr = stderr?;

            let status: ExitStatus = child
                .wait()
                .await
                .map_err(|e| ExecutionError::IoError(e.to_string()))?;
            Ok::<_, ExecutionError>((stdout, stderr, status))
        };
        tokio::pin!(run);

        // The child is only reaped inside `run`, so its pid stays valid for
        // every signal sent below
        let mut requested = false;
        let mut escalate_at: Option<Instant> = None;
        let (stdout, stderr, status) = loop {
            tokio::select! {
                result = &mut run => break result?,
                _ = terminate.requested(), if !requested => {
                    requested = true;
                    stop_child(pid, false).await;
                    escalate_at = Some(Instant::now() + terminate_grace);
                }
                _ = tokio::time::sleep_until(escalate_at.unwrap_or_else(Instant::now)),
                    if escalate_at.is_some() =>
                {
                    escalate_at = None;
                    warn!(pid = ?pid, "Process did not exit after SIGTERM, sending SIGKILL");
                    stop_child(pid, true).await;
                }
            }
        };

        debug!(
            pid = ?pid,
            exit_code = ?status.code(),
            terminated = requested,
            stdout_chunks = stdout.chunk_count(),
            stderr_chunks = stderr.chunk_count(),
            "Subprocess exited"
        );

        Ok(ProcessOutput {
            exit_code: status.code(),
            stdout: stdout.concat(),
            stderr: stderr.concat(),
        })
    }
}

impl ProcessRunner for SubprocessRunner {
    fn spawn(&self, spec: ProcessSpec) -> Result<Box<dyn RunningProcess>, ExecutionError> {
        let child = self
            .build_command(&spec)
            .spawn()
            .map_err(|e| ExecutionError::SpawnFailed(format!("{}: {}", spec.program, e)))?;

        let pid = child.id();
        debug!(program = %spec.program, pid = ?pid, "Spawned subprocess");

        Ok(Box::new(SubprocessHandle {
            child,
            pid,
            input: spec.stdin,
            read_chunk_size: self.config.read_chunk_size,
            terminate_grace: self.config.terminate_grace,
        }))
    }
}
