// Process Runner Port
// Abstraction for spawning the external tool and collecting its output

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Notify;

use crate::domain::ProcessOutput;

/// What to launch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Bytes written to stdin before it is closed. `None` closes stdin
    /// immediately.
    pub stdin: Option<Vec<u8>>,
}

/// Execution errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("Spawn failed: {0}")]
    SpawnFailed(String),

    #[error("Process killed: {0}")]
    Killed(String),

    #[error("IO error: {0}")]
    IoError(String),
}

#[derive(Debug, Default)]
struct TerminateState {
    notify: Notify,
    requested: AtomicBool,
    exited: AtomicBool,
}

/// Termination request for one process.
///
/// Shared between the caller's handle and the task that owns the child. The
/// owner acts on the request while the child is still unreaped, so a signal
/// never reaches a recycled pid.
#[derive(Debug, Clone, Default)]
pub struct TerminateSignal {
    state: Arc<TerminateState>,
}

impl TerminateSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the owner to terminate the process. Returns false when the
    /// process has already exited (the request is dropped).
    pub fn request(&self) -> bool {
        if self.has_exited() {
            return false;
        }
        if !self.state.requested.swap(true, Ordering::SeqCst) {
            self.state.notify.notify_one();
        }
        true
    }

    pub fn is_requested(&self) -> bool {
        self.state.requested.load(Ordering::SeqCst)
    }

    /// Resolves once `request` has been called
    pub async fn requested(&self) {
        if self.is_requested() {
            return;
        }
        // notify_one stores a permit, so a request racing this call is not lost
        self.state.notify.notified().await;
    }

    /// Called by the owner once the child has been reaped
    pub fn mark_exited(&self) {
        self.state.exited.store(true, Ordering::SeqCst);
    }

    pub fn has_exited(&self) -> bool {
        self.state.exited.load(Ordering::SeqCst)
    }
}

/// Process Runner trait
///
/// Implementations:
/// - SubprocessRunner (infra-system): spawns a real OS process
/// - MockProcessRunner: scripted output for tests
pub trait ProcessRunner: Send + Sync {
    /// Launch a process. Must be called from within a Tokio runtime.
    ///
    /// # Errors
    /// - ExecutionError::SpawnFailed if the program cannot be started
    fn spawn(&self, spec: ProcessSpec) -> Result<Box<dyn RunningProcess>, ExecutionError>;
}

/// A spawned process whose output has not been collected yet
#[async_trait]
pub trait RunningProcess: Send {
    fn pid(&self) -> Option<u32>;

    /// Feed stdin, drain stdout/stderr to EOF and wait for exit.
    ///
    /// A request on `terminate` stops the process; the output collected so
    /// far is still returned, with `exit_code: None` when a signal ended it.
    async fn wait_with_output(
        self: Box<Self>,
        terminate: TerminateSignal,
    ) -> Result<ProcessOutput, ExecutionError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::domain::ChunkBuffer;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Scripted result of one mock process
    #[derive(Debug, Clone, Default)]
    pub struct ScriptedRun {
        pub exit_code: Option<i32>,
        pub stdout_chunks: Vec<Vec<u8>>,
        pub stderr_chunks: Vec<Vec<u8>>,
        /// How long the process "runs" before exiting
        pub delay: Option<Duration>,
    }

    impl ScriptedRun {
        pub fn exit(code: i32) -> Self {
            Self {
                exit_code: Some(code),
                ..Default::default()
            }
        }

        pub fn stdout(mut self, chunk: impl Into<Vec<u8>>) -> Self {
            self.stdout_chunks.push(chunk.into());
            self
        }

        pub fn stderr(mut self, chunk: impl Into<Vec<u8>>) -> Self {
            self.stderr_chunks.push(chunk.into());
            self
        }

        pub fn delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }
    }

    /// Mock Process Runner for testing
    pub struct MockProcessRunner {
        script: ScriptedRun,
        spawn_failure: Option<String>,
        spawned: Arc<Mutex<Vec<ProcessSpec>>>,
        terminated: Arc<Mutex<Vec<u32>>>,
        next_pid: AtomicU32,
    }

    impl MockProcessRunner {
        pub fn new(script: ScriptedRun) -> Self {
            Self {
                script,
                spawn_failure: None,
                spawned: Arc::new(Mutex::new(Vec::new())),
                terminated: Arc::new(Mutex::new(Vec::new())),
                next_pid: AtomicU32::new(1000),
            }
        }

        pub fn new_spawn_failure(message: impl Into<String>) -> Self {
            let mut runner = Self::new(ScriptedRun::default());
            runner.spawn_failure = Some(message.into());
            runner
        }

        /// Every spec passed to `spawn`, in call order
        pub fn spawned(&self) -> Vec<ProcessSpec> {
            self.spawned.lock().unwrap().clone()
        }

        /// Pids that were stopped by a termination request
        pub fn terminated(&self) -> Vec<u32> {
            self.terminated.lock().unwrap().clone()
        }

        pub fn call_count(&self) -> usize {
            self.spawned.lock().unwrap().len()
        }
    }

    struct MockRunningProcess {
        pid: u32,
        script: ScriptedRun,
        terminated: Arc<Mutex<Vec<u32>>>,
    }

    #[async_trait]
    impl RunningProcess for MockRunningProcess {
        fn pid(&self) -> Option<u32> {
            Some(self.pid)
        }

        async fn wait_with_output(
            self: Box<Self>,
            terminate: TerminateSignal,
        ) -> Result<ProcessOutput, ExecutionError> {
            let delay = self.script.delay.unwrap_or(Duration::ZERO);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = terminate.requested() => {
                    self.terminated.lock().unwrap().push(self.pid);
                    return Ok(ProcessOutput {
                        exit_code: None,
                        ..Default::default()
                    });
                }
            }

            let mut stdout = ChunkBuffer::new();
            for chunk in &self.script.stdout_chunks {
                stdout.push(chunk.clone());
            }
            let mut stderr = ChunkBuffer::new();
            for chunk in &self.script.stderr_chunks {
                stderr.push(chunk.clone());
            }

            Ok(ProcessOutput {
                exit_code: self.script.exit_code,
                stdout: stdout.concat(),
                stderr: stderr.concat(),
            })
        }
    }

    impl ProcessRunner for MockProcessRunner {
        fn spawn(&self, spec: ProcessSpec) -> Result<Box<dyn RunningProcess>, ExecutionError> {
            if let Some(message) = &self.spawn_failure {
                return Err(ExecutionError::SpawnFailed(message.clone()));
            }

            self.spawned.lock().unwrap().push(spec);
            let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);

            Ok(Box::new(MockRunningProcess {
                pid,
                script: self.script.clone(),
                terminated: self.terminated.clone(),
            }))
        }
    }
}
