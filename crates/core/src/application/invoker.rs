// Invoker - Run one openssl action and classify its outcome

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::constants::OPENSSL_PROGRAM;
use crate::domain::{
    build_args, classify, Action, DomainError, ExpectationTable, Options, Outcome, EXPECTATIONS,
};
use crate::error::{InvokeError, Result};
use crate::port::{ProcessRunner, ProcessSpec, TerminateSignal};

/// One openssl invocation: action, optional stdin bytes, options.
///
/// A request built without `with_input` closes the child's stdin without
/// writing anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokeRequest {
    pub action: Action,
    pub input: Option<Vec<u8>>,
    pub options: Options,
}

impl InvokeRequest {
    pub fn new(action: Action) -> Self {
        Self {
            action,
            input: None,
            options: Options::new(),
        }
    }

    /// Parse the action string
    ///
    /// # Errors
    /// - DomainError::InvalidAction for an empty action
    pub fn parse(action: &str) -> std::result::Result<Self, DomainError> {
        Ok(Self::new(action.parse()?))
    }

    pub fn with_input(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.input = Some(input.into());
        self
    }

    pub fn with_options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    /// The argv passed to openssl
    pub fn args(&self) -> Vec<String> {
        build_args(&self.action, &self.options)
    }

    pub fn to_spec(&self) -> ProcessSpec {
        ProcessSpec {
            program: OPENSSL_PROGRAM.to_string(),
            args: self.args(),
            stdin: self.input.clone(),
        }
    }
}

/// Final result of an invocation: the error (if any) plus everything the
/// process wrote to stdout. Stdout is delivered on failure too.
#[derive(Debug)]
pub struct Completion {
    pub result: std::result::Result<(), InvokeError>,
    pub stdout: Vec<u8>,
}

impl Completion {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn error(&self) -> Option<&InvokeError> {
        self.result.as_ref().err()
    }

    pub fn into_parts(self) -> (Option<InvokeError>, Vec<u8>) {
        (self.result.err(), self.stdout)
    }

    pub fn into_result(self) -> Result<Vec<u8>> {
        self.result.map(|()| self.stdout)
    }
}

/// Control handle for a spawned openssl process
#[derive(Debug, Clone)]
pub struct InvocationHandle {
    pid: Option<u32>,
    terminate: TerminateSignal,
}

impl InvocationHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Ask the process to terminate. The completion still arrives afterwards
    /// with whatever exit status the OS reports.
    ///
    /// Returns false, and does nothing, once the process has exited.
    pub fn terminate(&self) -> bool {
        self.terminate.request()
    }

    pub fn is_alive(&self) -> bool {
        !self.terminate.has_exited()
    }
}

/// An in-flight invocation
#[derive(Debug)]
pub struct Invocation {
    handle: InvocationHandle,
    completion: oneshot::Receiver<Completion>,
}

impl Invocation {
    pub fn handle(&self) -> &InvocationHandle {
        &self.handle
    }

    pub fn pid(&self) -> Option<u32> {
        self.handle.pid()
    }

    /// Wait for the process to exit and return its classified result
    pub async fn wait(self) -> Completion {
        self.completion.await.unwrap_or(Completion {
            result: Err(InvokeError::Abandoned),
            stdout: Vec::new(),
        })
    }
}

/// Runs openssl actions through a ProcessRunner
pub struct Invoker {
    runner: Arc<dyn ProcessRunner>,
    expectations: &'static ExpectationTable,
}

impl Invoker {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            runner,
            expectations: &EXPECTATIONS,
        }
    }

    pub fn expectations(&self) -> &ExpectationTable {
        self.expectations
    }

    /// Spawn openssl for `request` and return immediately.
    ///
    /// Output is collected on a background task; `Invocation::wait` yields the
    /// result exactly once, after the process exits. Must be called from
    /// within a Tokio runtime.
    ///
    /// # Errors
    /// - InvokeError::NoRuntime outside a Tokio runtime
    /// - InvokeError::Execution if the process cannot be spawned
    pub fn invoke(&self, request: InvokeRequest) -> Result<Invocation> {
        let (tx, rx) = oneshot::channel();
        let handle = self.start(request, move |completion| {
            // Receiver dropped means nobody is waiting
            let _ = tx.send(completion);
        })?;

        Ok(Invocation {
            handle,
            completion: rx,
        })
    }

    /// Spawn openssl for `request` and call `callback(error, stdout)` once
    /// the process exits.
    ///
    /// The callback runs on a spawned task, never before this returns. It is
    /// not called when spawning fails; the error is returned instead.
    pub fn invoke_with_callback<F>(
        &self,
        request: InvokeRequest,
        callback: F,
    ) -> Result<InvocationHandle>
    where
        F: FnOnce(Option<InvokeError>, Vec<u8>) + Send + 'static,
    {
        self.start(request, move |completion| {
            let (error, stdout) = completion.into_parts();
            callback(error, stdout);
        })
    }

    /// Invoke and wait
    pub async fn run(&self, request: InvokeRequest) -> Completion {
        match self.invoke(request) {
            Ok(invocation) => invocation.wait().await,
            Err(e) => Completion {
                result: Err(e),
                stdout: Vec::new(),
            },
        }
    }

    fn start<F>(&self, request: InvokeRequest, deliver: F) -> Result<InvocationHandle>
    where
        F: FnOnce(Completion) + Send + 'static,
    {
        // Nothing may be spawned unless the collector task can run
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(InvokeError::NoRuntime);
        }

        let spec = request.to_spec();
        let action = request.action;

        info!(
            action = %action,
            args = ?spec.args,
            input_bytes = spec.stdin.as_ref().map_or(0, Vec::len),
            "Starting openssl invocation"
        );

        let process = self.runner.spawn(spec)?;
        let pid = process.pid();
        let expectations = self.expectations;
        let start_time = Instant::now();
        let terminate = TerminateSignal::new();
        let owner = terminate.clone();

        tokio::spawn(async move {
            let collected = process.wait_with_output(owner.clone()).await;
            owner.mark_exited();

            let completion = match collected {
                Ok(output) => {
                    let stderr = output.stderr_text();
                    let outcome = classify(expectations, &action, output.exit_code, &stderr);
                    debug!(
                        action = %action,
                        exit_code = ?output.exit_code,
                        expected = ?expectations.get(action.as_str()).map(|r| r.as_str()),
                        success = outcome.is_success(),
                        "Classified openssl outcome"
                    );

                    info!(
                        action = %action,
                        pid = ?pid,
                        exit_code = ?output.exit_code,
                        stdout_bytes = output.stdout.len(),
                        stderr_bytes = output.stderr.len(),
                        terminated = owner.is_requested(),
                        duration_ms = start_time.elapsed().as_millis() as u64,
                        "openssl invocation completed"
                    );

                    let result = match outcome {
                        Outcome::Success => Ok(()),
                        Outcome::Failure { code, stderr } => {
                            Err(InvokeError::Process { code, stderr })
                        }
                    };
                    Completion {
                        result,
                        stdout: output.stdout,
                    }
                }
                Err(e) => {
                    warn!(action = %action, pid = ?pid, error = %e, "openssl output collection failed");
                    Completion {
                        result: Err(e.into()),
                        stdout: Vec::new(),
                    }
                }
            };

            deliver(completion);
        });

        Ok(InvocationHandle { pid, terminate })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::process_runner::mocks::{MockProcessRunner, ScriptedRun};
    use crate::port::ExecutionError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn invoker(script: ScriptedRun) -> (Invoker, Arc<MockProcessRunner>) {
        let runner = Arc::new(MockProcessRunner::new(script));
        (Invoker::new(runner.clone()), runner)
    }

    #[test]
    fn test_request_args_follow_option_order() {
        let request = InvokeRequest::parse("req.verify").unwrap().with_options(
            Options::new()
                .with("in", "csr.pem")
                .with("noout", true)
                .with("text", false),
        );

        assert_eq!(
            request.args(),
            vec!["req", "-verify", "-in", "csr.pem", "-noout", "text"]
        );
        assert_eq!(request.to_spec().program, "openssl");
    }

    #[test]
    fn test_empty_action_rejected() {
        assert!(matches!(
            InvokeRequest::parse(""),
            Err(DomainError::InvalidAction(_))
        ));
    }

    #[tokio::test]
    async fn test_expected_stderr_succeeds() {
        let (invoker, _) = invoker(ScriptedRun::exit(0).stderr("verify OK\n"));

        let completion = invoker
            .run(InvokeRequest::parse("req.verify").unwrap())
            .await;

        tokio_test::assert_ok!(completion.result);
    }

    #[tokio::test]
    async fn test_unexpected_stderr_fails_with_stderr_message() {
        let (invoker, _) = invoker(ScriptedRun::exit(0).stderr("bad request\n"));

        let completion = invoker
            .run(InvokeRequest::parse("req.verify").unwrap())
            .await;

        let error = completion.error().unwrap();
        assert_eq!(error.to_string(), "bad request\n");
        assert_eq!(error.code(), Some(0));
    }

    #[tokio::test]
    async fn test_nonzero_exit_fails_with_code() {
        let (invoker, _) = invoker(
            ScriptedRun::exit(1)
                .stdout("partial")
                .stderr("unable to load key\n"),
        );

        let completion = invoker.run(InvokeRequest::parse("rsa").unwrap()).await;

        let (error, stdout) = completion.into_parts();
        let error = error.unwrap();
        assert_eq!(error.code(), Some(1));
        assert_eq!(error.stderr(), Some("unable to load key\n"));
        assert_eq!(stdout, b"partial");
    }

    #[tokio::test]
    async fn test_unknown_action_fails_even_with_empty_stderr() {
        let (invoker, _) = invoker(ScriptedRun::exit(0).stdout("OpenSSL 3.0.13\n"));

        let completion = invoker.run(InvokeRequest::parse("version").unwrap()).await;

        let (error, stdout) = completion.into_parts();
        let error = error.unwrap();
        assert_eq!(error.to_string(), "");
        assert_eq!(error.code(), Some(0));
        assert_eq!(stdout, b"OpenSSL 3.0.13\n");
    }

    #[tokio::test]
    async fn test_stdout_chunks_concatenated_in_order() {
        let (invoker, _) = invoker(
            ScriptedRun::exit(0)
                .stdout("ab")
                .stdout("cd")
                .stderr("writing RSA key\n"),
        );

        let stdout = invoker
            .run(InvokeRequest::parse("rsa").unwrap())
            .await
            .into_result()
            .unwrap();

        assert_eq!(stdout, b"abcd");
        assert_eq!(stdout.len(), 4);
    }

    #[tokio::test]
    async fn test_input_bytes_passed_to_stdin() {
        let (invoker, runner) = invoker(ScriptedRun::exit(0).stderr("writing RSA key\n"));

        invoker
            .run(InvokeRequest::parse("rsa").unwrap().with_input(b"-----BEGIN".to_vec()))
            .await;

        let spawned = runner.spawned();
        assert_eq!(spawned.len(), 1);
        assert_eq!(spawned[0].stdin.as_deref(), Some(&b"-----BEGIN"[..]));
    }

    #[tokio::test]
    async fn test_options_without_input_closes_stdin_empty() {
        let (invoker, runner) = invoker(ScriptedRun::exit(0).stderr("verify OK"));

        let request = InvokeRequest::parse("req.verify")
            .unwrap()
            .with_options(Options::new().with("in", "csr.pem"));
        invoker.run(request).await;

        let spawned = runner.spawned();
        assert_eq!(spawned[0].stdin, None);
        assert_eq!(spawned[0].args, vec!["req", "-verify", "-in", "csr.pem"]);
    }

    #[tokio::test]
    async fn test_callback_fires_once_after_exit() {
        let (invoker, _) = invoker(
            ScriptedRun::exit(0)
                .stderr("verify OK\n")
                .delay(Duration::from_millis(50)),
        );

        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = oneshot::channel();
        let counter = calls.clone();

        let handle = invoker
            .invoke_with_callback(
                InvokeRequest::parse("req.verify").unwrap(),
                move |error, stdout| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    let _ = tx.send((error.is_none(), stdout));
                },
            )
            .unwrap();

        // Not delivered synchronously
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(handle.pid().is_some());

        let (ok, stdout) = rx.await.unwrap();
        assert!(ok);
        assert!(stdout.is_empty());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_terminate_reports_signal_exit() {
        let (invoker, runner) = invoker(ScriptedRun::exit(0).delay(Duration::from_secs(30)));

        let invocation = invoker.invoke(InvokeRequest::parse("genrsa").unwrap()).unwrap();
        let pid = invocation.pid().unwrap();
        assert!(invocation.handle().is_alive());

        assert!(invocation.handle().terminate());

        let handle = invocation.handle().clone();
        let completion = invocation.wait().await;
        assert_eq!(completion.error().unwrap().code(), None);
        assert!(!handle.is_alive());
        assert_eq!(runner.terminated(), vec![pid]);
    }

    #[tokio::test]
    async fn test_terminate_only_reaches_its_own_process() {
        let (invoker, runner) = invoker(
            ScriptedRun::exit(0)
                .stdout("key")
                .stderr("writing RSA key\n")
                .delay(Duration::from_millis(100)),
        );

        let kept = invoker.invoke(InvokeRequest::parse("rsa").unwrap()).unwrap();
        let stopped = invoker.invoke(InvokeRequest::parse("rsa").unwrap()).unwrap();
        let stopped_pid = stopped.pid().unwrap();

        assert!(stopped.handle().terminate());

        let (kept, stopped) = tokio::join!(kept.wait(), stopped.wait());
        assert_eq!(kept.into_result().unwrap(), b"key");
        assert_eq!(stopped.error().unwrap().code(), None);
        assert_eq!(runner.terminated(), vec![stopped_pid]);
    }

    #[tokio::test]
    async fn test_terminate_after_exit_is_noop() {
        let (invoker, runner) = invoker(ScriptedRun::exit(0).stderr("verify OK\n"));

        let invocation = invoker
            .invoke(InvokeRequest::parse("req.verify").unwrap())
            .unwrap();
        let handle = invocation.handle().clone();

        tokio_test::assert_ok!(invocation.wait().await.result);
        assert!(!handle.is_alive());
        assert!(!handle.terminate());
        assert!(runner.terminated().is_empty());
    }

    #[test]
    fn test_invoke_outside_runtime_spawns_nothing() {
        let (invoker, runner) = invoker(ScriptedRun::exit(0));

        let result = invoker.invoke(InvokeRequest::parse("genrsa").unwrap());

        assert!(matches!(result, Err(InvokeError::NoRuntime)));
        assert_eq!(runner.call_count(), 0);
    }

    #[tokio::test]
    async fn test_spawn_failure_returned_synchronously() {
        let runner = Arc::new(MockProcessRunner::new_spawn_failure("No such file"));
        let invoker = Invoker::new(runner.clone());

        let called = Arc::new(AtomicUsize::new(0));
        let counter = called.clone();
        let result = invoker.invoke_with_callback(
            InvokeRequest::parse("genrsa").unwrap(),
            move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );

        assert!(matches!(
            result,
            Err(InvokeError::Execution(ExecutionError::SpawnFailed(_)))
        ));
        tokio::task::yield_now().await;
        assert_eq!(called.load(Ordering::SeqCst), 0);
        assert_eq!(runner.call_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_invocations_are_independent() {
        let (invoker, runner) = invoker(ScriptedRun::exit(0).stdout("x").stderr("verify ok"));

        let first = invoker.invoke(InvokeRequest::parse("req.verify").unwrap()).unwrap();
        let second = invoker.invoke(InvokeRequest::parse("req.verify").unwrap()).unwrap();
        assert_ne!(first.pid(), second.pid());

        let (a, b) = tokio::join!(first.wait(), second.wait());
        assert_eq!(a.into_result().unwrap(), b"x");
        assert_eq!(b.into_result().unwrap(), b"x");
        assert_eq!(runner.call_count(), 2);
    }
}
