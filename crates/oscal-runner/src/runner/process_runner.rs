use super::platform_factory::{PlatformProcessManager, PlatformProcessManagerFactory};
use super::spinner::Spinner;
use oscal_runner_core::{
    ExecutionFailure, ExecutionOutcome, FailureKind, ProcessHandle, ProcessId, ProcessLifecycle,
    ProcessManagerFactory, ProcessStatus, ProcessTermination, RunnerError, SpawnOptions,
    StdioSink, TerminationResult,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
const DRAIN_LIMIT: Duration = Duration::from_secs(2);

/// Per-run knobs for [`ProcessRunner`]
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Show a terminal spinner while the tool runs
    pub capture_loader: bool,
    /// `None` waits indefinitely
    pub timeout: Option<Duration>,
    pub working_dir: Option<PathBuf>,
    pub env: HashMap<String, String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            capture_loader: false,
            timeout: Some(DEFAULT_TIMEOUT),
            working_dir: None,
            env: HashMap::new(),
        }
    }
}

impl RunOptions {
    pub fn with_loader(mut self, capture_loader: bool) -> Self {
        self.capture_loader = capture_loader;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    fn spawn_options(&self) -> SpawnOptions {
        SpawnOptions::piped()
            .with_env(&self.env)
            .with_working_dir(self.working_dir.clone())
    }
}

/// Runs one external process to completion and folds it into an [`ExecutionOutcome`]
#[derive(Clone)]
pub struct ProcessRunner {
    manager: Arc<PlatformProcessManager>,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessRunner {
    pub fn new() -> Self {
        let manager = PlatformProcessManagerFactory::create_process_manager();
        debug!(
            "Created ProcessRunner with platform: {}",
            PlatformProcessManagerFactory::platform_name()
        );
        Self::with_manager(Arc::new(manager))
    }

    pub fn with_manager(manager: Arc<PlatformProcessManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<PlatformProcessManager> {
        &self.manager
    }

    /// Run `executable argv...`, buffering both streams until exit
    pub async fn run(
        &self,
        executable: &Path,
        argv: &[String],
        options: &RunOptions,
    ) -> ExecutionOutcome {
        let tool = tool_name(executable);

        let mut handle = match self
            .manager
            .spawn_process(executable, argv, &options.spawn_options())
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                warn!(tool = %tool, error = %e, "Failed to spawn process");
                return ExecutionOutcome::failure(
                    FailureKind::Spawn,
                    format!("failed to start {tool}: {e:#}"),
                );
            }
        };

        let _spinner = options
            .capture_loader
            .then(|| Spinner::start(format!("Running {tool}...")));

        let stdout = collect(handle.take_stdout());
        let stderr = collect(handle.take_stderr());

        let status = self
            .manager
            .wait_for_exit(handle.as_mut(), options.timeout)
            .await;

        match status {
            Ok(ProcessStatus::Exited(status)) => {
                let stdout = drain(stdout).await;
                let stderr = drain(stderr).await;

                if status.success() {
                    debug!(tool = %tool, "Process exited successfully");
                    return ExecutionOutcome::success(stdout, stderr);
                }

                let message = match status.code() {
                    Some(code) => format!("{tool} exited with code {code}"),
                    None => format!("{tool} was terminated by a signal"),
                };
                info!(tool = %tool, message = %message, "Process failed");
                ExecutionOutcome::Failure(
                    ExecutionFailure::new(FailureKind::NonZeroExit, message).with_stderr(stderr),
                )
            }
            Ok(ProcessStatus::TimedOut) => {
                let limit = options.timeout.unwrap_or_default();
                warn!(tool = %tool, timeout = ?limit, "Process timed out, terminating");
                self.terminate(handle.as_mut()).await;

                let stderr = drain(stderr).await;
                drop(stdout);
                ExecutionOutcome::Failure(
                    ExecutionFailure::new(
                        FailureKind::NonZeroExit,
                        format!("{tool} timed out after {limit:?}"),
                    )
                    .with_stderr(stderr),
                )
            }
            Err(e) => {
                warn!(tool = %tool, error = %e, "Failed waiting for process");
                self.terminate(handle.as_mut()).await;
                ExecutionOutcome::failure(
                    FailureKind::NonZeroExit,
                    format!("failed waiting for {tool}: {e}"),
                )
            }
        }
    }

    /// Start a process in its own group with null stdio and return without awaiting it
    pub async fn spawn_detached(
        &self,
        executable: &Path,
        argv: &[String],
        env: &HashMap<String, String>,
    ) -> Result<ProcessId, RunnerError> {
        let handle = self
            .manager
            .spawn_process(executable, argv, &SpawnOptions::detached().with_env(env))
            .await
            .map_err(|e| {
                ExecutionFailure::new(
                    FailureKind::Spawn,
                    format!("failed to start {}: {e:#}", tool_name(executable)),
                )
            })?;

        let pid = handle.get_pid().ok_or_else(|| {
            ExecutionFailure::new(
                FailureKind::Spawn,
                format!("{} exited immediately", tool_name(executable)),
            )
        })?;

        info!(pid = %pid, executable = %executable.display(), "Detached process started");
        Ok(pid)
    }

    /// Run with stdio forwarded live to this process's stdout and stderr
    ///
    /// Ctrl-C terminates the child and its group.
    pub async fn run_attached(
        &self,
        executable: &Path,
        argv: &[String],
        options: &RunOptions,
    ) -> ExecutionOutcome {
        let tool = tool_name(executable);

        let mut handle = match self
            .manager
            .spawn_process(executable, argv, &options.spawn_options())
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                return ExecutionOutcome::failure(
                    FailureKind::Spawn,
                    format!("failed to start {tool}: {e:#}"),
                );
            }
        };

        let forwarders: Vec<JoinHandle<()>> = [
            handle
                .take_stdout()
                .map(|out| forward(out, StdioSink::stdout())),
            handle
                .take_stderr()
                .map(|err| forward(err, StdioSink::stderr())),
        ]
        .into_iter()
        .flatten()
        .collect();

        let exited = tokio::select! {
            status = handle.wait() => Some(status),
            _ = tokio::signal::ctrl_c() => None,
        };

        let outcome = match exited {
            Some(Ok(ProcessStatus::Exited(status))) if status.success() => {
                ExecutionOutcome::success("", "")
            }
            Some(Ok(status)) => ExecutionOutcome::failure(
                FailureKind::NonZeroExit,
                match status.code() {
                    Some(code) => format!("{tool} exited with code {code}"),
                    None => format!("{tool} was terminated by a signal"),
                },
            ),
            Some(Err(e)) => ExecutionOutcome::failure(
                FailureKind::NonZeroExit,
                format!("failed waiting for {tool}: {e}"),
            ),
            None => {
                info!(tool = %tool, "Interrupted, stopping foreground process");
                self.terminate(handle.as_mut()).await;
                ExecutionOutcome::success("", "")
            }
        };

        for forwarder in forwarders {
            let _ = tokio::time::timeout(DRAIN_LIMIT, forwarder).await;
        }

        outcome
    }

    async fn terminate(&self, handle: &mut dyn ProcessHandle) {
        match self.manager.terminate_completely(handle).await {
            TerminationResult::Success | TerminationResult::ProcessNotFound => {}
            result => warn!(result = ?result, "Process termination incomplete"),
        }
        // Reap so no zombie is left behind
        if let Err(e) = handle.wait().await {
            debug!(error = %e, "Reaping terminated process failed");
        }
    }
}

fn tool_name(executable: &Path) -> String {
    executable
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| executable.display().to_string())
}

fn collect<R>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    pipe.map(|mut pipe| {
        tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Err(e) = pipe.read_to_end(&mut buf).await {
                debug!(error = %e, "Reading child output failed");
            }
            buf
        })
    })
}

/// Buffered output of one stream; pipes held open by stray grandchildren are abandoned
async fn drain(task: Option<JoinHandle<Vec<u8>>>) -> String {
    let Some(task) = task else {
        return String::new();
    };

    let abort = task.abort_handle();
    match tokio::time::timeout(DRAIN_LIMIT, task).await {
        Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
        Ok(Err(e)) => {
            debug!(error = %e, "Output reader task failed");
            String::new()
        }
        Err(_) => {
            abort.abort();
            String::new()
        }
    }
}

fn forward<R>(pipe: R, sink: StdioSink) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = oscal_runner_core::stream(pipe, sink).await {
            debug!(error = %e, "Forwarding child output stopped");
        }
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn test_exit_zero_is_success_even_with_stderr() {
        let runner = ProcessRunner::new();
        let outcome = runner
            .run(
                Path::new("sh"),
                &sh("echo out; echo warn >&2"),
                &RunOptions::default(),
            )
            .await;

        assert_eq!(outcome, ExecutionOutcome::success("out\n", "warn\n"));
    }

    #[tokio::test]
    async fn test_non_zero_exit_carries_stderr() {
        let runner = ProcessRunner::new();
        let outcome = runner
            .run(
                Path::new("sh"),
                &sh("echo 'broken document' >&2; exit 2"),
                &RunOptions::default(),
            )
            .await;

        let failure = outcome.into_result().unwrap_err();
        assert_eq!(failure.kind, FailureKind::NonZeroExit);
        assert_eq!(failure.message, "sh exited with code 2");
        assert_eq!(failure.stderr.as_deref(), Some("broken document\n"));
    }

    #[tokio::test]
    async fn test_missing_executable_is_spawn_failure() {
        let runner = ProcessRunner::new();
        let outcome = runner
            .run(
                Path::new("/nonexistent/oscal-cli"),
                &[],
                &RunOptions::default(),
            )
            .await;

        assert_eq!(outcome.failure_kind(), Some(FailureKind::Spawn));
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let runner = ProcessRunner::new();
        let started = std::time::Instant::now();
        let outcome = runner
            .run(
                Path::new("sh"),
                &sh("sleep 30"),
                &RunOptions::default().with_timeout(Some(Duration::from_millis(200))),
            )
            .await;

        let failure = outcome.into_result().unwrap_err();
        assert_eq!(failure.kind, FailureKind::NonZeroExit);
        assert!(failure.message.contains("timed out"), "{}", failure.message);
        assert!(started.elapsed() < Duration::from_secs(20));
    }

    #[tokio::test]
    async fn test_env_and_working_dir_reach_child() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ProcessRunner::new();
        let outcome = runner
            .run(
                Path::new("sh"),
                &sh("printf '%s ' \"$OSCAL_TEST_VALUE\"; pwd"),
                &RunOptions::default()
                    .with_env("OSCAL_TEST_VALUE", "marker")
                    .with_working_dir(dir.path()),
            )
            .await;

        let stdout = outcome.into_result().unwrap();
        let canonical = dir.path().canonicalize().unwrap();
        assert!(stdout.starts_with("marker "));
        assert!(
            stdout.trim_end().ends_with(canonical.to_str().unwrap())
                || stdout.trim_end().ends_with(dir.path().to_str().unwrap())
        );
    }

    #[tokio::test]
    async fn test_spawn_detached_returns_live_pid() {
        let runner = ProcessRunner::new();
        let pid = runner
            .spawn_detached(Path::new("sleep"), &["30".to_string()], &HashMap::new())
            .await
            .unwrap();

        assert!(runner.manager().is_alive(pid).await);
        runner.manager().terminate_pid(pid).await;
    }

    #[tokio::test]
    async fn test_run_attached_reports_exit() {
        let runner = ProcessRunner::new();
        let outcome = runner
            .run_attached(Path::new("sh"), &sh("exit 4"), &RunOptions::default())
            .await;
        assert_eq!(outcome.failure_kind(), Some(FailureKind::NonZeroExit));
    }

    #[tokio::test]
    async fn test_run_attached_forwards_invalid_utf8_until_exit() {
        let runner = ProcessRunner::new();
        let script = r#"printf '\377\n'
sleep 0.2
i=0
while [ $i -lt 2000 ]; do echo "line $i"; i=$((i+1)); done
exit 0"#;

        let outcome = runner
            .run_attached(Path::new("sh"), &sh(script), &RunOptions::default())
            .await;
        assert_eq!(outcome, ExecutionOutcome::success("", ""));
    }
}
