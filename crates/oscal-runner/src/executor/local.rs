use super::Executor;
use crate::runner::{ExecutableResolver, ProcessRunner, RunOptions};
use async_trait::async_trait;
use oscal_runner_core::{
    ExecutionFailure, ExecutionOutcome, ExecutorKind, FailureKind, Operation, RunnerConfig,
    RunnerError,
};
use std::path::PathBuf;
use tracing::{info, warn};

/// Runs operations through the installed command-line tool
pub struct LocalExecutor {
    runner: ProcessRunner,
    resolver: ExecutableResolver,
    binary: String,
    explicit_path: Option<PathBuf>,
    options: RunOptions,
}

impl LocalExecutor {
    pub fn new(config: &RunnerConfig, runner: ProcessRunner) -> Self {
        Self {
            runner,
            resolver: ExecutableResolver::from_config(config),
            binary: config.cli_binary.clone(),
            explicit_path: config.cli_path.clone(),
            options: RunOptions::default().with_timeout(config.timeouts.process_timeout()),
        }
    }

    /// Show a spinner while the tool runs
    pub fn with_loader(mut self, capture_loader: bool) -> Self {
        self.options = self.options.with_loader(capture_loader);
        self
    }

    pub fn resolve(&self) -> Result<PathBuf, RunnerError> {
        self.resolver
            .resolve(&self.binary, self.explicit_path.as_deref())
    }
}

#[async_trait]
impl Executor for LocalExecutor {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Local
    }

    async fn execute(&self, operation: &Operation) -> ExecutionOutcome {
        let executable = match self.resolve() {
            Ok(path) => path,
            Err(e) => {
                warn!(binary = %self.binary, error = %e, "Command-line tool unavailable");
                return ExecutionOutcome::Failure(ExecutionFailure::new(
                    FailureKind::Spawn,
                    e.to_string(),
                ));
            }
        };

        let argv = operation.argv();
        info!(
            executable = %executable.display(),
            operation = %operation.name(),
            "Running operation locally"
        );
        self.runner.run(&executable, &argv, &self.options).await
    }
}
