use crate::executor::{Executor, LocalExecutor, ServerExecutor};
use crate::runner::ProcessRunner;
use oscal_runner_core::{ExecutionOutcome, ExecutorKind, Operation, RunnerConfig, RunnerError};
use std::sync::Arc;
use tracing::{info, warn};

/// Dispatches an operation to the preferred backend, retrying once locally
/// when the server could not be reached or answered with an error
///
/// A local failure is returned as-is; the server is never tried second.
#[derive(Clone)]
pub struct FallbackCoordinator {
    local: Arc<dyn Executor>,
    remote: Arc<dyn Executor>,
}

impl FallbackCoordinator {
    pub fn new(local: Arc<dyn Executor>, remote: Arc<dyn Executor>) -> Self {
        Self { local, remote }
    }

    /// Coordinator over the installed tool and the configured local server
    pub fn from_config(config: &RunnerConfig, runner: ProcessRunner) -> Result<Self, RunnerError> {
        let local = LocalExecutor::new(config, runner);
        let remote = ServerExecutor::new(config)?;
        Ok(Self::new(Arc::new(local), Arc::new(remote)))
    }

    pub fn executor(&self, kind: ExecutorKind) -> &Arc<dyn Executor> {
        match kind {
            ExecutorKind::Local => &self.local,
            ExecutorKind::Remote => &self.remote,
        }
    }

    pub async fn execute_with_fallback(
        &self,
        operation: &Operation,
        preferred: ExecutorKind,
    ) -> ExecutionOutcome {
        info!(operation = %operation.name(), executor = %preferred, "Dispatching operation");
        let first = self.executor(preferred).execute(operation).await;

        match (preferred, first.failure_kind()) {
            (ExecutorKind::Remote, Some(kind)) if kind.is_fallback_eligible() => {
                let reason = match &first {
                    ExecutionOutcome::Failure(failure) => failure.message.as_str(),
                    ExecutionOutcome::Success { .. } => "",
                };
                warn!(
                    operation = %operation.name(),
                    kind = %kind,
                    reason = %reason,
                    "Server attempt failed, retrying with the local tool"
                );
                self.local.execute(operation).await
            }
            _ => first,
        }
    }
}
