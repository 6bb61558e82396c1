//! The two interchangeable backends an [`Operation`] can be dispatched to

mod local;
mod observer;
mod server;

pub use local::LocalExecutor;
pub use observer::{RequestObserver, TracingObserver};
pub use server::{ServerExecutor, ServerRoute, accept_header};

use async_trait::async_trait;
use oscal_runner_core::{ExecutionOutcome, ExecutorKind, Operation};

/// A backend that runs one operation attempt
///
/// Failures are reported inside the outcome, never as a panic or `Err`, so the
/// caller can decide on fallback.
#[async_trait]
pub trait Executor: Send + Sync {
    fn kind(&self) -> ExecutorKind;

    async fn execute(&self, operation: &Operation) -> ExecutionOutcome;
}
