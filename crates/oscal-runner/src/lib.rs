//! Dual-backend dispatch for OSCAL document operations
//!
//! Operations run either through the installed `oscal-cli` or against a local
//! `oscal-server`, with a one-shot local retry when the server cannot help.
//! The background server instance is supervised through a persisted process
//! record.

pub mod executor;
pub mod fallback;
pub mod lifecycle;
pub mod logging;
pub mod runner;
pub mod shaper;

pub use executor::{
    Executor, LocalExecutor, RequestObserver, ServerExecutor, ServerRoute, TracingObserver,
};
pub use fallback::FallbackCoordinator;
pub use lifecycle::{
    PidRecordStore, ServiceLifecycleManager, ServiceRuntimeContext, StartOutcome, StatusReport,
    StopReport,
};
pub use runner::{ExecutableResolver, PlatformProcessManager, ProcessRunner, RunOptions};
pub use shaper::{SarifLog, SarifValidator};

// Re-export core functionality
pub use oscal_runner_core::*;
