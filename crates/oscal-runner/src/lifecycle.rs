//! Supervision of the background oscal-server instance

mod context;
mod manager;
mod record_store;

pub use context::ServiceRuntimeContext;
pub use manager::{ServiceLifecycleManager, StartOutcome, StatusReport, StopReport};
pub use record_store::{PidRecordStore, StartLock};
