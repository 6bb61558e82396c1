//! Process plumbing: platform dispatch, tool resolution and the process runner

pub mod executable;
pub mod platform_factory;
pub mod process_runner;
mod spinner;

pub use executable::{ExecutableResolver, select_candidate};
pub use platform_factory::{PlatformProcessManager, PlatformProcessManagerFactory};
pub use process_runner::{ProcessRunner, RunOptions};
pub use spinner::Spinner;
