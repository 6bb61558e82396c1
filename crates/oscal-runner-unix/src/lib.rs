//! Unix process management: process groups, signals and the host process table

mod unix_process_manager;

pub use unix_process_manager::{UnixProcessHandle, UnixProcessManager};

/// Unix-specific process manager factory
pub struct UnixProcessManagerFactory;

#[cfg(unix)]
impl oscal_runner_core::ProcessManagerFactory for UnixProcessManagerFactory {
    type Manager = UnixProcessManager;

    fn create_process_manager() -> UnixProcessManager {
        use oscal_runner_core::ProcessManager;
        UnixProcessManager::new()
    }

    fn platform_name() -> &'static str {
        "Unix"
    }
}
