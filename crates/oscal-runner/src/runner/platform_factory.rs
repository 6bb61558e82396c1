use anyhow::Result;
use async_trait::async_trait;
use oscal_runner_core::{
    ProcessHandle, ProcessId, ProcessInfo, ProcessLifecycle, ProcessManager,
    ProcessManagerFactory, ProcessStatus, ProcessTermination, SpawnOptions, TerminationResult,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Platform-specific process manager implementations
#[derive(Clone)]
pub enum PlatformProcessManager {
    #[cfg(unix)]
    Unix(Arc<oscal_runner_unix::UnixProcessManager>),
    #[cfg(windows)]
    Windows(Arc<oscal_runner_windows::WindowsProcessManager>),
}

impl PlatformProcessManager {
    pub fn platform_name() -> &'static str {
        #[cfg(unix)]
        {
            oscal_runner_unix::UnixProcessManagerFactory::platform_name()
        }

        #[cfg(windows)]
        {
            oscal_runner_windows::WindowsProcessManagerFactory::platform_name()
        }

        #[cfg(not(any(unix, windows)))]
        {
            "Unknown"
        }
    }
}

impl ProcessManager for PlatformProcessManager {
    fn new() -> Self {
        #[cfg(unix)]
        {
            info!("Creating Unix process manager");
            Self::Unix(Arc::new(
                oscal_runner_unix::UnixProcessManagerFactory::create_process_manager(),
            ))
        }

        #[cfg(windows)]
        {
            info!("Creating Windows process manager");
            Self::Windows(Arc::new(
                oscal_runner_windows::WindowsProcessManagerFactory::create_process_manager(),
            ))
        }

        #[cfg(not(any(unix, windows)))]
        {
            compile_error!("Unsupported platform: only Unix and Windows are currently supported");
        }
    }
}

impl Default for PlatformProcessManager {
    fn default() -> Self {
        <Self as ProcessManager>::new()
    }
}

#[async_trait]
impl ProcessLifecycle for PlatformProcessManager {
    async fn spawn_process(
        &self,
        command: &Path,
        args: &[String],
        options: &SpawnOptions,
    ) -> Result<Box<dyn ProcessHandle>> {
        match self {
            #[cfg(unix)]
            Self::Unix(manager) => manager.spawn_process(command, args, options).await,
            #[cfg(windows)]
            Self::Windows(manager) => manager.spawn_process(command, args, options).await,
        }
    }

    async fn is_alive(&self, pid: ProcessId) -> bool {
        match self {
            #[cfg(unix)]
            Self::Unix(manager) => manager.is_alive(pid).await,
            #[cfg(windows)]
            Self::Windows(manager) => manager.is_alive(pid).await,
        }
    }

    async fn find_processes(&self, needle: &str) -> Result<Vec<ProcessInfo>> {
        match self {
            #[cfg(unix)]
            Self::Unix(manager) => manager.find_processes(needle).await,
            #[cfg(windows)]
            Self::Windows(manager) => manager.find_processes(needle).await,
        }
    }

    async fn wait_for_exit(
        &self,
        handle: &mut dyn ProcessHandle,
        timeout: Option<Duration>,
    ) -> Result<ProcessStatus> {
        match self {
            #[cfg(unix)]
            Self::Unix(manager) => manager.wait_for_exit(handle, timeout).await,
            #[cfg(windows)]
            Self::Windows(manager) => manager.wait_for_exit(handle, timeout).await,
        }
    }
}

#[async_trait]
impl ProcessTermination for PlatformProcessManager {
    async fn terminate_gracefully(&self, handle: &mut dyn ProcessHandle) -> TerminationResult {
        match self {
            #[cfg(unix)]
            Self::Unix(manager) => manager.terminate_gracefully(handle).await,
            #[cfg(windows)]
            Self::Windows(manager) => manager.terminate_gracefully(handle).await,
        }
    }

    async fn force_kill(&self, handle: &mut dyn ProcessHandle) -> TerminationResult {
        match self {
            #[cfg(unix)]
            Self::Unix(manager) => manager.force_kill(handle).await,
            #[cfg(windows)]
            Self::Windows(manager) => manager.force_kill(handle).await,
        }
    }

    async fn terminate_pid(&self, pid: ProcessId) -> TerminationResult {
        match self {
            #[cfg(unix)]
            Self::Unix(manager) => manager.terminate_pid(pid).await,
            #[cfg(windows)]
            Self::Windows(manager) => manager.terminate_pid(pid).await,
        }
    }

    async fn find_child_processes(&self, parent_pid: ProcessId) -> Result<Vec<ProcessId>> {
        match self {
            #[cfg(unix)]
            Self::Unix(manager) => manager.find_child_processes(parent_pid).await,
            #[cfg(windows)]
            Self::Windows(manager) => manager.find_child_processes(parent_pid).await,
        }
    }

    async fn terminate_process_tree(&self, root_pid: ProcessId) -> TerminationResult {
        match self {
            #[cfg(unix)]
            Self::Unix(manager) => manager.terminate_process_tree(root_pid).await,
            #[cfg(windows)]
            Self::Windows(manager) => manager.terminate_process_tree(root_pid).await,
        }
    }

    async fn terminate_process_group(&self, pid: ProcessId) -> TerminationResult {
        match self {
            #[cfg(unix)]
            Self::Unix(manager) => manager.terminate_process_group(pid).await,
            #[cfg(windows)]
            Self::Windows(manager) => manager.terminate_process_group(pid).await,
        }
    }
}

/// Platform-agnostic factory that selects the appropriate implementation at compile time
pub struct PlatformProcessManagerFactory;

impl ProcessManagerFactory for PlatformProcessManagerFactory {
    type Manager = PlatformProcessManager;

    fn create_process_manager() -> PlatformProcessManager {
        PlatformProcessManager::default()
    }

    fn platform_name() -> &'static str {
        PlatformProcessManager::platform_name()
    }
}
