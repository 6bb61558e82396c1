use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::time::Duration;
use tokio::process::{ChildStderr, ChildStdout};

/// Unique identifier for a process
pub type ProcessId = u32;

/// Status of a process after waiting on it
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessStatus {
    /// Process exited with status information
    Exited(ExitStatus),
    /// The wait limit elapsed while the process was still running
    TimedOut,
}

impl ProcessStatus {
    /// Exit code, `None` when the process was killed by a signal or is still running
    pub fn code(&self) -> Option<i32> {
        match self {
            ProcessStatus::Exited(status) => status.code(),
            ProcessStatus::TimedOut => None,
        }
    }
}

/// Result of a process termination operation
#[derive(Debug, Clone, PartialEq)]
pub enum TerminationResult {
    /// Process was successfully terminated
    Success,
    /// Process was not found (already exited)
    ProcessNotFound,
    /// Access denied (insufficient privileges)
    AccessDenied,
    /// Operation failed with specific error message
    Failed(String),
}

/// A process discovered in the host process table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: ProcessId,
    pub name: String,
    pub command_line: String,
}

impl ProcessInfo {
    /// Substring heuristic used to find service instances by binary name
    pub fn matches(&self, needle: &str) -> bool {
        self.name.contains(needle) || self.command_line.contains(needle)
    }
}

/// How a child process is launched
#[derive(Debug, Clone, Default)]
pub struct SpawnOptions {
    pub working_dir: Option<PathBuf>,
    pub env: HashMap<String, String>,
    /// Detach from the caller: own process group, null stdio, never awaited
    pub detached: bool,
}

impl SpawnOptions {
    pub fn piped() -> Self {
        Self::default()
    }

    pub fn detached() -> Self {
        Self {
            detached: true,
            ..Self::default()
        }
    }

    pub fn with_env(mut self, env: &HashMap<String, String>) -> Self {
        self.env.extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn with_working_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.working_dir = dir;
        self
    }
}

/// Core trait for process lifecycle management
#[async_trait]
pub trait ProcessLifecycle: Send + Sync {
    /// Spawn a new process with the given command and arguments
    async fn spawn_process(
        &self,
        command: &Path,
        args: &[String],
        options: &SpawnOptions,
    ) -> Result<Box<dyn ProcessHandle>>;

    /// OS-level liveness probe for an arbitrary PID
    async fn is_alive(&self, pid: ProcessId) -> bool;

    /// Every live process whose name or command line contains `needle`
    async fn find_processes(&self, needle: &str) -> Result<Vec<ProcessInfo>>;

    /// Wait for a process to exit with optional timeout
    async fn wait_for_exit(
        &self,
        handle: &mut dyn ProcessHandle,
        timeout: Option<Duration>,
    ) -> Result<ProcessStatus> {
        match timeout {
            Some(duration) => match tokio::time::timeout(duration, handle.wait()).await {
                Ok(status) => status,
                Err(_) => Ok(ProcessStatus::TimedOut),
            },
            None => handle.wait().await,
        }
    }
}

/// Trait for comprehensive process termination including process trees
#[async_trait]
pub trait ProcessTermination: Send + Sync {
    /// Terminate a single process gracefully (SIGTERM on Unix)
    async fn terminate_gracefully(&self, handle: &mut dyn ProcessHandle) -> TerminationResult;

    /// Force kill a single process (SIGKILL on Unix)
    async fn force_kill(&self, handle: &mut dyn ProcessHandle) -> TerminationResult;

    /// Terminate a process by PID, escalating from graceful to forced
    async fn terminate_pid(&self, pid: ProcessId) -> TerminationResult;

    /// Find all child processes of a given process
    async fn find_child_processes(&self, pid: ProcessId) -> Result<Vec<ProcessId>>;

    /// Terminate an entire process tree (parent and all descendants)
    async fn terminate_process_tree(&self, root_pid: ProcessId) -> TerminationResult;

    /// Terminate a process group (Unix only, returns ProcessNotFound on Windows)
    async fn terminate_process_group(&self, pid: ProcessId) -> TerminationResult;

    /// Complete termination strategy: process group -> process tree -> individual process
    async fn terminate_completely(&self, handle: &mut dyn ProcessHandle) -> TerminationResult {
        if let Some(pid) = handle.get_pid() {
            if self.terminate_process_group(pid).await == TerminationResult::Success
                && !handle.is_running().await
            {
                return TerminationResult::Success;
            }

            if self.terminate_process_tree(pid).await == TerminationResult::Success
                && !handle.is_running().await
            {
                return TerminationResult::Success;
            }
        }

        match self.terminate_gracefully(handle).await {
            TerminationResult::Success => {
                tokio::time::sleep(Duration::from_millis(1000)).await;

                if handle.is_running().await {
                    self.force_kill(handle).await
                } else {
                    TerminationResult::Success
                }
            }
            TerminationResult::ProcessNotFound => TerminationResult::Success,
            _ => self.force_kill(handle).await,
        }
    }
}

/// Trait representing a handle to a running process
#[async_trait]
pub trait ProcessHandle: Send + Sync {
    /// Get the process ID (None if process has exited)
    fn get_pid(&self) -> Option<ProcessId>;

    /// Get the command that started this process
    fn get_command(&self) -> &str;

    /// Get the arguments passed to this process
    fn get_args(&self) -> &[String];

    /// Take the piped stdout, `None` for detached processes or once taken
    fn take_stdout(&mut self) -> Option<ChildStdout>;

    /// Take the piped stderr, `None` for detached processes or once taken
    fn take_stderr(&mut self) -> Option<ChildStderr>;

    /// Check if the process is still running (non-blocking)
    async fn is_running(&self) -> bool;

    /// Wait for the process to exit (blocking)
    async fn wait(&mut self) -> Result<ProcessStatus>;

    /// Kill the process (platform-specific implementation)
    async fn kill(&mut self) -> Result<()>;
}

/// High-level process manager trait that combines lifecycle and termination
pub trait ProcessManager: ProcessLifecycle + ProcessTermination {
    /// Create a new process manager instance
    fn new() -> Self
    where
        Self: Sized;
}

/// Factory trait for creating platform-specific process managers
pub trait ProcessManagerFactory {
    /// The type of process manager this factory creates
    type Manager: ProcessManager;

    /// Create a process manager for the current platform
    fn create_process_manager() -> Self::Manager;

    /// Get the platform name for logging and debugging
    fn platform_name() -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_info_matching() {
        let info = ProcessInfo {
            pid: 4242,
            name: "java".to_string(),
            command_line: "java -jar /opt/oscal/lib/oscal-server.jar --port 8888".to_string(),
        };
        assert!(info.matches("oscal-server"));
        assert!(info.matches("java"));
        assert!(!info.matches("oscal-cli"));
    }

    #[test]
    fn test_spawn_options() {
        let env: HashMap<String, String> = [("OSCAL_SERVER_PORT".to_string(), "8888".to_string())]
            .into_iter()
            .collect();
        let options = SpawnOptions::detached().with_env(&env);
        assert!(options.detached);
        assert_eq!(options.env.get("OSCAL_SERVER_PORT").map(String::as_str), Some("8888"));
        assert!(!SpawnOptions::piped().detached);
    }

    #[test]
    fn test_timed_out_has_no_code() {
        assert_eq!(ProcessStatus::TimedOut.code(), None);
    }
}
