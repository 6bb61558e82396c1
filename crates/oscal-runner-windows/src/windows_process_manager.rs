use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tracing::{debug, info, warn};

use oscal_runner_core::*;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;
#[cfg(windows)]
const DETACHED_PROCESS: u32 = 0x0000_0008;
#[cfg(windows)]
const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;

/// Windows-specific process handle implementation
pub struct WindowsProcessHandle {
    child: Child,
    command: String,
    args: Vec<String>,
}

impl WindowsProcessHandle {
    pub fn new(child: Child, command: String, args: Vec<String>) -> Self {
        Self {
            child,
            command,
            args,
        }
    }
}

#[async_trait]
impl ProcessHandle for WindowsProcessHandle {
    fn get_pid(&self) -> Option<ProcessId> {
        self.child.id()
    }

    fn get_command(&self) -> &str {
        &self.command
    }

    fn get_args(&self) -> &[String] {
        &self.args
    }

    fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    async fn is_running(&self) -> bool {
        match self.get_pid() {
            Some(pid) => pid_alive(pid),
            None => {
                warn!("Windows process handle has no PID - process may have exited");
                false
            }
        }
    }

    async fn wait(&mut self) -> Result<ProcessStatus> {
        let status = self.child.wait().await?;
        Ok(ProcessStatus::Exited(status))
    }

    async fn kill(&mut self) -> Result<()> {
        self.child
            .kill()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to kill process: {}", e))
    }
}

fn pid_alive(pid: ProcessId) -> bool {
    let sys_pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[sys_pid]),
        true,
        ProcessRefreshKind::nothing(),
    );
    system.process(sys_pid).is_some()
}

/// Windows-specific process manager with process tree management
pub struct WindowsProcessManager {
    system: Mutex<System>,
}

impl Default for WindowsProcessManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessLifecycle for WindowsProcessManager {
    async fn spawn_process(
        &self,
        command: &Path,
        args: &[String],
        options: &SpawnOptions,
    ) -> Result<Box<dyn ProcessHandle>> {
        let mut cmd = Command::new(command);
        cmd.args(args);

        if let Some(dir) = &options.working_dir {
            cmd.current_dir(dir);
        }

        cmd.envs(&options.env);
        cmd.stdin(Stdio::null());

        if options.detached {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
            #[cfg(windows)]
            cmd.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
        } else {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
            // No console popup for captured tool runs
            #[cfg(windows)]
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        let child = cmd
            .spawn()
            .with_context(|| format!("cannot execute {}", command.display()))?;

        if let Some(pid) = child.id() {
            info!(
                pid = %pid,
                command = %command.display(),
                args = ?args,
                detached = options.detached,
                "Spawned Windows process"
            );
        }

        Ok(Box::new(WindowsProcessHandle::new(
            child,
            command.display().to_string(),
            args.to_vec(),
        )))
    }

    async fn is_alive(&self, pid: ProcessId) -> bool {
        pid_alive(pid)
    }

    async fn find_processes(&self, needle: &str) -> Result<Vec<ProcessInfo>> {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::everything(),
        );

        let mut found: Vec<ProcessInfo> = system
            .processes()
            .iter()
            .map(|(pid, process)| ProcessInfo {
                pid: pid.as_u32(),
                name: process.name().to_string_lossy().into_owned(),
                command_line: process
                    .cmd()
                    .iter()
                    .map(|arg| arg.to_string_lossy())
                    .collect::<Vec<_>>()
                    .join(" "),
            })
            .filter(|info| info.matches(needle))
            .collect();

        found.sort_by_key(|info| info.pid);
        debug!(needle = %needle, count = found.len(), "Scanned process table");
        Ok(found)
    }
}

#[async_trait]
impl ProcessTermination for WindowsProcessManager {
    async fn terminate_gracefully(&self, handle: &mut dyn ProcessHandle) -> TerminationResult {
        let Some(pid) = handle.get_pid() else {
            return TerminationResult::ProcessNotFound;
        };

        match self.taskkill(pid, false).await {
            Ok(true) => {
                info!(pid = %pid, "Successfully sent graceful termination to process");
                TerminationResult::Success
            }
            Ok(false) => {
                warn!(pid = %pid, "Process not found for graceful termination");
                TerminationResult::ProcessNotFound
            }
            Err(e) => {
                warn!(pid = %pid, error = %e, "Failed to gracefully terminate process");
                TerminationResult::Failed(format!("Graceful termination failed: {e}"))
            }
        }
    }

    async fn force_kill(&self, handle: &mut dyn ProcessHandle) -> TerminationResult {
        let Some(pid) = handle.get_pid() else {
            return TerminationResult::ProcessNotFound;
        };

        match self.taskkill(pid, true).await {
            Ok(true) => {
                info!(pid = %pid, "Successfully force killed process");
                if let Err(e) = handle.kill().await {
                    warn!(error = %e, "Handle kill cleanup failed");
                }
                TerminationResult::Success
            }
            Ok(false) => {
                info!(pid = %pid, "Process not found for force kill");
                TerminationResult::ProcessNotFound
            }
            Err(e) => {
                warn!(pid = %pid, error = %e, "Failed to force kill process");
                TerminationResult::Failed(format!("Force kill failed: {e}"))
            }
        }
    }

    async fn terminate_pid(&self, pid: ProcessId) -> TerminationResult {
        if !pid_alive(pid) {
            return TerminationResult::ProcessNotFound;
        }

        match self.taskkill(pid, false).await {
            Ok(true) => {
                info!(pid = %pid, "Sent graceful termination to process");
                tokio::time::sleep(Duration::from_millis(1000)).await;

                if !pid_alive(pid) {
                    info!(pid = %pid, "Process terminated gracefully");
                    return TerminationResult::Success;
                }

                match self.taskkill(pid, true).await {
                    Ok(_) => {
                        info!(pid = %pid, "Force killed process");
                        TerminationResult::Success
                    }
                    Err(e) => {
                        warn!(pid = %pid, error = %e, "Failed to force kill process");
                        TerminationResult::Failed(format!("Force kill failed: {e}"))
                    }
                }
            }
            // Console-less processes ignore the polite request
            Ok(false) => match self.taskkill(pid, true).await {
                Ok(true) => TerminationResult::Success,
                Ok(false) => TerminationResult::AccessDenied,
                Err(e) => TerminationResult::Failed(format!("Force kill failed: {e}")),
            },
            Err(e) => {
                warn!(pid = %pid, error = %e, "Failed to send graceful termination to process");
                TerminationResult::Failed(format!("Graceful termination failed: {e}"))
            }
        }
    }

    async fn find_child_processes(&self, parent_pid: ProcessId) -> Result<Vec<ProcessId>> {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing(),
        );

        let mut children = Vec::new();
        Self::find_children_recursive(&system, parent_pid, &mut children);
        Ok(children)
    }

    async fn terminate_process_tree(&self, root_pid: ProcessId) -> TerminationResult {
        info!(root_pid = %root_pid, "Terminating process tree for root PID");

        match self.taskkill_tree(root_pid).await {
            Ok(true) => {
                info!(root_pid = %root_pid, "Successfully terminated process tree for PID");
                TerminationResult::Success
            }
            Ok(false) => {
                info!(root_pid = %root_pid, "Process tree for PID not found");
                TerminationResult::ProcessNotFound
            }
            Err(e) => {
                warn!(root_pid = %root_pid, e = %e, "taskkill /T failed, walking the tree");

                let children = match self.find_child_processes(root_pid).await {
                    Ok(children) => children,
                    Err(e) => {
                        return TerminationResult::Failed(format!(
                            "Failed to enumerate children: {e}"
                        ));
                    }
                };

                for child_pid in &children {
                    match self.terminate_pid(*child_pid).await {
                        TerminationResult::Success | TerminationResult::ProcessNotFound => {}
                        result => {
                            warn!(pid = %child_pid, result = ?result, "Failed to terminate child process");
                        }
                    }
                }

                self.terminate_pid(root_pid).await
            }
        }
    }

    async fn terminate_process_group(&self, _pid: ProcessId) -> TerminationResult {
        // No Unix-style process groups here
        TerminationResult::ProcessNotFound
    }
}

impl WindowsProcessManager {
    async fn taskkill(&self, pid: u32, force: bool) -> Result<bool> {
        let pid_string = pid.to_string();
        let mut args = vec!["/PID", &pid_string];
        if force {
            args.push("/F");
        }

        let output = Command::new("taskkill").args(&args).output().await?;
        Ok(output.status.success())
    }

    async fn taskkill_tree(&self, pid: u32) -> Result<bool> {
        let output = Command::new("taskkill")
            .args(["/F", "/T", "/PID", &pid.to_string()])
            .output()
            .await?;

        Ok(output.status.success())
    }

    fn find_children_recursive(system: &System, parent_pid: u32, result: &mut Vec<u32>) {
        for (pid, process) in system.processes() {
            if process.parent().is_some_and(|ppid| ppid.as_u32() == parent_pid) {
                let child_pid = pid.as_u32();
                Self::find_children_recursive(system, child_pid, result);
                result.push(child_pid);
            }
        }
    }
}

impl ProcessManager for WindowsProcessManager {
    fn new() -> Self {
        info!("Initializing Windows process manager with system monitoring");
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

#[cfg(all(test, windows))]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_spawn_piped_captures_output() {
        let manager = WindowsProcessManager::new();
        let mut handle = manager
            .spawn_process(
                Path::new("cmd"),
                &["/C".to_string(), "echo hello".to_string()],
                &SpawnOptions::piped(),
            )
            .await
            .unwrap();

        let mut stdout = handle.take_stdout().unwrap();
        let mut out = String::new();
        stdout.read_to_string(&mut out).await.unwrap();
        let status = handle.wait().await.unwrap();

        assert_eq!(out.trim(), "hello");
        assert_eq!(status.code(), Some(0));
    }

    #[tokio::test]
    async fn test_liveness_probe() {
        let manager = WindowsProcessManager::new();
        assert!(manager.is_alive(std::process::id()).await);
        assert!(!manager.is_alive(u32::MAX - 3).await);
    }
}
