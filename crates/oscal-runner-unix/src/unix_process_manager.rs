use anyhow::Result;
use async_trait::async_trait;
use oscal_runner_core::{
    ProcessHandle, ProcessId, ProcessInfo, ProcessLifecycle, ProcessManager, ProcessStatus,
    ProcessTermination, SpawnOptions, TerminationResult,
};
use std::path::Path;
use std::time::Duration;

#[cfg(unix)]
mod unix_impl {
    use super::*;
    use anyhow::Context;
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid as NixPid;
    use std::process::Stdio;
    use std::sync::{Mutex, PoisonError};
    use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
    use tokio::process::{Child, ChildStderr, ChildStdout, Command};
    use tracing::{debug, info, warn};

    const GRACE_PERIOD: Duration = Duration::from_millis(500);
    const GROUP_GRACE_PERIOD: Duration = Duration::from_millis(2000);
    const POLL_INTERVAL: Duration = Duration::from_millis(50);

    /// Unix-specific process handle implementation
    pub struct UnixProcessHandle {
        child: Child,
        command: String,
        args: Vec<String>,
    }

    impl UnixProcessHandle {
        pub fn new(child: Child, command: String, args: Vec<String>) -> Self {
            Self {
                child,
                command,
                args,
            }
        }
    }

    #[async_trait]
    impl ProcessHandle for UnixProcessHandle {
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
                    debug!("Unix process handle has no PID - process has been reaped");
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

    /// Signal 0 probe. A zombie still answers signals but no longer runs,
    /// so it is reported dead.
    pub(crate) fn pid_alive(pid: ProcessId) -> bool {
        let Ok(raw) = i32::try_from(pid) else {
            return false;
        };

        match signal::kill(NixPid::from_raw(raw), None) {
            Ok(()) | Err(nix::errno::Errno::EPERM) => !is_zombie(pid),
            Err(_) => false,
        }
    }

    fn is_zombie(pid: ProcessId) -> bool {
        let sys_pid = Pid::from_u32(pid);
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[sys_pid]),
            true,
            ProcessRefreshKind::nothing(),
        );

        system
            .process(sys_pid)
            .is_some_and(|p| p.status() == sysinfo::ProcessStatus::Zombie)
    }

    /// Unix-specific process manager with process group and tree management
    pub struct UnixProcessManager {
        system: Mutex<System>,
    }

    impl Default for UnixProcessManager {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl ProcessLifecycle for UnixProcessManager {
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

            // Own process group so the whole tree can be signalled at once
            cmd.process_group(0);

            cmd.stdin(Stdio::null());
            if options.detached {
                cmd.stdout(Stdio::null()).stderr(Stdio::null());
            } else {
                cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
            }

            let child = cmd
                .spawn()
                .with_context(|| format!("cannot execute {}", command.display()))?;

            if let Some(pid) = child.id() {
                info!(
                    "Spawned Unix process: {} (PID: {}) with args: {:?}",
                    command.display(),
                    pid,
                    args
                );
            }

            Ok(Box::new(UnixProcessHandle::new(
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
                .filter(|(_, process)| process.thread_kind().is_none())
                .filter(|(_, process)| process.status() != sysinfo::ProcessStatus::Zombie)
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
            debug!("Found {} processes matching {:?}", found.len(), needle);
            Ok(found)
        }
    }

    #[async_trait]
    impl ProcessTermination for UnixProcessManager {
        async fn terminate_gracefully(&self, handle: &mut dyn ProcessHandle) -> TerminationResult {
            let Some(pid) = handle.get_pid() else {
                return TerminationResult::ProcessNotFound;
            };

            match send_signal(pid, Signal::SIGTERM) {
                Ok(()) => {
                    info!("Sent SIGTERM to process {}", pid);
                    TerminationResult::Success
                }
                Err(nix::errno::Errno::ESRCH) => {
                    info!("Process {} not found (already terminated)", pid);
                    TerminationResult::ProcessNotFound
                }
                Err(nix::errno::Errno::EPERM) => {
                    warn!("Permission denied to terminate process {}", pid);
                    TerminationResult::AccessDenied
                }
                Err(e) => {
                    warn!("Failed to send SIGTERM to process {}: {}", pid, e);
                    TerminationResult::Failed(format!("SIGTERM failed: {e}"))
                }
            }
        }

        async fn force_kill(&self, handle: &mut dyn ProcessHandle) -> TerminationResult {
            let Some(pid) = handle.get_pid() else {
                return TerminationResult::ProcessNotFound;
            };

            match send_signal(pid, Signal::SIGKILL) {
                Ok(()) => {
                    info!("Sent SIGKILL to process {}", pid);
                    // Reap through the handle as well
                    if let Err(e) = handle.kill().await {
                        warn!("Handle kill cleanup failed: {}", e);
                    }
                    TerminationResult::Success
                }
                Err(nix::errno::Errno::ESRCH) => {
                    info!("Process {} not found (already terminated)", pid);
                    TerminationResult::ProcessNotFound
                }
                Err(nix::errno::Errno::EPERM) => {
                    warn!("Permission denied to kill process {}", pid);
                    TerminationResult::AccessDenied
                }
                Err(e) => {
                    warn!("Failed to send SIGKILL to process {}: {}", pid, e);
                    TerminationResult::Failed(format!("SIGKILL failed: {e}"))
                }
            }
        }

        async fn terminate_pid(&self, pid: ProcessId) -> TerminationResult {
            match send_signal(pid, Signal::SIGTERM) {
                Ok(()) => {
                    info!("Sent SIGTERM to process {}", pid);

                    if wait_until_gone(pid, GRACE_PERIOD).await {
                        return TerminationResult::Success;
                    }

                    match send_signal(pid, Signal::SIGKILL) {
                        Ok(()) => {
                            info!("Sent SIGKILL to process {}", pid);
                            TerminationResult::Success
                        }
                        Err(nix::errno::Errno::ESRCH) => {
                            info!("Process {} already terminated", pid);
                            TerminationResult::Success
                        }
                        Err(e) => {
                            warn!("Failed to kill process {}: {}", pid, e);
                            TerminationResult::Failed(format!("SIGKILL failed: {e}"))
                        }
                    }
                }
                Err(nix::errno::Errno::ESRCH) => {
                    info!("Process {} not found (already terminated)", pid);
                    TerminationResult::ProcessNotFound
                }
                Err(nix::errno::Errno::EPERM) => {
                    warn!("Permission denied to terminate process {}", pid);
                    TerminationResult::AccessDenied
                }
                Err(e) => {
                    warn!("Failed to send SIGTERM to process {}: {e}", pid);
                    TerminationResult::Failed(format!("SIGTERM failed: {e}"))
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
            info!("Terminating process tree for root PID {}", root_pid);

            let children = match self.find_child_processes(root_pid).await {
                Ok(children) => children,
                Err(e) => {
                    warn!("Failed to find child processes for PID {}: {}", root_pid, e);
                    return TerminationResult::Failed(format!("Failed to enumerate children: {e}"));
                }
            };

            if !children.is_empty() {
                info!("Found {} child processes to terminate", children.len());

                // Deepest descendants first
                for child_pid in &children {
                    match self.terminate_pid(*child_pid).await {
                        TerminationResult::Success | TerminationResult::ProcessNotFound => {}
                        result => {
                            warn!("Failed to terminate child process {}: {:?}", child_pid, result);
                        }
                    }
                }
            }

            self.terminate_pid(root_pid).await
        }

        async fn terminate_process_group(&self, pid: ProcessId) -> TerminationResult {
            let Ok(raw) = i32::try_from(pid) else {
                return TerminationResult::ProcessNotFound;
            };
            let pgid = NixPid::from_raw(raw);

            match signal::killpg(pgid, Signal::SIGTERM) {
                Ok(()) => {
                    info!("Sent SIGTERM to process group {}", pid);

                    wait_until_gone(pid, GROUP_GRACE_PERIOD).await;

                    // Stragglers in the group that ignored SIGTERM
                    match signal::killpg(pgid, Signal::SIGKILL) {
                        Ok(()) => {
                            debug!("Sent SIGKILL to process group {}", pid);
                            TerminationResult::Success
                        }
                        Err(nix::errno::Errno::ESRCH) => TerminationResult::Success,
                        Err(e) => {
                            warn!("Failed to send SIGKILL to process group {}: {}", pid, e);
                            TerminationResult::Failed(format!(
                                "SIGKILL to process group failed: {e}"
                            ))
                        }
                    }
                }
                Err(nix::errno::Errno::ESRCH) => {
                    debug!("Process group {} not found", pid);
                    TerminationResult::ProcessNotFound
                }
                Err(nix::errno::Errno::EPERM) => {
                    warn!("Permission denied to terminate process group {}", pid);
                    TerminationResult::AccessDenied
                }
                Err(e) => {
                    warn!("Failed to send SIGTERM to process group {}: {}", pid, e);
                    TerminationResult::Failed(format!("SIGTERM to process group failed: {e}"))
                }
            }
        }
    }

    impl UnixProcessManager {
        /// Depth-first, so grandchildren precede their parents
        fn find_children_recursive(system: &System, parent_pid: u32, result: &mut Vec<u32>) {
            for (pid, process) in system.processes() {
                if process.thread_kind().is_some() {
                    continue;
                }
                if process.parent().is_some_and(|ppid| ppid.as_u32() == parent_pid) {
                    let child_pid = pid.as_u32();
                    Self::find_children_recursive(system, child_pid, result);
                    result.push(child_pid);
                }
            }
        }
    }

    impl ProcessManager for UnixProcessManager {
        fn new() -> Self {
            info!("Initializing Unix process manager with system monitoring");
            Self {
                system: Mutex::new(System::new()),
            }
        }
    }

    fn send_signal(pid: ProcessId, sig: Signal) -> nix::Result<()> {
        let raw = i32::try_from(pid).map_err(|_| nix::errno::Errno::ESRCH)?;
        signal::kill(NixPid::from_raw(raw), sig)
    }

    async fn wait_until_gone(pid: ProcessId, limit: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        while tokio::time::Instant::now() < deadline {
            if !pid_alive(pid) {
                return true;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        !pid_alive(pid)
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use std::time::{SystemTime, UNIX_EPOCH};
        use tokio::io::AsyncReadExt;

        fn unique_marker(label: &str) -> String {
            let nanos = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_nanos();
            format!("oscal-unix-{label}-{}-{nanos}", std::process::id())
        }

        #[tokio::test]
        async fn test_spawn_piped_captures_output() {
            let manager = UnixProcessManager::new();
            let mut handle = manager
                .spawn_process(
                    Path::new("sh"),
                    &["-c".to_string(), "printf hello; exit 3".to_string()],
                    &SpawnOptions::piped(),
                )
                .await
                .unwrap();

            let mut stdout = handle.take_stdout().unwrap();
            let mut out = String::new();
            stdout.read_to_string(&mut out).await.unwrap();

            let status = manager
                .wait_for_exit(handle.as_mut(), Some(Duration::from_secs(10)))
                .await
                .unwrap();
            assert_eq!(out, "hello");
            assert_eq!(status.code(), Some(3));
        }

        #[tokio::test]
        async fn test_detached_has_no_pipes() {
            let manager = UnixProcessManager::new();
            let mut handle = manager
                .spawn_process(Path::new("true"), &[], &SpawnOptions::detached())
                .await
                .unwrap();

            assert!(handle.take_stdout().is_none());
            assert!(handle.take_stderr().is_none());
            handle.wait().await.unwrap();
        }

        #[tokio::test]
        async fn test_liveness_probe() {
            let manager = UnixProcessManager::new();
            assert!(manager.is_alive(std::process::id()).await);
            assert!(!manager.is_alive(i32::MAX as u32 - 1).await);
        }

        #[tokio::test]
        async fn test_exited_child_reported_dead_before_reaping() {
            let manager = UnixProcessManager::new();
            let mut handle = manager
                .spawn_process(Path::new("true"), &[], &SpawnOptions::detached())
                .await
                .unwrap();
            let pid = handle.get_pid().unwrap();

            assert!(wait_until_gone(pid, Duration::from_secs(5)).await);
            handle.wait().await.unwrap();
        }

        #[tokio::test]
        async fn test_find_and_terminate_group() {
            let manager = UnixProcessManager::new();
            let marker = unique_marker("group");
            let mut handle = manager
                .spawn_process(
                    Path::new("sh"),
                    &["-c".to_string(), "sleep 30; true".to_string(), marker.clone()],
                    &SpawnOptions::detached(),
                )
                .await
                .unwrap();
            let pid = handle.get_pid().unwrap();

            let found = manager.find_processes(&marker).await.unwrap();
            assert!(found.iter().any(|info| info.pid == pid));

            let result = manager.terminate_completely(handle.as_mut()).await;
            assert_eq!(result, TerminationResult::Success);
            handle.wait().await.unwrap();

            assert!(manager.find_processes(&marker).await.unwrap().is_empty());
        }

        #[tokio::test]
        async fn test_terminate_missing_pid() {
            let manager = UnixProcessManager::new();
            assert_eq!(
                manager.terminate_pid(i32::MAX as u32 - 1).await,
                TerminationResult::ProcessNotFound
            );
        }
    }
}

#[cfg(unix)]
pub use unix_impl::{UnixProcessHandle, UnixProcessManager};

// Stubs so the crate still builds as a workspace member elsewhere
#[cfg(not(unix))]
pub struct UnixProcessHandle;

#[cfg(not(unix))]
pub struct UnixProcessManager;

#[cfg(not(unix))]
impl UnixProcessManager {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(not(unix))]
impl Default for UnixProcessManager {
    fn default() -> Self {
        Self::new()
    }
}
