use super::context::ServiceRuntimeContext;
use super::record_store::PidRecordStore;
use crate::runner::{ExecutableResolver, ProcessRunner, RunOptions};
use backon::{ExponentialBuilder, Retryable};
use oscal_runner_core::{
    ExecutionOutcome, HealthResponse, HealthStatus, ProcessId, ProcessLifecycle,
    ProcessTermination, RunnerError, ServiceProcessRecord, ServiceState, TerminationResult,
};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Result of `start`
#[derive(Debug)]
pub enum StartOutcome {
    /// The server runs in the background; the launcher is free to exit
    Detached(ServiceProcessRecord),
    /// The server ran attached to this process and has exited
    Foreground(ExecutionOutcome),
}

/// What `stop` did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopReport {
    pub stopped: Vec<ProcessId>,
    pub failed: Vec<(ProcessId, String)>,
}

impl StopReport {
    pub fn count(&self) -> usize {
        self.stopped.len()
    }
}

impl fmt::Display for StopReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stopped {} processes", self.stopped.len())?;
        if !self.failed.is_empty() {
            write!(f, " ({} could not be stopped)", self.failed.len())?;
        }
        Ok(())
    }
}

/// Health plus what the record says, for display
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub health: HealthStatus,
    pub record: Option<ServiceProcessRecord>,
    pub record_alive: bool,
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "oscal-server is {}", self.health)?;
        match &self.record {
            Some(record) if self.record_alive => write!(f, " (PID {})", record.pid),
            Some(record) => write!(f, " (stale record for PID {})", record.pid),
            None => Ok(()),
        }
    }
}

/// Start, stop, restart and probe the background server instance
pub struct ServiceLifecycleManager {
    context: ServiceRuntimeContext,
    runner: ProcessRunner,
    store: PidRecordStore,
    resolver: ExecutableResolver,
    client: reqwest::Client,
    state: Mutex<ServiceState>,
}

impl ServiceLifecycleManager {
    pub fn new(context: ServiceRuntimeContext, runner: ProcessRunner) -> Result<Self, RunnerError> {
        let config = context.config();
        let client = reqwest::Client::builder()
            .connect_timeout(config.timeouts.connect_timeout())
            .timeout(config.timeouts.connect_timeout())
            .build()
            .map_err(|e| RunnerError::Configuration(format!("HTTP client: {e}")))?;

        Ok(Self {
            store: PidRecordStore::new(context.record_path()),
            resolver: ExecutableResolver::from_config(config),
            context,
            runner,
            client,
            state: Mutex::new(ServiceState::Unknown),
        })
    }

    pub fn context(&self) -> &ServiceRuntimeContext {
        &self.context
    }

    pub fn store(&self) -> &PidRecordStore {
        &self.store
    }

    pub fn state(&self) -> ServiceState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ServiceState) {
        debug!(state = ?state, "Service state changed");
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Launch the server unless the recorded instance is still alive
    pub async fn start(&self, foreground: bool) -> Result<StartOutcome, RunnerError> {
        let _lock = if foreground {
            None
        } else {
            Some(self.store.acquire_start_lock()?)
        };

        if let Some(pid) = self.live_recorded_pid().await {
            return Err(RunnerError::AlreadyRunning { pid });
        }

        let config = self.context.config();
        let executable = self
            .resolver
            .resolve(&config.server_binary, config.server_path.as_deref())?;
        let env = self.server_env();

        self.set_state(ServiceState::Starting);

        if foreground {
            info!(executable = %executable.display(), "Running oscal-server in the foreground");
            self.set_state(ServiceState::Running);
            let options = RunOptions {
                timeout: None,
                env,
                ..RunOptions::default()
            };
            let outcome = self.runner.run_attached(&executable, &[], &options).await;
            self.set_state(ServiceState::Stopped);
            return Ok(StartOutcome::Foreground(outcome));
        }

        let pid = match self.runner.spawn_detached(&executable, &[], &env).await {
            Ok(pid) => pid,
            Err(e) => {
                self.set_state(ServiceState::Stopped);
                return Err(e);
            }
        };

        let record = ServiceProcessRecord::new(pid, executable);
        self.store.save(&record)?;

        if self.wait_until_ready().await {
            info!(pid = %pid, "oscal-server is ready");
        } else if self.context.config().readiness.enabled() {
            warn!(pid = %pid, "oscal-server did not report healthy yet");
        }
        self.set_state(ServiceState::Running);

        Ok(StartOutcome::Detached(record))
    }

    /// Kill the recorded instance and every process that looks like the server
    pub async fn stop(&self) -> Result<StopReport, RunnerError> {
        self.set_state(ServiceState::Stopping);

        let manager = self.runner.manager();
        let own_pid = std::process::id();
        let mut report = StopReport::default();

        if let Some(pid) = self.live_recorded_pid().await.filter(|pid| *pid != own_pid) {
            // The recorded instance leads its own process group
            let result = match manager.terminate_process_group(pid).await {
                TerminationResult::Success => TerminationResult::Success,
                _ => manager.terminate_pid(pid).await,
            };
            record_termination(&mut report, pid, result);
        }

        let binary = &self.context.config().server_binary;
        let candidates = match manager.find_processes(binary).await {
            Ok(found) => found,
            Err(e) => {
                warn!(binary = %binary, error = %e, "Process enumeration failed");
                Vec::new()
            }
        };

        for candidate in candidates {
            if candidate.pid == own_pid || report.stopped.contains(&candidate.pid) {
                continue;
            }
            info!(pid = %candidate.pid, name = %candidate.name, "Stopping matching process");
            let result = manager.terminate_pid(candidate.pid).await;
            record_termination(&mut report, candidate.pid, result);
        }

        if let Err(e) = self.store.remove() {
            warn!(error = %e, "Could not remove process record");
        }

        self.set_state(ServiceState::Stopped);
        info!(stopped = report.count(), failed = report.failed.len(), "Stop finished");
        Ok(report)
    }

    /// Stop then start, unconditionally
    pub async fn restart(&self) -> Result<(StopReport, StartOutcome), RunnerError> {
        let report = self.stop().await?;
        let outcome = self.start(false).await?;
        Ok((report, outcome))
    }

    /// Probe `/health`; never touches the record
    pub async fn status(&self) -> HealthStatus {
        let url = match self.context.health_url() {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "Cannot build health URL");
                return HealthStatus::unreachable();
            }
        };

        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                debug!(error = %e, "Health probe failed");
                return HealthStatus::unreachable();
            }
        };

        if response.status() != reqwest::StatusCode::OK {
            debug!(status = %response.status(), "Health probe answered without 200");
            return HealthStatus::unreachable();
        }

        let active_workers = response
            .json::<HealthResponse>()
            .await
            .ok()
            .and_then(|body| body.active_workers);

        HealthStatus {
            reachable: true,
            active_workers,
        }
    }

    /// Health plus the record, read-only
    pub async fn status_report(&self) -> StatusReport {
        let health = self.status().await;
        let record = self.store.load().unwrap_or_else(|e| {
            warn!(error = %e, "Ignoring unreadable process record");
            None
        });
        let record_alive = match &record {
            Some(record) => self.runner.manager().is_alive(record.pid).await,
            None => false,
        };

        StatusReport {
            health,
            record,
            record_alive,
        }
    }

    /// PID from the record if that process still runs; stale or corrupt records count as absent
    async fn live_recorded_pid(&self) -> Option<ProcessId> {
        let record = match self.store.load() {
            Ok(record) => record?,
            Err(e) => {
                warn!(error = %e, "Treating unreadable process record as not running");
                return None;
            }
        };

        if self.runner.manager().is_alive(record.pid).await {
            Some(record.pid)
        } else {
            let stale = RunnerError::StaleRecord { pid: record.pid };
            info!("{stale}");
            None
        }
    }

    fn server_env(&self) -> HashMap<String, String> {
        HashMap::from([(
            "OSCAL_SERVER_PORT".to_string(),
            self.context.config().server_port.to_string(),
        )])
    }

    async fn wait_until_ready(&self) -> bool {
        let readiness = &self.context.config().readiness;
        if !readiness.enabled() {
            return false;
        }

        let poll = ExponentialBuilder::default()
            .with_min_delay(readiness.min_delay())
            .with_max_delay(readiness.max_delay())
            .with_max_times(readiness.max_attempts as usize);

        (|| async {
            let health = self.status().await;
            if health.reachable {
                Ok(health)
            } else {
                Err(anyhow::anyhow!("oscal-server is not answering yet"))
            }
        })
        .retry(poll)
        .await
        .is_ok()
    }

    pub fn server_executable(&self) -> Result<PathBuf, RunnerError> {
        let config = self.context.config();
        self.resolver
            .resolve(&config.server_binary, config.server_path.as_deref())
    }
}

fn record_termination(report: &mut StopReport, pid: ProcessId, result: TerminationResult) {
    match result {
        TerminationResult::Success => report.stopped.push(pid),
        TerminationResult::ProcessNotFound => debug!(pid = %pid, "Process already gone"),
        TerminationResult::AccessDenied => {
            warn!(pid = %pid, "Permission denied stopping process");
            report.failed.push((pid, "access denied".to_string()));
        }
        TerminationResult::Failed(message) => {
            warn!(pid = %pid, error = %message, "Failed to stop process");
            report.failed.push((pid, message));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_report_rendering() {
        assert_eq!(StopReport::default().to_string(), "stopped 0 processes");

        let report = StopReport {
            stopped: vec![10, 11],
            failed: vec![(12, "access denied".to_string())],
        };
        assert_eq!(report.to_string(), "stopped 2 processes (1 could not be stopped)");
    }

    #[test]
    fn test_status_report_rendering() {
        let report = StatusReport {
            health: HealthStatus::unreachable(),
            record: Some(ServiceProcessRecord::new(77, "/usr/bin/oscal-server")),
            record_alive: false,
        };
        assert_eq!(
            report.to_string(),
            "oscal-server is not running (stale record for PID 77)"
        );
    }
}
