use crate::error::RunnerError;
use crate::process::ProcessId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Identity of the last background service instance started on this host
///
/// Persisted as plain text: the PID on the first line, followed by optional
/// `recorded_at=` and `executable=` lines. A file holding only a PID is valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceProcessRecord {
    pub pid: ProcessId,
    pub recorded_at: DateTime<Utc>,
    pub executable_path: PathBuf,
}

impl ServiceProcessRecord {
    pub fn new(pid: ProcessId, executable_path: impl Into<PathBuf>) -> Self {
        Self {
            pid,
            recorded_at: Utc::now(),
            executable_path: executable_path.into(),
        }
    }

    pub fn to_file_contents(&self) -> String {
        format!(
            "{}\nrecorded_at={}\nexecutable={}\n",
            self.pid,
            self.recorded_at.to_rfc3339(),
            self.executable_path.display()
        )
    }

    pub fn parse(contents: &str) -> Result<Self, RunnerError> {
        let mut lines = contents.lines().map(str::trim).filter(|l| !l.is_empty());

        let pid_line = lines
            .next()
            .ok_or_else(|| RunnerError::Record("record file is empty".to_string()))?;
        let pid: ProcessId = pid_line
            .parse()
            .map_err(|e| RunnerError::Record(format!("invalid PID {pid_line:?}: {e}")))?;

        let mut record = Self {
            pid,
            recorded_at: DateTime::<Utc>::UNIX_EPOCH,
            executable_path: PathBuf::new(),
        };

        for line in lines {
            match line.split_once('=') {
                Some(("recorded_at", value)) => {
                    record.recorded_at = DateTime::parse_from_rfc3339(value)
                        .map_err(|e| RunnerError::Record(format!("invalid timestamp {value:?}: {e}")))?
                        .with_timezone(&Utc);
                }
                Some(("executable", value)) => record.executable_path = PathBuf::from(value),
                _ => {}
            }
        }

        Ok(record)
    }
}

/// Body of `GET /health`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Informational; reachability is decided by the HTTP status alone
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_workers: Option<u32>,
}

/// Result of one health probe, never persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HealthStatus {
    pub reachable: bool,
    pub active_workers: Option<u32>,
}

impl HealthStatus {
    pub fn unreachable() -> Self {
        Self::default()
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.reachable, self.active_workers) {
            (true, Some(workers)) => write!(f, "healthy ({workers} active workers)"),
            (true, None) => f.write_str("healthy"),
            (false, _) => f.write_str("not running"),
        }
    }
}

/// States a background service instance moves through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServiceState {
    #[default]
    Unknown,
    Starting,
    Running,
    Stopping,
    Stopped,
}
