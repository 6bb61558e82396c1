use crate::operation::ExecutionFailure;
use crate::process::ProcessId;
use std::path::PathBuf;
use thiserror::Error;

/// Core error types for dispatch and service lifecycle operations
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("{binary} is not installed (searched PATH and {})", searched.display())]
    InstallMissing { binary: String, searched: PathBuf },

    #[error("{0}")]
    Execution(#[from] ExecutionFailure),

    #[error("oscal-server is already running (PID {pid}); use stop or restart")]
    AlreadyRunning { pid: ProcessId },

    #[error("Process record points at PID {pid}, which is no longer running")]
    StaleRecord { pid: ProcessId },

    #[error("Process record error: {0}")]
    Record(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Findings log error: {0}")]
    Sarif(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RunnerError {
    /// Best diagnostic text for a user: captured stderr when a tool produced any
    pub fn diagnostic(&self) -> String {
        match self {
            RunnerError::Execution(failure) => failure.diagnostic().to_string(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::FailureKind;

    #[test]
    fn test_error_display() {
        let error = RunnerError::AlreadyRunning { pid: 42 };
        let display = format!("{error}");
        assert!(display.contains("already running"));
        assert!(display.contains("use stop or restart"));

        let error = RunnerError::InstallMissing {
            binary: "oscal-cli".to_string(),
            searched: PathBuf::from("/opt/oscal/bin"),
        };
        let display = format!("{error}");
        assert!(display.contains("oscal-cli is not installed"));
        assert!(display.contains("/opt/oscal/bin"));
    }

    #[test]
    fn test_diagnostic_prefers_stderr() {
        let failure = ExecutionFailure::new(FailureKind::NonZeroExit, "oscal-cli exited with code 1")
            .with_stderr("Invalid document: missing uuid\n");
        let error = RunnerError::from(failure);
        assert_eq!(error.diagnostic(), "Invalid document: missing uuid\n");

        let error = RunnerError::Record("unreadable".to_string());
        assert_eq!(error.diagnostic(), "Process record error: unreadable");
    }
}
