use crate::fallback::FallbackCoordinator;
use oscal_runner_core::{ExecutionOutcome, ExecutorKind, Operation, RunnerError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// SARIF findings log; only the envelope is interpreted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SarifLog {
    pub version: String,
    #[serde(rename = "$schema", default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(default)]
    pub runs: Vec<serde_json::Value>,
}

impl SarifLog {
    pub fn parse(text: &str) -> Result<Self, RunnerError> {
        serde_json::from_str(text).map_err(|e| RunnerError::Sarif(format!("invalid SARIF: {e}")))
    }

    /// Total results across all runs, passing results included
    pub fn result_count(&self) -> usize {
        self.runs
            .iter()
            .filter_map(|run| run.get("results").and_then(|r| r.as_array()))
            .map(Vec::len)
            .sum()
    }
}

/// Uniquely named temp path removed on drop, whether or not the tool wrote it
struct TempFindings {
    path: PathBuf,
}

impl TempFindings {
    fn new() -> Self {
        let path = std::env::temp_dir().join(format!("oscal-findings-{}.sarif", Uuid::new_v4()));
        Self { path }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Option<String>, RunnerError> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RunnerError::Sarif(format!(
                "cannot read {}: {e}",
                self.path.display()
            ))),
        }
    }
}

impl Drop for TempFindings {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => {
                warn!(file = %self.path.display(), error = %e, "Failed to remove findings file");
            }
            _ => {}
        }
    }
}

/// Validation that yields a SARIF findings log
///
/// A validation that finds problems exits non-zero but still writes the log;
/// the log is the result in that case.
pub struct SarifValidator<'a> {
    coordinator: &'a FallbackCoordinator,
}

impl<'a> SarifValidator<'a> {
    pub fn new(coordinator: &'a FallbackCoordinator) -> Self {
        Self { coordinator }
    }

    pub async fn validate_with_sarif(
        &self,
        operation: &Operation,
        preferred: ExecutorKind,
    ) -> Result<SarifLog, RunnerError> {
        let findings = TempFindings::new();
        let operation = operation.clone().with_args([
            "-o".to_string(),
            findings.path().display().to_string(),
            "--sarif-include-pass".to_string(),
        ]);

        let outcome = self
            .coordinator
            .execute_with_fallback(&operation, preferred)
            .await;

        if let Some(text) = findings.read()? {
            let log = match (SarifLog::parse(&text), outcome) {
                (Ok(log), outcome) => {
                    info!(
                        results = log.result_count(),
                        run_succeeded = outcome.is_success(),
                        "Findings log produced"
                    );
                    log
                }
                // Broken log after a failed run: report the failure itself
                (Err(e), ExecutionOutcome::Failure(failure)) => {
                    warn!(error = %e, "Discarding unreadable findings log");
                    return Err(RunnerError::Execution(failure));
                }
                (Err(e), ExecutionOutcome::Success { .. }) => return Err(e),
            };
            return Ok(log);
        }

        match outcome {
            // The server answers with the log as its body
            ExecutionOutcome::Success { stdout, .. } if !stdout.trim().is_empty() => {
                debug!("Parsing findings log from response body");
                SarifLog::parse(&stdout)
            }
            ExecutionOutcome::Success { .. } => Err(RunnerError::Sarif(
                "validation finished without producing a findings log".to_string(),
            )),
            ExecutionOutcome::Failure(failure) => Err(RunnerError::Execution(failure)),
        }
    }
}
