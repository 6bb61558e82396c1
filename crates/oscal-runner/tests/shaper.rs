#![cfg(unix)]

mod common;

use oscal_runner::{
    ExecutorKind, FailureKind, FallbackCoordinator, Operation, ProcessRunner, RunnerConfig,
    RunnerError, SarifValidator,
};
use std::path::Path;

const FINDINGS: &str = r#"{"version":"2.1.0","runs":[{"tool":{"driver":{"name":"oscal-cli"}},"results":[{"ruleId":"missing-uuid","level":"error"}]}]}"#;

fn coordinator(dir: &Path, script: &str) -> FallbackCoordinator {
    let cli = common::write_script(dir, "oscal-cli", script);
    let config = RunnerConfig::builder()
        .cli_path(cli)
        .home_dir(dir)
        .server_port(common::unused_port())
        .build()
        .unwrap();
    FallbackCoordinator::from_config(&config, ProcessRunner::new()).unwrap()
}

/// Writes the findings log to the path following `-o`, then exits with `code`
fn writes_findings(code: i32) -> String {
    format!(
        r#"out=""
while [ $# -gt 0 ]; do
  if [ "$1" = "-o" ]; then out="$2"; fi
  shift
done
printf '%s' '{FINDINGS}' > "$out"
echo "1 finding" >&2
exit {code}"#
    )
}

#[tokio::test]
async fn test_findings_returned_despite_failing_exit() {
    common::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let coordinator = coordinator(dir.path(), &writes_findings(1));

    let log = SarifValidator::new(&coordinator)
        .validate_with_sarif(&Operation::validate("ssp.json"), ExecutorKind::Local)
        .await
        .unwrap();

    assert_eq!(log.version, "2.1.0");
    assert_eq!(log.result_count(), 1);
}

#[tokio::test]
async fn test_findings_from_clean_run() {
    common::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let coordinator = coordinator(dir.path(), &writes_findings(0));

    let log = SarifValidator::new(&coordinator)
        .validate_with_sarif(&Operation::validate("ssp.json"), ExecutorKind::Remote)
        .await
        .unwrap();

    assert_eq!(log.runs.len(), 1);
}

#[tokio::test]
async fn test_failure_without_findings_surfaces_execution_error() {
    common::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let coordinator = coordinator(dir.path(), "echo 'cannot parse document' >&2\nexit 1");

    let error = SarifValidator::new(&coordinator)
        .validate_with_sarif(&Operation::validate("ssp.json"), ExecutorKind::Local)
        .await
        .unwrap_err();

    match error {
        RunnerError::Execution(failure) => {
            assert_eq!(failure.kind, FailureKind::NonZeroExit);
            assert_eq!(failure.diagnostic(), "cannot parse document\n");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_success_without_findings_is_sarif_error() {
    common::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let coordinator = coordinator(dir.path(), "exit 0");

    let error = SarifValidator::new(&coordinator)
        .validate_with_sarif(&Operation::validate("ssp.json"), ExecutorKind::Local)
        .await
        .unwrap_err();

    assert!(matches!(error, RunnerError::Sarif(_)), "{error}");
}

#[tokio::test]
async fn test_truncated_findings_after_failure_surfaces_stderr() {
    common::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let script = r#"out=""
while [ $# -gt 0 ]; do
  if [ "$1" = "-o" ]; then out="$2"; fi
  shift
done
printf '%s' '{"version":"2.1' > "$out"
echo 'validator crashed' >&2
exit 1"#;
    let coordinator = coordinator(dir.path(), script);

    let error = SarifValidator::new(&coordinator)
        .validate_with_sarif(&Operation::validate("ssp.json"), ExecutorKind::Local)
        .await
        .unwrap_err();

    match error {
        RunnerError::Execution(failure) => {
            assert_eq!(failure.diagnostic(), "validator crashed\n");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_truncated_findings_after_success_is_sarif_error() {
    common::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let script = r#"out=""
while [ $# -gt 0 ]; do
  if [ "$1" = "-o" ]; then out="$2"; fi
  shift
done
printf '%s' 'not json' > "$out""#;
    let coordinator = coordinator(dir.path(), script);

    let error = SarifValidator::new(&coordinator)
        .validate_with_sarif(&Operation::validate("ssp.json"), ExecutorKind::Local)
        .await
        .unwrap_err();

    assert!(matches!(error, RunnerError::Sarif(_)), "{error}");
}
