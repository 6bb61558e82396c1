#![cfg(unix)]

mod common;

use oscal_runner::{
    ProcessLifecycle, ProcessRunner, ReadinessConfig, RunnerConfig, RunnerError,
    ServiceLifecycleManager, ServiceProcessRecord, ServiceRuntimeContext, StartOutcome,
};
use std::path::Path;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Config whose server is a looping shell script with a name unique to this test
fn fake_server_config(home: &Path, tag: &str) -> RunnerConfig {
    let binary = format!("oscal-server-it-{}-{tag}", std::process::id());
    let script = common::write_script(home, &binary, "while true; do sleep 1; done");

    RunnerConfig::builder()
        .server_binary(binary)
        .server_path(script)
        .home_dir(home)
        .server_port(common::unused_port())
        .readiness(ReadinessConfig::no_wait())
        .build()
        .unwrap()
}

fn manager(config: RunnerConfig) -> ServiceLifecycleManager {
    let context = ServiceRuntimeContext::new(config).unwrap();
    ServiceLifecycleManager::new(context, ProcessRunner::new()).unwrap()
}

fn detached_pid(outcome: StartOutcome) -> u32 {
    match outcome {
        StartOutcome::Detached(record) => record.pid,
        StartOutcome::Foreground(outcome) => panic!("expected a detached start, got {outcome:?}"),
    }
}

#[tokio::test]
async fn test_live_record_blocks_start() {
    common::init_tracing();
    let home = tempfile::tempdir().unwrap();
    let manager = manager(fake_server_config(home.path(), "live"));

    let own = ServiceProcessRecord::new(std::process::id(), "/usr/bin/oscal-server");
    manager.store().save(&own).unwrap();

    let error = manager.start(false).await.unwrap_err();
    assert!(
        matches!(error, RunnerError::AlreadyRunning { pid } if pid == std::process::id()),
        "{error}"
    );
    assert_eq!(manager.store().load().unwrap().unwrap().pid, std::process::id());
    assert!(!manager.store().lock_path().exists());
}

#[tokio::test]
async fn test_stale_record_is_replaced_then_stopped() {
    common::init_tracing();
    let home = tempfile::tempdir().unwrap();
    let manager = manager(fake_server_config(home.path(), "stale"));

    let dead = (i32::MAX - 1) as u32;
    manager
        .store()
        .save(&ServiceProcessRecord::new(dead, "/usr/bin/oscal-server"))
        .unwrap();

    let pid = detached_pid(manager.start(false).await.unwrap());
    assert_ne!(pid, dead);
    assert_eq!(manager.store().load().unwrap().unwrap().pid, pid);
    assert!(manager.context().config().pid_file().exists());

    let report = manager.stop().await.unwrap();
    assert!(report.stopped.contains(&pid), "{report:?}");
    assert!(manager.store().load().unwrap().is_none());
    assert!(!ProcessRunner::new().manager().is_alive(pid).await);
}

#[tokio::test]
async fn test_status_is_read_only() {
    common::init_tracing();
    let home = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "healthy",
            "activeWorkers": 2
        })))
        .expect(2)
        .mount(&server)
        .await;

    let config = fake_server_config(home.path(), "status");
    let context = ServiceRuntimeContext::new(config)
        .unwrap()
        .with_base_url(Url::parse(&server.uri()).unwrap());
    let manager = ServiceLifecycleManager::new(context, ProcessRunner::new()).unwrap();

    manager
        .store()
        .save(&ServiceProcessRecord::new(4242, "/usr/bin/oscal-server"))
        .unwrap();
    let before = std::fs::read(manager.store().path()).unwrap();

    let first = manager.status().await;
    let second = manager.status().await;

    assert!(first.reachable);
    assert_eq!(first.active_workers, Some(2));
    assert_eq!(first, second);
    assert_eq!(std::fs::read(manager.store().path()).unwrap(), before);
}

#[tokio::test]
async fn test_status_without_server() {
    common::init_tracing();
    let home = tempfile::tempdir().unwrap();
    let manager = manager(fake_server_config(home.path(), "down"));

    let health = manager.status().await;
    assert!(!health.reachable);
    assert_eq!(health.to_string(), "not running");
}

#[tokio::test]
async fn test_stop_without_server_reports_zero() {
    common::init_tracing();
    let home = tempfile::tempdir().unwrap();
    let manager = manager(fake_server_config(home.path(), "idle"));

    let report = manager.stop().await.unwrap();
    assert_eq!(report.to_string(), "stopped 0 processes");
    assert!(manager.store().load().unwrap().is_none());
}

#[tokio::test]
async fn test_restart_replaces_instance() {
    common::init_tracing();
    let home = tempfile::tempdir().unwrap();
    let config = fake_server_config(home.path(), "restart");
    let binary = config.server_binary.clone();
    let manager = manager(config);
    let processes = ProcessRunner::new();

    let first = detached_pid(manager.start(false).await.unwrap());

    let (report, outcome) = manager.restart().await.unwrap();
    let second = detached_pid(outcome);

    assert!(report.stopped.contains(&first), "{report:?}");
    assert_ne!(first, second);
    assert!(!processes.manager().is_alive(first).await);
    assert!(processes.manager().is_alive(second).await);
    assert_eq!(manager.store().load().unwrap().unwrap().pid, second);

    let running = processes.manager().find_processes(&binary).await.unwrap();
    assert!(running.iter().all(|info| info.pid != first));
    assert!(running.iter().any(|info| info.pid == second));

    manager.stop().await.unwrap();
    assert!(!processes.manager().is_alive(second).await);
}
