mod common;

use common::{ScriptedRunner, podman_caps};
use kodegen_cluster_deploy::deploy::post_config::{IndexTargets, ensure_index};
use kodegen_cluster_deploy::deploy::{IndexOutcome, PostConfigError};
use kodegen_cluster_deploy::retry::RetryConfig;
use kodegen_cluster_deploy::runtime::{CommandOutput, ComposeHandle, ComposeProject};
use kodegen_cluster_deploy::topology::IndexName;
use std::path::Path;
use std::time::Duration;

fn project(dir: &Path) -> ComposeProject {
    ComposeProject {
        dir: dir.to_path_buf(),
        name: "splunk-test".to_string(),
        compose_file: dir.join("docker-compose.yml"),
        env_file: dir.join(".env"),
        profile: None,
    }
}

fn retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
    }
}

fn targets() -> IndexTargets {
    IndexTargets::elect(&[
        "cluster-master".to_string(),
        "indexer-1".to_string(),
        "indexer-2".to_string(),
    ])
}

#[tokio::test]
async fn second_run_finds_the_index_and_creates_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let runner = ScriptedRunner::new()
        .on_sequence(
            &["exec -T cluster-master", "indexes/$1"],
            vec![CommandOutput::with_code(3), CommandOutput::ok("")],
        )
        .on(&["exec -T indexer-1", "indexes/$1"], CommandOutput::with_code(3));
    let caps = podman_caps();
    let compose = ComposeHandle::new(&runner, &caps, project(dir.path()));
    let index = IndexName::parse("app_logs").unwrap();

    let first = ensure_index(&compose, &targets(), &index, retry(3)).await.unwrap();
    let second = ensure_index(&compose, &targets(), &index, retry(3)).await.unwrap();

    assert_eq!(first, IndexOutcome::Created);
    assert_eq!(second, IndexOutcome::AlreadyExists);
    assert_eq!(runner.count(&["name=$1"]), 1);
    assert_eq!(runner.count(&["exec -T indexer-1", "name=$1"]), 0);
}

#[tokio::test]
async fn management_api_still_starting_is_retried() {
    let dir = tempfile::tempdir().unwrap();
    let runner = ScriptedRunner::new()
        .on_sequence(
            &["exec -T cluster-master", "indexes/$1"],
            vec![CommandOutput::with_code(75), CommandOutput::with_code(75), CommandOutput::with_code(3)],
        );
    let caps = podman_caps();
    let compose = ComposeHandle::new(&runner, &caps, project(dir.path()));
    let index = IndexName::parse("web_proxy").unwrap();

    let outcome = ensure_index(&compose, &targets(), &index, retry(5)).await.unwrap();
    assert_eq!(outcome, IndexOutcome::Created);
    assert_eq!(runner.count(&["exec -T cluster-master", "indexes/$1"]), 3);
}

#[tokio::test]
async fn rejected_request_is_not_retried() {
    let dir = tempfile::tempdir().unwrap();
    let runner = ScriptedRunner::new()
        .on(&["exec -T cluster-master", "indexes/$1"], CommandOutput::with_code(3))
        .on(&["exec -T cluster-master", "name=$1"], CommandOutput::with_code(2));
    let caps = podman_caps();
    let compose = ComposeHandle::new(&runner, &caps, project(dir.path()));
    let index = IndexName::parse("audit").unwrap();

    let err = ensure_index(&compose, &targets(), &index, retry(5)).await.unwrap_err();
    assert!(matches!(err, PostConfigError::Failed { .. }));
    assert_eq!(runner.count(&["name=$1"]), 1);
}
