mod common;

use common::{FixedProbe, PASSWORD, ScriptedRunner, healthy_stack, podman_caps, spec};
use kodegen_cluster_deploy::deploy::{
    ArtifactSource, CredentialError, CredentialProvider, CredentialSet, DeployOptions, DeployStep,
    DeploymentRecord, IndexOutcome, Orchestrator, PreflightError, PreflightOptions, ProjectLayout,
    ReadinessOutcome, StaticCredentials, TeardownOptions, detect_and_deploy,
};
use kodegen_cluster_deploy::error::{DeployError, ErrorKind};
use kodegen_cluster_deploy::health::EndpointStatus;
use kodegen_cluster_deploy::retry::RetryConfig;
use kodegen_cluster_deploy::runtime::{CapabilityMatrix, CommandOutput, RegistryProbe};
use kodegen_cluster_deploy::topology::{HostPorts, IndexName, SizeClass, TopologySpec};
use secrecy::SecretString;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 2,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
    }
}

fn options() -> DeployOptions {
    DeployOptions {
        preflight: PreflightOptions {
            force: false,
            min_disk_gb: Some(0),
            skip_port_check: true,
        },
        username: "admin".to_string(),
        non_interactive: true,
        retry: fast_retry(),
        post_config_retry: fast_retry(),
        readiness_timeout: Duration::from_secs(5),
        poll_interval: Duration::from_millis(10),
        lock_wait: Duration::from_secs(1),
        active_conf: None,
    }
}

fn credentials(layout: &ProjectLayout) -> StaticCredentials {
    StaticCredentials::new(SecretString::from(PASSWORD.to_string()))
        .with_token_store(layout.credentials_dir())
}

async fn deploy(
    runner: &ScriptedRunner,
    caps: &CapabilityMatrix,
    layout: &ProjectLayout,
    spec: &TopologySpec,
    options: &DeployOptions,
) -> Result<kodegen_cluster_deploy::deploy::DeployReport, DeployError> {
    let creds = credentials(layout);
    Orchestrator::new(runner, caps, layout.clone(), &creds, FixedProbe::answering())
        .deploy(spec, ArtifactSource::Generate, options)
        .await
}

#[tokio::test]
async fn small_cluster_deploys_online() {
    let dir = tempfile::tempdir().unwrap();
    let layout = ProjectLayout::new(dir.path());
    let runner = healthy_stack();
    let caps = podman_caps();

    let report = deploy(&runner, &caps, &layout, &spec(SizeClass::Small), &options())
        .await
        .unwrap();

    assert_eq!(report.exit_code(), 0);
    assert!(matches!(report.readiness, ReadinessOutcome::Ready(_)));
    assert_eq!(report.admin_service, "search-head-1");
    assert!(report.index.is_none());

    let compose = std::fs::read_to_string(layout.compose_file()).unwrap();
    assert!(compose.contains("indexer-1"));
    assert!(compose.contains("search-head-1"));
    assert!(!compose.contains("cluster-master"));

    let record = DeploymentRecord::load(&layout.record_file()).unwrap().unwrap();
    assert_eq!(record.size_class, SizeClass::Small);
    assert_eq!(record.runtime, "podman");

    assert_eq!(runner.count(&[" pull"]), 1);
    assert_eq!(runner.count(&["up -d --remove-orphans"]), 1);
    assert_eq!(runner.count(&["down --remove-orphans"]), 0);
}

#[cfg(unix)]
#[tokio::test]
async fn credentials_stay_out_of_commands_and_world_readable_files() {
    use kodegen_cluster_deploy::fs::mode_of;

    let dir = tempfile::tempdir().unwrap();
    let layout = ProjectLayout::new(dir.path());
    let runner = healthy_stack();
    deploy(&runner, &podman_caps(), &layout, &spec(SizeClass::Small), &options())
        .await
        .unwrap();

    assert_eq!(mode_of(&layout.credentials_dir()), Some(0o700));
    assert_eq!(
        mode_of(&layout.credentials_dir().join("splunk_password")),
        Some(0o600)
    );
    assert_eq!(mode_of(&layout.env_file()), Some(0o600));

    let env = std::fs::read_to_string(layout.env_file()).unwrap();
    assert!(!env.contains(PASSWORD));
    let compose = std::fs::read_to_string(layout.compose_file()).unwrap();
    assert!(!compose.contains(PASSWORD));
    assert!(runner.calls().iter().all(|line| !line.contains(PASSWORD)));
}

#[tokio::test]
async fn inline_credentials_land_only_in_the_private_env_file() {
    let dir = tempfile::tempdir().unwrap();
    let layout = ProjectLayout::new(dir.path());
    let runner = healthy_stack();
    let mut caps = podman_caps();
    caps.supports_secrets = false;

    deploy(&runner, &caps, &layout, &spec(SizeClass::Small), &options())
        .await
        .unwrap();

    let env = std::fs::read_to_string(layout.env_file()).unwrap();
    assert!(env.contains(PASSWORD));
    let compose = std::fs::read_to_string(layout.compose_file()).unwrap();
    assert!(!compose.contains(PASSWORD));
    assert!(layout.credentials_dir().join("splunk_password").is_file());
}

#[tokio::test]
async fn medium_cluster_creates_the_index_on_the_cluster_master() {
    let dir = tempfile::tempdir().unwrap();
    let layout = ProjectLayout::new(dir.path());
    let runner = healthy_stack()
        .on(
            &["exec -T cluster-master", "indexes/$1"],
            CommandOutput::with_code(3),
        )
        .on(&["exec -T cluster-master", "name=$1"], CommandOutput::ok(""));
    let caps = podman_caps();
    let mut medium = spec(SizeClass::Medium);
    medium.index_name = Some(IndexName::parse("app_logs").unwrap());

    let report = deploy(&runner, &caps, &layout, &medium, &options())
        .await
        .unwrap();

    assert_eq!(report.index, Some(IndexOutcome::Created));
    assert_eq!(report.admin_service, "cluster-master");
    assert_eq!(runner.count(&["exec -T cluster-master", "name=$1"]), 1);
    assert_eq!(runner.count(&["exec -T indexer-1", "name=$1"]), 0);

    let record = DeploymentRecord::load(&layout.record_file()).unwrap().unwrap();
    assert_eq!(record.index_name.as_deref(), Some("app_logs"));
    let compose = std::fs::read_to_string(layout.compose_file()).unwrap();
    for service in ["cluster-master", "indexer-1", "indexer-2", "search-head-1"] {
        assert!(compose.contains(service), "{service} missing");
    }
}

#[tokio::test]
async fn air_gapped_host_never_pulls() {
    let dir = tempfile::tempdir().unwrap();
    let layout = ProjectLayout::new(dir.path());
    let runner = healthy_stack();
    let mut caps = podman_caps();
    caps.air_gapped = true;

    deploy(&runner, &caps, &layout, &spec(SizeClass::Small), &options())
        .await
        .unwrap();

    assert_eq!(runner.count(&[" pull"]), 0);
    assert_eq!(runner.count(&["up -d"]), 1);
}

#[tokio::test]
async fn failed_apply_rolls_back_every_written_file() {
    let dir = tempfile::tempdir().unwrap();
    let layout = ProjectLayout::new(dir.path());
    let runner = healthy_stack().on(
        &["up -d"],
        CommandOutput {
            exit_code: Some(1),
            stdout: String::new(),
            stderr: "Error: network splunk-net: address pool exhausted".to_string(),
        },
    );
    let caps = podman_caps();

    let err = deploy(&runner, &caps, &layout, &spec(SizeClass::Small), &options())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        DeployError::Step {
            step: DeployStep::Apply,
            ..
        }
    ));
    assert_eq!(err.kind(), ErrorKind::TransientOperational);
    assert_eq!(err.exit_code(), 1);

    assert_eq!(runner.count(&["up -d"]), 2, "apply is retried once");
    assert_eq!(runner.count(&["down --remove-orphans"]), 1);
    assert!(!layout.compose_file().exists());
    assert!(!layout.env_file().exists());
    assert!(!layout.credentials_dir().exists());
    assert!(DeploymentRecord::load(&layout.record_file()).unwrap().is_none());
}

/// Counts how often credentials were requested.
#[derive(Default)]
struct CountingCredentials {
    asked: AtomicUsize,
}

impl CredentialProvider for CountingCredentials {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn obtain(&self, _username: &str, _non_interactive: bool) -> Result<CredentialSet, CredentialError> {
        self.asked.fetch_add(1, Ordering::SeqCst);
        Err(CredentialError::Unavailable {
            source_name: self.name(),
            reason: "counting only".to_string(),
        })
    }
}

#[tokio::test]
async fn host_without_a_runtime_stops_before_credentials() {
    let dir = tempfile::tempdir().unwrap();
    let layout = ProjectLayout::new(dir.path());
    let runner = ScriptedRunner::new();
    let creds = CountingCredentials::default();

    let err = detect_and_deploy(
        &runner,
        RegistryProbe::Assume { air_gapped: true },
        layout.clone(),
        &creds,
        FixedProbe::answering(),
        CancellationToken::new(),
        &spec(SizeClass::Small),
        ArtifactSource::Generate,
        &options(),
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        DeployError::Step {
            step: DeployStep::Preflight,
            ..
        }
    ));
    assert_eq!(err.kind(), ErrorKind::FatalEnvironment);
    assert_eq!(creds.asked.load(Ordering::SeqCst), 0);
    assert!(runner.calls().is_empty());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn invalid_topology_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let layout = ProjectLayout::new(dir.path());
    let runner = healthy_stack();
    let mut bad = spec(SizeClass::Medium);
    bad.replication_factor = 3;

    let err = deploy(&runner, &podman_caps(), &layout, &bad, &options())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(!layout.compose_file().exists());
    assert!(!layout.credentials_dir().exists());
    assert!(runner.calls().is_empty());
}

#[tokio::test]
async fn readiness_timeout_keeps_the_deployment_and_exits_4() {
    let dir = tempfile::tempdir().unwrap();
    let layout = ProjectLayout::new(dir.path());
    let runner = ScriptedRunner::new()
        .on(&["ps -q"], CommandOutput::ok("c0ffee\n"))
        .on(&["inspect --format"], CommandOutput::ok("running|starting\n"));
    let mut opts = options();
    opts.readiness_timeout = Duration::from_millis(150);

    let report = deploy(&runner, &podman_caps(), &layout, &spec(SizeClass::Small), &opts)
        .await
        .unwrap();

    assert_eq!(report.exit_code(), 4);
    let ReadinessOutcome::TimedOut { not_ready, .. } = &report.readiness else {
        panic!("expected a readiness timeout");
    };
    assert_eq!(not_ready, &vec!["indexer-1".to_string(), "search-head-1".to_string()]);
    assert!(layout.record_file().exists());
    assert!(layout.compose_file().exists());
    assert_eq!(runner.count(&["down --remove-orphans"]), 0);
}

#[tokio::test]
async fn silent_management_endpoint_blocks_readiness() {
    let dir = tempfile::tempdir().unwrap();
    let layout = ProjectLayout::new(dir.path());
    let runner = healthy_stack();
    let creds = credentials(&layout);
    let mut opts = options();
    opts.readiness_timeout = Duration::from_millis(100);
    let caps = podman_caps();
    let probe = FixedProbe(EndpointStatus::Unreachable {
        reason: "connection failed".to_string(),
    });

    let report = Orchestrator::new(&runner, &caps, layout.clone(), &creds, probe)
        .deploy(&spec(SizeClass::Small), ArtifactSource::Generate, &opts)
        .await
        .unwrap();

    let ReadinessOutcome::TimedOut { not_ready, .. } = &report.readiness else {
        panic!("expected a readiness timeout");
    };
    assert_eq!(not_ready, &vec!["search-head-1".to_string()]);
}

#[tokio::test]
async fn interrupt_during_readiness_rolls_back() {
    let dir = tempfile::tempdir().unwrap();
    let layout = ProjectLayout::new(dir.path());
    let runner = ScriptedRunner::new()
        .on(&["ps -q"], CommandOutput::ok("c0ffee\n"))
        .on(&["inspect --format"], CommandOutput::ok("running|starting\n"));
    let creds = credentials(&layout);
    let caps = podman_caps();
    let mut opts = options();
    opts.readiness_timeout = Duration::from_secs(60);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let err = Orchestrator::new(&runner, &caps, layout.clone(), &creds, FixedProbe::answering())
        .with_cancellation(cancel)
        .deploy(&spec(SizeClass::Small), ArtifactSource::Generate, &opts)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        DeployError::Interrupted {
            step: DeployStep::Readiness
        }
    ));
    assert_eq!(err.kind(), ErrorKind::Interrupted);
    assert_eq!(runner.count(&["down --remove-orphans"]), 1);
    assert!(!layout.compose_file().exists());
    assert!(DeploymentRecord::load(&layout.record_file()).unwrap().is_none());
}

#[tokio::test]
async fn redeploy_requires_force_and_keeps_the_first_deployment() {
    let dir = tempfile::tempdir().unwrap();
    let layout = ProjectLayout::new(dir.path());
    let runner = healthy_stack();
    let caps = podman_caps();

    let first = deploy(&runner, &caps, &layout, &spec(SizeClass::Small), &options())
        .await
        .unwrap();
    let compose_before = std::fs::read_to_string(layout.compose_file()).unwrap();
    let hec_token = layout.credentials_dir().join("splunk_hec_token");
    let token_before = std::fs::read_to_string(&hec_token).unwrap();

    let err = deploy(&runner, &caps, &layout, &spec(SizeClass::Small), &options())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DeployError::Step {
            step: DeployStep::Preflight,
            ..
        }
    ));
    assert!(err.remediation().unwrap().contains("--force"));
    assert_eq!(
        std::fs::read_to_string(layout.compose_file()).unwrap(),
        compose_before
    );

    let mut forced = options();
    forced.preflight.force = true;
    let second = deploy(&runner, &caps, &layout, &spec(SizeClass::Small), &forced)
        .await
        .unwrap();
    assert_ne!(first.record.deployment_id, second.record.deployment_id);

    let recorded = DeploymentRecord::load(&layout.record_file()).unwrap().unwrap();
    assert_eq!(recorded.deployment_id, second.record.deployment_id);
    assert_eq!(std::fs::read_to_string(&hec_token).unwrap(), token_before);
}

#[tokio::test]
async fn concurrent_deploy_waits_for_the_lock_then_fails() {
    let dir = tempfile::tempdir().unwrap();
    let layout = ProjectLayout::new(dir.path());
    let _held = kodegen_cluster_deploy::deploy::ProjectLock::acquire(
        &layout.lock_file(),
        Duration::from_secs(1),
    )
    .await
    .unwrap();

    let runner = healthy_stack();
    let mut opts = options();
    opts.lock_wait = Duration::from_millis(200);
    let err = deploy(&runner, &podman_caps(), &layout, &spec(SizeClass::Small), &opts)
        .await
        .unwrap_err();

    let DeployError::Step { source, .. } = err else {
        panic!("expected a preflight failure");
    };
    assert!(matches!(
        *source,
        DeployError::Preflight(PreflightError::Locked { .. })
    ));
    assert!(!layout.compose_file().exists());
}

#[tokio::test]
async fn teardown_purge_removes_everything_it_wrote() {
    let dir = tempfile::tempdir().unwrap();
    let layout = ProjectLayout::new(dir.path());
    let runner = healthy_stack();
    let caps = podman_caps();
    deploy(&runner, &caps, &layout, &spec(SizeClass::Small), &options())
        .await
        .unwrap();

    let creds = credentials(&layout);
    let orchestrator =
        Orchestrator::new(&runner, &caps, layout.clone(), &creds, FixedProbe::answering());
    let record = orchestrator
        .teardown(
            TeardownOptions {
                remove_volumes: true,
                purge: true,
            },
            Duration::from_secs(1),
        )
        .await
        .unwrap();

    assert!(record.is_some());
    assert_eq!(runner.count(&["down --remove-orphans -v"]), 1);
    assert!(!layout.record_file().exists());
    assert!(!layout.compose_file().exists());
    assert!(!layout.env_file().exists());
    assert!(!layout.credentials_dir().exists());

    let again = orchestrator
        .teardown(TeardownOptions::default(), Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(matches!(again, DeployError::NotDeployed { .. }));
}

#[tokio::test]
async fn status_reports_record_and_live_health() {
    let dir = tempfile::tempdir().unwrap();
    let layout = ProjectLayout::new(dir.path());
    let runner = healthy_stack().on(
        &["config --services"],
        CommandOutput::ok("indexer-1\nsearch-head-1\n"),
    );
    let caps = podman_caps();
    let creds = credentials(&layout);
    let orchestrator =
        Orchestrator::new(&runner, &caps, layout.clone(), &creds, FixedProbe::answering());

    let missing = orchestrator.status(&HostPorts::default()).await.unwrap_err();
    assert!(matches!(missing, DeployError::NotDeployed { .. }));

    orchestrator
        .deploy(&spec(SizeClass::Small), ArtifactSource::Generate, &options())
        .await
        .unwrap();
    let status = orchestrator.status(&HostPorts::default()).await.unwrap();
    assert!(status.snapshot.is_ready());
    assert_eq!(status.snapshot.services.len(), 2);
    assert_eq!(status.snapshot.admin_service.as_deref(), Some("search-head-1"));
}
