//! Deployment orchestrator.
//!
//! Sequences detection results, generation, file writes, compose apply,
//! post-configuration and readiness into one run. Only this module decides
//! whether a failure is retried, rolled back or propagated.

use super::credentials::{CredentialProvider, CredentialSet};
use super::lock::ProjectLock;
use super::post_config::{IndexOutcome, IndexTargets, ensure_index};
use super::preflight::{self, PreflightOptions};
use super::record::{DeploymentRecord, ProjectLayout};
use super::rollback::{Compensation, CompensationStack};
use super::secrets::{SECRET_FILE_MODE, write_secret_file};
use super::DeployStep;
use crate::bundle::{BundleManager, VerifiedBundle};
use crate::error::{DeployError, EXIT_OK, EXIT_READINESS_TIMEOUT, Result};
use crate::fs::{ensure_private_dir, remove_dir_all_if_exists, remove_file_if_exists, write_atomic};
use crate::health::{HealthSnapshot, ManagementProbe, PollError, ReadinessPoller};
use crate::retry::{RetryConfig, with_retry};
use crate::runtime::{
    CapabilityMatrix, ComposeError, ComposeHandle, ComposeProject, Detector, ProcessRunner,
    RegistryProbe,
};
use crate::topology::{ComposeArtifact, HostPorts, TopologySpec, generate};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Where the compose document comes from.
#[derive(Debug)]
pub enum ArtifactSource {
    /// Generated from the topology and capability matrix
    Generate,
    /// Shipped in a verified offline bundle; images are loaded from it
    Bundle(VerifiedBundle),
}

/// Per-run knobs.
#[derive(Debug, Clone)]
pub struct DeployOptions {
    pub preflight: PreflightOptions,
    pub username: String,
    pub non_interactive: bool,
    /// Apply and image pull retries
    pub retry: RetryConfig,
    /// Post-configuration retries; the management API takes minutes to come up
    pub post_config_retry: RetryConfig,
    pub readiness_timeout: Duration,
    pub poll_interval: Duration,
    pub lock_wait: Duration,
    /// Rendered effective settings for `config/active.conf`
    pub active_conf: Option<String>,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            preflight: PreflightOptions::default(),
            username: "admin".to_string(),
            non_interactive: false,
            retry: RetryConfig::default(),
            post_config_retry: RetryConfig {
                max_attempts: 20,
                base_delay: Duration::from_secs(5),
                max_delay: Duration::from_secs(30),
            },
            readiness_timeout: Duration::from_secs(600),
            poll_interval: Duration::from_secs(10),
            lock_wait: super::lock::DEFAULT_LOCK_WAIT,
            active_conf: None,
        }
    }
}

/// Result of the readiness step. A timeout is reported, not rolled back.
#[derive(Debug, Clone)]
pub enum ReadinessOutcome {
    Ready(HealthSnapshot),
    TimedOut {
        snapshot: HealthSnapshot,
        not_ready: Vec<String>,
    },
}

impl ReadinessOutcome {
    pub fn snapshot(&self) -> &HealthSnapshot {
        match self {
            ReadinessOutcome::Ready(snapshot) | ReadinessOutcome::TimedOut { snapshot, .. } => {
                snapshot
            }
        }
    }
}

/// Summary of a committed deployment.
#[derive(Debug, Clone)]
pub struct DeployReport {
    pub record: DeploymentRecord,
    pub readiness: ReadinessOutcome,
    pub index: Option<IndexOutcome>,
    pub admin_service: String,
    pub admin_port: u16,
}

impl DeployReport {
    pub fn exit_code(&self) -> i32 {
        match self.readiness {
            ReadinessOutcome::Ready(_) => EXIT_OK,
            ReadinessOutcome::TimedOut { .. } => EXIT_READINESS_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TeardownOptions {
    /// Also remove named volumes (indexed data)
    pub remove_volumes: bool,
    /// Also remove generated files and the credential store
    pub purge: bool,
}

/// Recorded deployment plus its live state.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub record: DeploymentRecord,
    pub snapshot: HealthSnapshot,
}

/// Runs deployments for one project directory.
pub struct Orchestrator<'a, R: ProcessRunner, P: CredentialProvider, M: ManagementProbe> {
    runner: &'a R,
    caps: &'a CapabilityMatrix,
    layout: ProjectLayout,
    credentials: &'a P,
    probe: M,
    cancel: CancellationToken,
}

impl<'a, R: ProcessRunner, P: CredentialProvider, M: ManagementProbe> Orchestrator<'a, R, P, M> {
    pub fn new(
        runner: &'a R,
        caps: &'a CapabilityMatrix,
        layout: ProjectLayout,
        credentials: &'a P,
        probe: M,
    ) -> Self {
        Self {
            runner,
            caps,
            layout,
            credentials,
            probe,
            cancel: CancellationToken::new(),
        }
    }

    /// Cancelling `token` interrupts the current step; before Record that means rollback.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn layout(&self) -> &ProjectLayout {
        &self.layout
    }

    /// Deploys `spec`. See [`DeployStep`] for the sequence.
    pub async fn deploy(
        &self,
        spec: &TopologySpec,
        source: ArtifactSource,
        options: &DeployOptions,
    ) -> Result<DeployReport> {
        log::info!(
            "Deploying {} cluster into {} with {} {}",
            spec.size_class,
            self.layout.root().display(),
            self.caps.runtime,
            self.caps.compose_impl
        );

        let _lock = self
            .step(DeployStep::Preflight, async {
                spec.validate()?;
                let lock = ProjectLock::acquire(&self.layout.lock_file(), options.lock_wait).await?;
                let existing = DeploymentRecord::load(&self.layout.record_file())?;
                preflight::run_checks(self.layout.root(), spec, existing.as_ref(), &options.preflight)?;
                Ok(lock)
            })
            .await?;

        let mut credentials = self
            .step(DeployStep::Credentials, async {
                Ok(self
                    .credentials
                    .obtain(&options.username, options.non_interactive)?)
            })
            .await?;

        let result = self.commit(spec, source, options, &credentials).await;
        credentials.clear();
        result
    }

    /// Everything from the commit point on. Any error rolls back.
    async fn commit(
        &self,
        spec: &TopologySpec,
        source: ArtifactSource,
        options: &DeployOptions,
        credentials: &CredentialSet,
    ) -> Result<DeployReport> {
        let mut stack = CompensationStack::new();
        let bundle = match source {
            ArtifactSource::Generate => None,
            ArtifactSource::Bundle(bundle) => Some(bundle),
        };

        let generated = self
            .step(DeployStep::Generate, async {
                let artifact = match &bundle {
                    None => generate(spec, self.caps)?,
                    Some(bundle) => generate(spec, self.caps)?
                        .with_bundled_document(bundle.compose_yaml().to_string())?,
                };
                self.write_project(&artifact, credentials, &mut stack)?;
                Ok(artifact)
            })
            .await;
        let artifact = match generated {
            Ok(artifact) => artifact,
            Err(err) => {
                log::error!("Deployment failed: {}", err);
                let rollback = stack.rollback::<R>(None).await;
                for (action, error) in &rollback.failed {
                    log::error!("Manual cleanup needed: {} ({})", action, error);
                }
                return Err(err);
            }
        };

        let compose = ComposeHandle::new(
            self.runner,
            self.caps,
            self.compose_project(artifact.active_profile.clone()),
        );

        match self
            .run_committed(spec, &artifact, bundle.as_ref(), options, &mut stack, &compose)
            .await
        {
            Ok(report) => {
                stack.disarm();
                Ok(report)
            }
            Err(err) => {
                log::error!("Deployment failed: {}", err);
                log::warn!("Rolling back {} registered actions...", stack.len());
                let rollback = stack.rollback(Some(&compose)).await;
                if rollback.is_clean() {
                    log::info!("Rollback complete");
                } else {
                    for (action, error) in &rollback.failed {
                        log::error!("Manual cleanup needed: {} ({})", action, error);
                    }
                }
                Err(err)
            }
        }
    }

    async fn run_committed(
        &self,
        spec: &TopologySpec,
        artifact: &ComposeArtifact,
        bundle: Option<&VerifiedBundle>,
        options: &DeployOptions,
        stack: &mut CompensationStack,
        compose: &ComposeHandle<'_, R>,
    ) -> Result<DeployReport> {
        self.step(DeployStep::Apply, async {
            compose.validate().await?;

            if let Some(bundle) = bundle {
                BundleManager::new(self.runner, self.caps)
                    .with_retry(options.retry)
                    .load(bundle)
                    .await?;
            } else if self.caps.air_gapped {
                log::info!("Air-gapped host; skipping image pull");
            } else {
                with_retry(options.retry, "image pull", ComposeError::is_transient, |_| {
                    compose.pull()
                })
                .await?;
            }

            stack.push(Compensation::ComposeDown);
            with_retry(options.retry, "compose up", ComposeError::is_transient, |_| {
                compose.up()
            })
            .await?;
            log::info!("✓ Stack started");
            Ok(())
        })
        .await?;

        let index = self
            .step(DeployStep::PostConfigure, async {
                let Some(index) = &spec.index_name else {
                    log::debug!("No index requested; nothing to configure");
                    return Ok(None);
                };
                let targets = IndexTargets::elect(&artifact.services);
                Ok(Some(
                    ensure_index(compose, &targets, index, options.post_config_retry).await?,
                ))
            })
            .await?;

        let readiness = self
            .step(DeployStep::Readiness, async {
                let poller = ReadinessPoller::new(compose, self.cancel.clone())
                    .with_exempt(artifact.health_exempt.iter().cloned())
                    .with_management(artifact.admin_service.clone(), artifact.admin_port, &self.probe);
                match poller
                    .poll_until_ready(&artifact.services, options.readiness_timeout, options.poll_interval)
                    .await
                {
                    Ok(snapshot) => Ok(ReadinessOutcome::Ready(snapshot)),
                    Err(PollError::Timeout {
                        snapshot, not_ready, ..
                    }) => {
                        log::warn!(
                            "Readiness timed out after {}s; not ready: {}",
                            options.readiness_timeout.as_secs(),
                            not_ready.join(", ")
                        );
                        Ok(ReadinessOutcome::TimedOut {
                            snapshot: *snapshot,
                            not_ready,
                        })
                    }
                    Err(PollError::Cancelled { .. }) => Err(DeployError::Interrupted {
                        step: DeployStep::Readiness,
                    }),
                }
            })
            .await?;

        let record = self
            .step(DeployStep::Record, async {
                let mut record = DeploymentRecord::new(
                    spec,
                    vec![file_name(&self.layout.compose_file())],
                    self.caps.runtime.binary_name(),
                );
                record.active_profile = artifact.active_profile.clone();

                if let Some(conf) = &options.active_conf {
                    let path = self.layout.active_conf();
                    stack.guard_file(&path)?;
                    write_atomic(&path, conf.as_bytes(), Some(0o644))?;
                }
                let path = self.layout.record_file();
                stack.guard_file(&path)?;
                record.save(&path)?;
                log::info!("✓ Recorded deployment {}", record.deployment_id);
                Ok(record)
            })
            .await?;

        Ok(DeployReport {
            record,
            readiness,
            index,
            admin_service: artifact.admin_service.clone(),
            admin_port: artifact.admin_port,
        })
    }

    /// Writes secret files, the compose document and the env file, each behind a compensation.
    fn write_project(
        &self,
        artifact: &ComposeArtifact,
        credentials: &CredentialSet,
        stack: &mut CompensationStack,
    ) -> Result<()> {
        let materialized = artifact.materialize(credentials)?;

        let store = self.layout.credentials_dir();
        stack.guard_dir(&store, ensure_private_dir)?;
        for (name, content) in &materialized.secret_files {
            let path = store.join(name);
            stack.guard_file(&path)?;
            write_secret_file(&path, content, SECRET_FILE_MODE)?;
        }

        let compose_file = self.layout.compose_file();
        stack.guard_file(&compose_file)?;
        write_atomic(&compose_file, materialized.compose_yaml.as_bytes(), Some(0o644))?;

        let env_file = self.layout.env_file();
        stack.guard_file(&env_file)?;
        write_secret_file(&env_file, &materialized.env_file, SECRET_FILE_MODE)?;

        log::info!(
            "✓ Wrote {} and {} ({} services{})",
            file_name(&compose_file),
            file_name(&env_file),
            artifact.services.len(),
            artifact
                .active_profile
                .as_deref()
                .map(|p| format!(", profile {p}"))
                .unwrap_or_default()
        );
        Ok(())
    }

    /// Stops the recorded stack and forgets the deployment.
    pub async fn teardown(&self, options: TeardownOptions, lock_wait: Duration) -> Result<Option<DeploymentRecord>> {
        let _lock = ProjectLock::acquire(&self.layout.lock_file(), lock_wait).await?;
        let record = DeploymentRecord::load(&self.layout.record_file())?;
        if record.is_none() && !self.layout.compose_file().exists() {
            return Err(DeployError::NotDeployed {
                project: self.layout.root().display().to_string(),
            });
        }

        let profile = record.as_ref().and_then(|r| r.active_profile.clone());
        let compose = ComposeHandle::new(self.runner, self.caps, self.compose_project(profile));
        if options.remove_volumes {
            log::warn!("Removing named volumes; indexed data will be lost");
        }
        with_retry(RetryConfig::default(), "compose down", ComposeError::is_transient, |_| {
            compose.down(options.remove_volumes)
        })
        .await?;

        remove_file_if_exists(&self.layout.record_file())?;
        remove_file_if_exists(&self.layout.active_conf())?;
        if options.purge {
            remove_file_if_exists(&self.layout.compose_file())?;
            remove_file_if_exists(&self.layout.env_file())?;
            remove_dir_all_if_exists(&self.layout.credentials_dir())?;
            log::info!("Removed generated files and the credential store");
        }
        log::info!("✓ Teardown complete");
        Ok(record)
    }

    /// Recorded deployment plus a one-shot health snapshot.
    pub async fn status(&self, ports: &HostPorts) -> Result<StatusReport> {
        let record = DeploymentRecord::load(&self.layout.record_file())?.ok_or_else(|| {
            DeployError::NotDeployed {
                project: self.layout.root().display().to_string(),
            }
        })?;
        let compose = ComposeHandle::new(
            self.runner,
            self.caps,
            self.compose_project(record.active_profile.clone()),
        );
        let services = compose.config_services().await?;
        let (admin, port) = if services.iter().any(|s| s == "cluster-master") {
            ("cluster-master", ports.cluster_management)
        } else {
            ("search-head-1", ports.management)
        };
        let snapshot = ReadinessPoller::new(&compose, self.cancel.clone())
            .with_management(admin, port, &self.probe)
            .snapshot(&services)
            .await;
        Ok(StatusReport { record, snapshot })
    }

    /// Recent logs of one service, or of all of them.
    pub async fn logs(&self, service: Option<&str>, tail: u32) -> Result<String> {
        let profile = DeploymentRecord::load(&self.layout.record_file())?
            .and_then(|r| r.active_profile);
        let compose = ComposeHandle::new(self.runner, self.caps, self.compose_project(profile));
        Ok(compose.logs(service, tail).await?)
    }

    fn compose_project(&self, profile: Option<String>) -> ComposeProject {
        ComposeProject {
            dir: self.layout.root().to_path_buf(),
            name: self.layout.project_name(),
            compose_file: self.layout.compose_file(),
            env_file: self.layout.env_file(),
            profile,
        }
    }

    /// Runs one step: logs it, races it against cancellation and tags failures with the step.
    async fn step<T>(&self, step: DeployStep, work: impl Future<Output = Result<T>>) -> Result<T> {
        if self.cancel.is_cancelled() {
            return Err(DeployError::Interrupted { step });
        }
        log::info!("▶ {} step", step);
        tokio::select! {
            _ = self.cancel.cancelled() => {
                log::warn!("Interrupted during {} step", step);
                Err(DeployError::Interrupted { step })
            }
            result = work => result.map_err(|e| DeployError::at_step(step, e)),
        }
    }
}

/// Detects the runtime, then deploys. Detection failure stops the run before credentials.
#[allow(clippy::too_many_arguments)]
pub async fn detect_and_deploy<R, P, M>(
    runner: &R,
    registry_probe: RegistryProbe,
    layout: ProjectLayout,
    credentials: &P,
    probe: M,
    cancel: CancellationToken,
    spec: &TopologySpec,
    source: ArtifactSource,
    options: &DeployOptions,
) -> Result<DeployReport>
where
    R: ProcessRunner,
    P: CredentialProvider,
    M: ManagementProbe,
{
    let caps = Detector::new(runner)
        .with_registry_probe(registry_probe)
        .detect()
        .await
        .map_err(|e| DeployError::at_step(DeployStep::Preflight, e.into()))?;
    for line in caps.summary_lines() {
        log::debug!("capability {}", line);
    }
    Orchestrator::new(runner, &caps, layout, credentials, probe)
        .with_cancellation(cancel)
        .deploy(spec, source, options)
        .await
}

fn file_name(path: &std::path::Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
