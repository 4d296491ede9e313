use crate::bundle::verify;
use crate::cli::{DeployArgs, RuntimeConfig};
use crate::deploy::{
    ArtifactSource, CredentialChain, DeployOptions, DeployStep, IndexOutcome, PreflightOptions,
    ProjectLayout, ReadinessOutcome, detect_and_deploy,
};
use crate::error::DeployError;
use crate::health::HttpManagementProbe;
use crate::runtime::{RegistryProbe, SystemRunner};
use crate::settings::Settings;
use anyhow::Context;
use secrecy::SecretString;
use std::path::Path;
use tokio_util::sync::CancellationToken;

pub async fn deploy(
    args: &DeployArgs,
    project_dir: &Path,
    mut settings: Settings,
    config: &RuntimeConfig,
    cancel: CancellationToken,
) -> anyhow::Result<i32> {
    args.apply(&mut settings);
    let spec = settings.topology_spec().map_err(DeployError::from)?;
    std::fs::create_dir_all(project_dir)
        .with_context(|| format!("failed to create project directory {}", project_dir.display()))?;
    let layout = ProjectLayout::new(project_dir);

    let source = match &args.bundle {
        Some(dir) => {
            config.progress(&format!("Verifying bundle {}", dir.display()))?;
            let verified = verify(dir, args.mirror.as_deref())
                .await
                .map_err(|e| DeployError::at_step(DeployStep::Preflight, e.into()))?;
            config.success("Bundle verified")?;
            ArtifactSource::Bundle(verified)
        }
        None => ArtifactSource::Generate,
    };

    let registry_probe = match settings.deploy.offline {
        Some(air_gapped) => RegistryProbe::Assume { air_gapped },
        None => RegistryProbe::default(),
    };
    let password = args.password.clone().map(SecretString::from);
    let credentials = CredentialChain::standard(
        password,
        &layout.credentials_dir(),
        settings.credentials.allow_generate,
    );
    let probe = HttpManagementProbe::new().context("failed to build the management HTTPS client")?;

    let options = DeployOptions {
        preflight: PreflightOptions {
            force: args.force,
            min_disk_gb: settings.deploy.min_disk_gb,
            skip_port_check: settings.deploy.skip_port_check,
        },
        username: settings.credentials.username.clone(),
        non_interactive: settings.credentials.non_interactive,
        retry: settings.retry_config(),
        readiness_timeout: settings.readiness_timeout(),
        poll_interval: settings.poll_interval(),
        lock_wait: settings.lock_wait(),
        active_conf: Some(settings.render()?),
        ..DeployOptions::default()
    };

    config.progress(&format!(
        "Deploying {} cluster ({} services) into {}",
        spec.size_class,
        spec.service_names().len(),
        layout.root().display()
    ))?;
    let runner = SystemRunner::new();
    let report = detect_and_deploy(
        &runner,
        registry_probe,
        layout,
        &credentials,
        probe,
        cancel,
        &spec,
        source,
        &options,
    )
    .await?;

    config.section("Services")?;
    for line in report.readiness.snapshot().describe() {
        config.indent(&line)?;
    }
    match &report.readiness {
        ReadinessOutcome::Ready(_) => config.success("All services ready")?,
        ReadinessOutcome::TimedOut { not_ready, .. } => config.warn(&format!(
            "Not ready after {}s: {}. The deployment is recorded; check `status` and `logs`",
            settings.deploy.readiness_timeout_secs,
            not_ready.join(", ")
        ))?,
    }
    if let (Some(outcome), Some(index)) = (report.index, &spec.index_name) {
        match outcome {
            IndexOutcome::Created => config.success(&format!("Index '{index}' created"))?,
            IndexOutcome::AlreadyExists => config.indent(&format!("Index '{index}' already existed"))?,
        }
    }
    config.indent(&format!(
        "Management endpoint: https://127.0.0.1:{} ({})",
        report.admin_port, report.admin_service
    ))?;
    config.success(&format!("Deployment {} recorded", report.record.deployment_id))?;
    Ok(report.exit_code())
}
