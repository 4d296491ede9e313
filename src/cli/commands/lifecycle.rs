//! Commands that act on an existing deployment.

use super::detect_capabilities;
use crate::cli::{RuntimeConfig, TeardownArgs};
use crate::deploy::{CredentialChain, Orchestrator, ProjectLayout, TeardownOptions};
use crate::health::HttpManagementProbe;
use crate::runtime::SystemRunner;
use crate::settings::Settings;
use anyhow::Context;
use std::path::Path;

pub async fn teardown(
    args: &TeardownArgs,
    project_dir: &Path,
    settings: &Settings,
    config: &RuntimeConfig,
) -> anyhow::Result<i32> {
    let runner = SystemRunner::new();
    let caps = detect_capabilities(&runner, Some(true)).await?;
    let no_credentials = CredentialChain::new();
    let probe = HttpManagementProbe::new().context("failed to build the management HTTPS client")?;
    let orchestrator = Orchestrator::new(
        &runner,
        &caps,
        ProjectLayout::new(project_dir),
        &no_credentials,
        probe,
    );

    if args.volumes {
        config.warn("Named volumes will be removed; indexed data is lost")?;
    }
    let options = TeardownOptions {
        remove_volumes: args.volumes,
        purge: args.purge,
    };
    let record = orchestrator.teardown(options, settings.lock_wait()).await?;
    match record {
        Some(record) => config.success(&format!("Deployment {} torn down", record.deployment_id))?,
        None => config.success("Stack stopped (no deployment was recorded)")?,
    }
    Ok(0)
}

pub async fn status(
    project_dir: &Path,
    settings: &Settings,
    json: bool,
    config: &RuntimeConfig,
) -> anyhow::Result<i32> {
    let runner = SystemRunner::new();
    let caps = detect_capabilities(&runner, Some(true)).await?;
    let no_credentials = CredentialChain::new();
    let probe = HttpManagementProbe::new().context("failed to build the management HTTPS client")?;
    let orchestrator = Orchestrator::new(
        &runner,
        &caps,
        ProjectLayout::new(project_dir),
        &no_credentials,
        probe,
    );
    let report = orchestrator.status(&settings.ports).await?;

    if json {
        let value = serde_json::json!({
            "deployment": report.record,
            "ready": report.snapshot.is_ready(),
            "health": report.snapshot,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        let record = &report.record;
        config.section(&format!("Deployment {}", record.deployment_id))?;
        config.indent(&format!("size: {}", record.size_class))?;
        config.indent(&format!("runtime: {}", record.runtime))?;
        config.indent(&format!("deployed: {}", record.timestamp.to_rfc3339()))?;
        config.indent(&format!("monitoring: {}", record.monitoring_enabled))?;
        if let Some(index) = &record.index_name {
            config.indent(&format!("index: {index}"))?;
        }
        config.section("Services")?;
        for line in report.snapshot.describe() {
            config.indent(&line)?;
        }
        if report.snapshot.is_ready() {
            config.success("All services ready")?;
        } else {
            config.warn(&format!("Not ready: {}", report.snapshot.not_ready().join(", ")))?;
        }
    }
    Ok(if report.snapshot.is_ready() { 0 } else { 1 })
}

pub async fn logs(project_dir: &Path, service: Option<&str>, tail: u32) -> anyhow::Result<i32> {
    let runner = SystemRunner::new();
    let caps = detect_capabilities(&runner, Some(true)).await?;
    let no_credentials = CredentialChain::new();
    let probe = HttpManagementProbe::new().context("failed to build the management HTTPS client")?;
    let orchestrator = Orchestrator::new(
        &runner,
        &caps,
        ProjectLayout::new(project_dir),
        &no_credentials,
        probe,
    );
    print!("{}", orchestrator.logs(service, tail).await?);
    Ok(0)
}
