//! Command line interface.
//!
//! Parses arguments, layers settings and dispatches to one command handler.
//! Handlers return the process exit code; failures propagate as
//! [`anyhow::Error`] wrapping a [`crate::error::DeployError`] where one exists.

mod args;
pub mod commands;
mod output;

pub use args::{Args, BundleCommand, Command, DeployArgs, RuntimeConfig, TeardownArgs};
pub use output::OutputManager;

use crate::error::DeployError;
use crate::settings::Settings;
use tokio_util::sync::CancellationToken;

/// Main CLI entry point
pub async fn run() -> anyhow::Result<i32> {
    let args = Args::parse_args();
    args.validate().map_err(DeployError::from)?;
    let config = RuntimeConfig::from(&args);
    let settings = Settings::load(args.config.as_deref())?;

    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());

    match &args.command {
        Command::Deploy(deploy) => {
            commands::deploy(deploy, &args.project_dir, settings, &config, cancel).await
        }
        Command::Teardown(teardown) => {
            commands::teardown(teardown, &args.project_dir, &settings, &config).await
        }
        Command::Status { json } => {
            commands::status(&args.project_dir, &settings, *json, &config).await
        }
        Command::Detect { json, offline } => {
            commands::detect(*json, *offline || settings.deploy.offline == Some(true), &config).await
        }
        Command::Logs { service, tail } => {
            commands::logs(&args.project_dir, service.as_deref(), *tail).await
        }
        Command::Bundle(bundle) => commands::bundle(bundle, &settings, &config).await,
    }
}

/// First Ctrl-C cancels the token; the running step rolls back and returns.
fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupt received; stopping the current step");
            token.cancel();
        }
    });
}
