//! Comprehensive error types for deployment operations.
//!
//! Lower layers (detector, generator, bundle manager, poller) return their own
//! structured errors. Only the orchestrator decides whether a failure is
//! retried, rolled back or propagated, and [`DeployError::kind`] exposes the
//! classification the CLI uses for exit codes and remediation hints.

use crate::bundle::BundleError;
use crate::deploy::{CredentialError, DeployStep, PostConfigError, PreflightError};
use crate::health::PollError;
use crate::runtime::{ComposeError, DetectError, ExecError};
use crate::topology::TopologyError;
use thiserror::Error;

/// Result type alias for deployment operations
pub type Result<T> = std::result::Result<T, DeployError>;

/// Exit code for a successful run.
pub const EXIT_OK: i32 = 0;
/// Exit code for any orchestrator failure.
pub const EXIT_FAILURE: i32 = 1;
/// Exit code when the operator must log out and back in before retrying.
pub const EXIT_RELOGIN_REQUIRED: i32 = 3;
/// Exit code when the stack was applied but did not become ready in time.
pub const EXIT_READINESS_TIMEOUT: i32 = 4;

/// Failure classification shared by every layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// No usable runtime, insufficient disk, port conflict. Aborts before side effects.
    FatalEnvironment,
    /// Operator must start a new login session (group membership not yet active).
    ReloginRequired,
    /// Bad topology, bad password, malformed compose document.
    Validation,
    /// Image pull or apply failures that may succeed on retry.
    TransientOperational,
    /// Bundle checksum or digest mismatch. Never auto-repaired.
    Integrity,
    /// Stack applied but not ready before the deadline.
    ReadinessTimeout,
    /// Interrupted by the operator.
    Interrupted,
    /// Local I/O or serialization failure.
    Internal,
}

/// Main error type for all deployment operations
#[derive(Error, Debug)]
pub enum DeployError {
    /// CLI argument errors
    #[error("CLI error: {0}")]
    Cli(#[from] CliError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML rendering errors
    #[error("TOML render error: {0}")]
    TomlRender(#[from] toml::ser::Error),

    /// Runtime/compose detection failed
    #[error(transparent)]
    Detect(#[from] DetectError),

    /// Topology validation or generation failed
    #[error(transparent)]
    Topology(#[from] TopologyError),

    /// Credential provisioning failed
    #[error(transparent)]
    Credentials(#[from] CredentialError),

    /// Host pre-flight checks failed
    #[error(transparent)]
    Preflight(#[from] PreflightError),

    /// Runtime process invocation failed
    #[error(transparent)]
    Exec(#[from] ExecError),

    /// Compose command failed
    #[error(transparent)]
    Compose(#[from] ComposeError),

    /// Post-readiness configuration failed
    #[error(transparent)]
    PostConfig(#[from] PostConfigError),

    /// Bundle build/verify/load failed
    #[error(transparent)]
    Bundle(#[from] BundleError),

    /// Readiness polling failed
    #[error(transparent)]
    Readiness(#[from] PollError),

    /// A deployment step failed; wraps the underlying cause with the step name
    #[error("{step} step failed: {source}")]
    Step {
        /// Step that failed
        step: DeployStep,
        /// Underlying cause
        #[source]
        source: Box<DeployError>,
    },

    /// Operator interrupt received during a step
    #[error("interrupted during {step} step")]
    Interrupted {
        /// Step that was running
        step: DeployStep,
    },

    /// No deployment record exists for an operation that needs one
    #[error("no active deployment found in {project}")]
    NotDeployed {
        /// Project directory
        project: String,
    },
}

/// CLI-specific errors
#[derive(Error, Debug)]
pub enum CliError {
    /// Invalid command line arguments
    #[error("Invalid arguments: {reason}")]
    InvalidArguments {
        /// Reason for the error
        reason: String,
    },

    /// Conflicting arguments
    #[error("Conflicting arguments: {arguments:?}")]
    ConflictingArguments {
        /// Arguments that conflict
        arguments: Vec<String>,
    },
}

impl DeployError {
    /// Wraps an error with the step it occurred in. Already-wrapped errors are kept as-is.
    pub fn at_step(step: DeployStep, source: DeployError) -> Self {
        match source {
            already @ (DeployError::Step { .. } | DeployError::Interrupted { .. }) => already,
            other => DeployError::Step {
                step,
                source: Box::new(other),
            },
        }
    }

    /// Failure classification used for exit codes and retry decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeployError::Cli(_) => ErrorKind::Validation,
            DeployError::Io(_)
            | DeployError::Json(_)
            | DeployError::Toml(_)
            | DeployError::TomlRender(_) => ErrorKind::Internal,
            DeployError::Detect(DetectError::ReloginRequired { .. }) => ErrorKind::ReloginRequired,
            DeployError::Detect(_) => ErrorKind::FatalEnvironment,
            DeployError::Topology(_) | DeployError::Credentials(_) => ErrorKind::Validation,
            DeployError::Preflight(PreflightError::AlreadyDeployed { .. }) => ErrorKind::Validation,
            DeployError::Preflight(_) => ErrorKind::FatalEnvironment,
            DeployError::Exec(_) => ErrorKind::TransientOperational,
            DeployError::Compose(err) if err.is_structural() => ErrorKind::Validation,
            DeployError::Compose(_) => ErrorKind::TransientOperational,
            DeployError::PostConfig(_) => ErrorKind::TransientOperational,
            DeployError::Bundle(err) if err.is_integrity_failure() => ErrorKind::Integrity,
            DeployError::Bundle(_) => ErrorKind::Internal,
            DeployError::Readiness(PollError::Cancelled { .. }) => ErrorKind::Interrupted,
            DeployError::Readiness(_) => ErrorKind::ReadinessTimeout,
            DeployError::Step { source, .. } => source.kind(),
            DeployError::Interrupted { .. } => ErrorKind::Interrupted,
            DeployError::NotDeployed { .. } => ErrorKind::Validation,
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::ReloginRequired => EXIT_RELOGIN_REQUIRED,
            ErrorKind::ReadinessTimeout => EXIT_READINESS_TIMEOUT,
            _ => EXIT_FAILURE,
        }
    }

    /// Exact operator remediation, where one exists.
    pub fn remediation(&self) -> Option<String> {
        match self {
            DeployError::Step { source, .. } => source.remediation(),
            DeployError::Detect(DetectError::NoContainerRuntime { .. }) => Some(
                "Install Podman (with podman-compose) or Docker (with the compose plugin) and re-run"
                    .to_string(),
            ),
            DeployError::Detect(DetectError::ReloginRequired { group, .. }) => Some(format!(
                "Log out and back in (or run `newgrp {group}`) so the new group membership takes effect"
            )),
            DeployError::Preflight(PreflightError::InsufficientDisk { path, .. }) => Some(format!(
                "Free disk space on the filesystem holding {}",
                path.display()
            )),
            DeployError::Preflight(PreflightError::PortInUse { port, .. }) => Some(format!(
                "Stop the process listening on port {port} (see: ss -ltnp 'sport = :{port}')"
            )),
            DeployError::Preflight(PreflightError::AlreadyDeployed { .. }) => {
                Some("Re-run with --force to replace the existing deployment".to_string())
            }
            DeployError::Preflight(PreflightError::Locked { path, .. }) => Some(format!(
                "Wait for the other deployment to finish, or remove {} if no deployment is running",
                path.display()
            )),
            DeployError::Credentials(CredentialError::Policy { .. }) => Some(
                "Choose a password with at least 12 characters mixing upper case, lower case, digits and symbols"
                    .to_string(),
            ),
            DeployError::Bundle(err) if err.is_integrity_failure() => Some(
                "Re-transfer the reported files from the original bundle; do not edit manifest.json"
                    .to_string(),
            ),
            DeployError::NotDeployed { .. } => Some("Run `deploy` first".to_string()),
            _ => None,
        }
    }
}
