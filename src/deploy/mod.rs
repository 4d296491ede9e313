//! Deployment state machine and its steps.
//!
//! [`Orchestrator::deploy`] runs the steps in [`DeployStep`] order. Everything
//! before `Generate` is free of side effects apart from the project lock;
//! everything from `Generate` on registers a compensation so a failure rolls
//! the project back to its previous state.

pub mod credentials;
pub mod lock;
pub mod orchestrator;
pub mod post_config;
pub mod preflight;
pub mod record;
pub mod rollback;
pub mod secrets;

pub use credentials::{
    CredentialChain, CredentialError, CredentialProvider, CredentialSet, GeneratedCredentials,
    PromptCredentials, StaticCredentials, StoredCredentials,
};
pub use lock::ProjectLock;
pub use orchestrator::{
    ArtifactSource, DeployOptions, DeployReport, Orchestrator, ReadinessOutcome, StatusReport,
    TeardownOptions, detect_and_deploy,
};
pub use post_config::{IndexOutcome, PostConfigError};
pub use preflight::{PreflightError, PreflightOptions};
pub use record::{DeploymentRecord, ProjectLayout};
pub use rollback::{Compensation, CompensationStack, RollbackReport};

use std::fmt;

/// Deployment steps, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DeployStep {
    Preflight,
    Credentials,
    /// Commit point: first step that writes project files
    Generate,
    Apply,
    PostConfigure,
    Readiness,
    Record,
}

impl DeployStep {
    pub const ALL: [DeployStep; 7] = [
        DeployStep::Preflight,
        DeployStep::Credentials,
        DeployStep::Generate,
        DeployStep::Apply,
        DeployStep::PostConfigure,
        DeployStep::Readiness,
        DeployStep::Record,
    ];

    /// Failures from here on trigger rollback.
    pub fn is_after_commit(self) -> bool {
        self >= DeployStep::Generate
    }
}

impl fmt::Display for DeployStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeployStep::Preflight => "preflight",
            DeployStep::Credentials => "credentials",
            DeployStep::Generate => "generate",
            DeployStep::Apply => "apply",
            DeployStep::PostConfigure => "post-configure",
            DeployStep::Readiness => "readiness",
            DeployStep::Record => "record",
        })
    }
}
