//! Deployment engine for clustered indexing/search stacks on Podman or Docker.
//!
//! The engine detects the container runtime once per run, generates a compose
//! project for the requested cluster size, applies it with rollback on
//! failure and polls until every service is healthy. Offline hosts deploy from
//! checksum-verified bundles instead of pulling images.
//!
//! It can be used both as a CLI tool and as a library dependency.

pub mod bundle;
pub mod cli;
pub mod deploy;
pub mod error;
pub mod fs;
pub mod health;
pub mod retry;
pub mod runtime;
pub mod settings;
pub mod topology;

// Re-export commonly used types
pub use deploy::{ArtifactSource, DeployOptions, DeployReport, Orchestrator};
pub use error::{DeployError, ErrorKind, Result};
pub use runtime::{CapabilityMatrix, Detector, ProcessRunner, SystemRunner};
pub use settings::Settings;
pub use topology::{SizeClass, TopologySpec};
