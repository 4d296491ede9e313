//! Topology-to-compose generation.
//!
//! [`TopologySpec`] describes the requested cluster, [`generate`] turns it
//! into a [`ComposeArtifact`] gated by the detected [`CapabilityMatrix`], and
//! [`ComposeArtifact::materialize`] binds credentials at write time.
//!
//! [`CapabilityMatrix`]: crate::runtime::CapabilityMatrix

pub mod artifact;
pub mod compose;
pub mod generator;
pub mod spec;

pub use artifact::{ComposeArtifact, EnvFile, MaterializedArtifact, SECRET_NAMES};
pub use compose::{ComposeDocument, ComposeService, declared_services};
pub use generator::generate;
pub use spec::{
    HostPorts, ImageSet, IndexName, PlannedService, ResourceLimit, Role, SizeClass, TopologySpec,
};

use thiserror::Error;

/// Topology validation and generation errors.
#[derive(Error, Debug)]
pub enum TopologyError {
    #[error("unknown size class '{value}' (expected small, medium, large or custom)")]
    UnknownSizeClass { value: String },

    #[error("unknown role '{value}'")]
    UnknownRole { value: String },

    #[error("{role} count {count} is below the minimum of {minimum}")]
    InvalidCount { role: Role, count: u32, minimum: u32 },

    #[error(
        "cluster factors must satisfy indexers ≥ replication factor ≥ search factor ≥ 1 \
         (indexers={indexers}, replication factor={replication_factor}, search factor={search_factor})"
    )]
    FactorOrdering {
        indexers: u32,
        replication_factor: u32,
        search_factor: u32,
    },

    #[error("invalid {class} topology: {reason}")]
    ClassMinimum { class: SizeClass, reason: String },

    #[error("resource limit for {role} needs a positive cpu count and a memory value")]
    InvalidResourceLimit { role: Role },

    #[error("index name '{name}' is reserved")]
    ReservedIndexName { name: String },

    #[error("invalid index name '{name}': {reason}")]
    InvalidIndexName { name: String, reason: String },

    /// The artifact lacks services the requested class needs. Never written.
    #[error("compose document for {class} is missing required services: {}", services.join(", "))]
    MissingService {
        class: SizeClass,
        services: Vec<String>,
    },

    #[error("invalid compose document: {reason}")]
    InvalidDocument { reason: String },

    /// A credential contains characters the environment file cannot carry.
    #[error("{field} contains whitespace, quotes, '$', '#' or '\\', which the environment file cannot represent")]
    UnsafeCredential { field: &'static str },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
