//! Air-gapped bundles: build, verify and load.
//!
//! A bundle is a directory holding an image archive, the compose document,
//! `.sha256` sidecars and `manifest.json`. Loading is only possible through a
//! [`VerifiedBundle`], which only [`verify`] produces.

pub mod checksum;
pub mod manager;
pub mod manifest;
pub mod verify;

pub use manager::{BuildRequest, BundleManager, Compression};
pub use manifest::{BundleManifest, ImageEntry};
pub use verify::{VerifiedBundle, verify};

use crate::runtime::ExecError;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// One integrity problem, reported per file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityIssue {
    /// File listed in the manifest is absent
    Missing { file: String },
    /// Content does not hash to the manifest value
    Mismatch {
        file: String,
        expected: String,
        actual: String,
    },
    /// Sidecar disagrees with the manifest
    Sidecar { file: String },
    /// `compose_checksum` differs from the compose file entry
    ComposeChecksum,
}

impl IntegrityIssue {
    /// Bundle file to re-transfer, if the issue is tied to one.
    pub fn file(&self) -> Option<&str> {
        match self {
            IntegrityIssue::Missing { file }
            | IntegrityIssue::Mismatch { file, .. }
            | IntegrityIssue::Sidecar { file } => Some(file),
            IntegrityIssue::ComposeChecksum => None,
        }
    }
}

impl fmt::Display for IntegrityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrityIssue::Missing { file } => write!(f, "{file}: missing"),
            IntegrityIssue::Mismatch {
                file,
                expected,
                actual,
            } => write!(
                f,
                "{file}: checksum mismatch (expected {}, found {})",
                short(expected),
                short(actual)
            ),
            IntegrityIssue::Sidecar { file } => {
                write!(f, "{file}: sidecar checksum disagrees with manifest")
            }
            IntegrityIssue::ComposeChecksum => {
                f.write_str("manifest compose_checksum disagrees with its own file entry")
            }
        }
    }
}

fn short(digest: &str) -> &str {
    digest.get(..12).unwrap_or(digest)
}

/// Bundle errors.
#[derive(Error, Debug)]
pub enum BundleError {
    #[error("failed to {action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No manifest means no integrity claim
    #[error("no manifest.json in {}; the bundle is incomplete", dir.display())]
    MissingManifest { dir: PathBuf },

    #[error("invalid manifest {}: {reason}", path.display())]
    InvalidManifest { path: PathBuf, reason: String },

    /// Every failing file is listed
    #[error("bundle {} failed verification:\n{}", dir.display(), issues.iter().map(|i| format!("  • {i}")).collect::<Vec<_>>().join("\n"))]
    Integrity {
        dir: PathBuf,
        issues: Vec<IntegrityIssue>,
        /// Re-download commands, when a mirror was supplied
        redownload: Vec<String>,
    },

    #[error("image archive {} is not usable: {reason}", path.display())]
    InvalidArchive { path: PathBuf, reason: String },

    #[error("`{action}` failed for {subject} (exit code {}){}", exit_code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string()), if stderr.trim().is_empty() { String::new() } else { format!(": {}", stderr.trim()) })]
    Runtime {
        action: &'static str,
        subject: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("image {image} does not match the manifest after load: expected {expected}, found {actual}")]
    DigestMismatch {
        image: String,
        expected: String,
        actual: String,
    },

    #[error("image {image} is not present after load")]
    ImageMissing { image: String },

    #[error("output directory {} already exists and is not empty", path.display())]
    OutputExists { path: PathBuf },

    #[error("no images to bundle")]
    NoImages,

    #[error(transparent)]
    Exec(#[from] ExecError),
}

impl BundleError {
    /// Integrity failures are always fatal and never repaired automatically.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            BundleError::Integrity { .. }
                | BundleError::MissingManifest { .. }
                | BundleError::InvalidManifest { .. }
                | BundleError::DigestMismatch { .. }
                | BundleError::ImageMissing { .. }
        )
    }

    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| BundleError::Io {
            action,
            path,
            source,
        }
    }
}
