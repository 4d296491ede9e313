//! `manifest.json`: the bundle's only source of expected checksums and digests.

use super::BundleError;
use crate::fs::write_atomic;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Component, Path};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const SCHEMA_VERSION: u32 = 1;
/// Compose document name inside a bundle.
pub const COMPOSE_FILE: &str = "docker-compose.yml";
/// Uncompressed image archive name.
pub const IMAGE_ARCHIVE: &str = "images.tar";
/// Gzip-compressed image archive name.
pub const IMAGE_ARCHIVE_GZ: &str = "images.tar.gz";

/// One bundled image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageEntry {
    /// Reference the compose document uses
    pub name: String,
    /// Registry digest when known, else the image ID
    pub digest: String,
    /// Local image ID at build time; survives `save`/`load`, registry digests do not
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleManifest {
    pub schema_version: u32,
    pub created_at: DateTime<Utc>,
    pub runtime_used: String,
    pub compose_checksum: String,
    pub images: Vec<ImageEntry>,
    /// Relative path -> hex sha256
    pub files: BTreeMap<String, String>,
}

impl BundleManifest {
    /// Reads and structurally validates `<dir>/manifest.json`.
    pub fn load(dir: &Path) -> Result<Self, BundleError> {
        let path = dir.join(MANIFEST_FILE);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BundleError::MissingManifest {
                    dir: dir.to_path_buf(),
                });
            }
            Err(source) => {
                return Err(BundleError::Io {
                    action: "read",
                    path,
                    source,
                });
            }
        };

        let manifest: BundleManifest =
            serde_json::from_str(&content).map_err(|e| BundleError::InvalidManifest {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        manifest.validate().map_err(|reason| BundleError::InvalidManifest { path, reason })?;
        Ok(manifest)
    }

    pub fn save(&self, dir: &Path) -> Result<(), BundleError> {
        let path = dir.join(MANIFEST_FILE);
        let json = serde_json::to_string_pretty(self).map_err(|e| BundleError::InvalidManifest {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        write_atomic(&path, json.as_bytes(), Some(0o644)).map_err(|source| BundleError::Io {
            action: "write",
            path,
            source,
        })
    }

    /// The image archive listed in `files`.
    pub fn archive_file(&self) -> Option<&str> {
        [IMAGE_ARCHIVE_GZ, IMAGE_ARCHIVE]
            .into_iter()
            .find(|name| self.files.contains_key(*name))
    }

    fn validate(&self) -> Result<(), String> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(format!(
                "unsupported schema version {} (expected {})",
                self.schema_version, SCHEMA_VERSION
            ));
        }
        for (rel, digest) in &self.files {
            if !is_contained(rel) {
                return Err(format!("file entry '{rel}' escapes the bundle directory"));
            }
            if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(format!("file entry '{rel}' has a malformed checksum"));
            }
        }
        if !self.files.contains_key(COMPOSE_FILE) {
            return Err(format!("no checksum for {COMPOSE_FILE}"));
        }
        if self.archive_file().is_none() {
            return Err("no image archive listed".to_string());
        }
        Ok(())
    }
}

/// Relative, with no `..`, root or prefix components.
fn is_contained(rel: &str) -> bool {
    let path = Path::new(rel);
    !rel.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest() -> BundleManifest {
        let digest = "a".repeat(64);
        BundleManifest {
            schema_version: SCHEMA_VERSION,
            created_at: Utc::now(),
            runtime_used: "docker".to_string(),
            compose_checksum: digest.clone(),
            images: vec![ImageEntry {
                name: "docker.io/splunk/splunk:9.1.2".to_string(),
                digest: "sha256:deadbeef".to_string(),
                image_id: None,
            }],
            files: BTreeMap::from([
                (COMPOSE_FILE.to_string(), digest.clone()),
                (IMAGE_ARCHIVE_GZ.to_string(), digest),
            ]),
        }
    }

    #[test]
    fn saved_manifest_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let m = manifest();
        m.save(dir.path()).unwrap();
        assert_eq!(BundleManifest::load(dir.path()).unwrap(), m);
        assert_eq!(m.archive_file(), Some(IMAGE_ARCHIVE_GZ));
    }

    #[test]
    fn escaping_paths_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = manifest();
        m.files.insert("../etc/passwd".to_string(), "b".repeat(64));
        m.save(dir.path()).unwrap();
        assert!(matches!(
            BundleManifest::load(dir.path()),
            Err(BundleError::InvalidManifest { .. })
        ));
    }

    #[test]
    fn missing_manifest_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            BundleManifest::load(dir.path()),
            Err(BundleError::MissingManifest { .. })
        ));
    }
}
