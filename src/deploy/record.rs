//! Deployment record (`config/active-deployment.marker`) and project layout.

use crate::fs::write_atomic;
use crate::topology::{SizeClass, TopologySpec};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Files of one project directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLayout {
    root: PathBuf,
}

impl ProjectLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn compose_file(&self) -> PathBuf {
        self.root.join("docker-compose.yml")
    }

    pub fn env_file(&self) -> PathBuf {
        self.root.join(".env")
    }

    pub fn config_dir(&self) -> PathBuf {
        self.root.join("config")
    }

    pub fn active_conf(&self) -> PathBuf {
        self.config_dir().join("active.conf")
    }

    pub fn record_file(&self) -> PathBuf {
        self.config_dir().join("active-deployment.marker")
    }

    pub fn credentials_dir(&self) -> PathBuf {
        self.root.join("credentials")
    }

    pub fn lock_file(&self) -> PathBuf {
        self.root.join(".deploy.lock")
    }

    /// Compose project name derived from the directory name.
    pub fn project_name(&self) -> String {
        let raw = self
            .root
            .canonicalize()
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .or_else(|| {
                self.root
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
            })
            .unwrap_or_default();
        sanitize_project_name(&raw)
    }
}

/// Compose project names are lowercase alphanumerics, `-` and `_`.
pub fn sanitize_project_name(raw: &str) -> String {
    let name: String = raw
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect::<String>()
        .trim_matches(|c| c == '-' || c == '_')
        .to_string();
    if name.is_empty() {
        "splunk-cluster".to_string()
    } else {
        name
    }
}

/// Persisted marker of a committed deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub deployment_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub size_class: SizeClass,
    pub monitoring_enabled: bool,
    pub compose_files_used: Vec<String>,
    pub runtime: String,
    #[serde(default)]
    pub index_name: Option<String>,
    #[serde(default)]
    pub active_profile: Option<String>,
}

impl DeploymentRecord {
    pub fn new(spec: &TopologySpec, compose_files_used: Vec<String>, runtime: &str) -> Self {
        Self {
            deployment_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            size_class: spec.size_class,
            monitoring_enabled: spec.monitoring_enabled,
            compose_files_used,
            runtime: runtime.to_string(),
            index_name: spec.index_name.as_ref().map(|i| i.to_string()),
            active_profile: None,
        }
    }

    /// Reads the record. `Ok(None)` when no deployment is recorded.
    pub fn load(path: &Path) -> io::Result<Option<Self>> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        write_atomic(path, json.as_bytes(), Some(0o644))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ProjectLayout::new(dir.path());
        assert!(DeploymentRecord::load(&layout.record_file()).unwrap().is_none());

        let spec = TopologySpec::for_class(SizeClass::Medium);
        let record = DeploymentRecord::new(&spec, vec!["docker-compose.yml".to_string()], "docker");
        record.save(&layout.record_file()).unwrap();

        let loaded = DeploymentRecord::load(&layout.record_file()).unwrap().unwrap();
        assert_eq!(loaded, record);
        assert_eq!(loaded.size_class, SizeClass::Medium);
    }

    #[test]
    fn corrupt_record_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("marker");
        std::fs::write(&path, "not json").unwrap();
        assert!(DeploymentRecord::load(&path).is_err());
    }

    #[test]
    fn project_names_are_sanitized() {
        assert_eq!(sanitize_project_name("My Cluster.v2"), "my-cluster-v2");
        assert_eq!(sanitize_project_name("..."), "splunk-cluster");
    }
}
