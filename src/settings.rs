//! Layered configuration: built-in defaults, an optional TOML file, then CLI flags.
//!
//! The effective settings are rendered back to TOML as `config/active.conf`
//! after a committed deployment. Settings never carry credentials.

use crate::error::Result;
use crate::retry::RetryConfig;
use crate::topology::{HostPorts, ImageSet, IndexName, ResourceLimit, Role, SizeClass, TopologyError, TopologySpec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

const ACTIVE_CONF_HEADER: &str = "# Effective configuration of the active deployment.\n\
# Written on every successful deploy; edit the source config file instead.\n\n";

/// Effective configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub cluster: ClusterSettings,
    pub credentials: CredentialSettings,
    pub deploy: DeploySettings,
    pub retry: RetrySettings,
    pub images: ImageSet,
    pub ports: HostPorts,
    /// Role name -> resource ceiling
    pub limits: BTreeMap<String, ResourceLimit>,
}

/// `[cluster]`: counts left unset take the size-class defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClusterSettings {
    pub size: SizeClass,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indexers: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_heads: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heavy_forwarders: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replication_factor: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_factor: Option<u32>,
    pub monitoring: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_name: Option<String>,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            size: SizeClass::Small,
            indexers: None,
            search_heads: None,
            heavy_forwarders: None,
            replication_factor: None,
            search_factor: None,
            monitoring: false,
            index_name: None,
        }
    }
}

/// `[credentials]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CredentialSettings {
    pub username: String,
    /// Generate a password when no other source has one
    pub allow_generate: bool,
    /// Never prompt
    pub non_interactive: bool,
}

impl Default for CredentialSettings {
    fn default() -> Self {
        Self {
            username: "admin".to_string(),
            allow_generate: true,
            non_interactive: false,
        }
    }
}

/// `[deploy]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeploySettings {
    pub readiness_timeout_secs: u64,
    pub poll_interval_secs: u64,
    pub lock_wait_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_disk_gb: Option<u64>,
    pub skip_port_check: bool,
    /// Forces air-gapped (`true`) or online (`false`) mode instead of probing registries
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offline: Option<bool>,
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            readiness_timeout_secs: 600,
            poll_interval_secs: 10,
            lock_wait_secs: 30,
            min_disk_gb: None,
            skip_port_check: false,
            offline: None,
        }
    }
}

/// `[retry]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let d = RetryConfig::default();
        Self {
            max_attempts: d.max_attempts,
            base_delay_secs: d.base_delay.as_secs(),
            max_delay_secs: d.max_delay.as_secs(),
        }
    }
}

impl Settings {
    /// Defaults, overlaid with `path` when given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        log::debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Topology requested by these settings. Not yet validated.
    pub fn topology_spec(&self) -> std::result::Result<TopologySpec, TopologyError> {
        let c = &self.cluster;
        let mut spec = TopologySpec::for_class(c.size);
        if let Some(n) = c.indexers {
            spec.indexer_count = n;
        }
        if let Some(n) = c.search_heads {
            spec.search_head_count = n;
        }
        if let Some(n) = c.heavy_forwarders {
            spec.heavy_forwarder_count = n;
        }
        if let Some(n) = c.replication_factor {
            spec.replication_factor = n;
        }
        if let Some(n) = c.search_factor {
            spec.search_factor = n;
        }
        spec.monitoring_enabled = c.monitoring;
        spec.index_name = c.index_name.as_deref().map(IndexName::parse).transpose()?;
        spec.images = self.images.clone();
        spec.ports = self.ports.clone();
        for (role, limit) in &self.limits {
            spec.resource_limits.insert(role.parse::<Role>()?, limit.clone());
        }
        Ok(spec)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.retry.max_attempts,
            base_delay: Duration::from_secs(self.retry.base_delay_secs),
            max_delay: Duration::from_secs(self.retry.max_delay_secs),
        }
    }

    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_secs(self.deploy.readiness_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.deploy.poll_interval_secs.max(1))
    }

    pub fn lock_wait(&self) -> Duration {
        Duration::from_secs(self.deploy.lock_wait_secs)
    }

    /// TOML text for `config/active.conf`.
    pub fn render(&self) -> Result<String> {
        Ok(format!("{}{}", ACTIVE_CONF_HEADER, toml::to_string_pretty(self)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cluster.toml");
        std::fs::write(
            &path,
            r#"
[cluster]
size = "medium"
indexers = 3
monitoring = true
index_name = "app_logs"

[deploy]
readiness_timeout_secs = 120

[limits.indexer]
cpus = 4.0
memory = "8g"
"#,
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.credentials.username, "admin");
        assert_eq!(settings.readiness_timeout(), Duration::from_secs(120));

        let spec = settings.topology_spec().unwrap();
        assert_eq!(spec.size_class, SizeClass::Medium);
        assert_eq!(spec.indexer_count, 3);
        assert_eq!(spec.replication_factor, 2);
        assert!(spec.monitoring_enabled);
        assert_eq!(spec.index_name.unwrap().as_str(), "app_logs");
        assert_eq!(spec.resource_limits[&Role::Indexer].memory, "8g");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cluster.toml");
        std::fs::write(&path, "[cluster]\nsize = \"small\"\nindexer = 2\n").unwrap();
        assert!(Settings::load(Some(&path)).is_err());
    }

    #[test]
    fn rendered_settings_parse_back() {
        let mut settings = Settings::default();
        settings.cluster.size = SizeClass::Large;
        settings.cluster.index_name = Some("metrics".to_string());
        let text = settings.render().unwrap();
        assert!(text.starts_with("# Effective configuration"));
        let parsed: Settings = toml::from_str(&text).unwrap();
        assert_eq!(parsed, settings);
    }

    #[test]
    fn unknown_role_in_limits_is_an_error() {
        let mut settings = Settings::default();
        settings.limits.insert(
            "database".to_string(),
            ResourceLimit {
                cpus: 1.0,
                memory: "1g".to_string(),
            },
        );
        assert!(matches!(
            settings.topology_spec(),
            Err(TopologyError::UnknownRole { .. })
        ));
    }
}
