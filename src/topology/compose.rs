//! Compose document model.
//!
//! Serialised with `serde_yaml`. Maps are ordered so the same topology always
//! renders byte-identical YAML.

use super::TopologyError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComposeDocument {
    /// Only emitted for standalone docker-compose v1
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub services: BTreeMap<String, ComposeService>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub networks: BTreeMap<String, ComposeNetwork>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub volumes: BTreeMap<String, ComposeVolume>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub secrets: BTreeMap<String, ComposeSecret>,
}

impl ComposeDocument {
    pub fn add_service(&mut self, name: &str, service: ComposeService) {
        self.services.insert(name.to_string(), service);
    }

    pub fn add_network(&mut self, name: &str, driver: &str) {
        self.networks.insert(
            name.to_string(),
            ComposeNetwork {
                driver: driver.to_string(),
            },
        );
    }

    pub fn add_volume(&mut self, name: &str) {
        self.volumes.insert(name.to_string(), ComposeVolume {});
    }

    pub fn add_secret(&mut self, name: &str, file: &str) {
        self.secrets.insert(
            name.to_string(),
            ComposeSecret {
                file: file.to_string(),
            },
        );
    }

    pub fn to_yaml(&self) -> Result<String, TopologyError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Required services absent from this document.
    pub fn missing_services<'a>(&self, required: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        required
            .into_iter()
            .filter(|name| !self.services.contains_key(*name))
            .map(String::from)
            .collect()
    }

    /// Every `depends_on` target that is not itself a service.
    pub fn dangling_dependencies(&self) -> Vec<String> {
        self.services
            .values()
            .flat_map(|s| s.depends_on.iter())
            .filter(|dep| !self.services.contains_key(dep.as_str()))
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Service names declared by an arbitrary compose document.
///
/// Used for documents shipped in bundles, which may carry keys this model
/// does not know about.
pub fn declared_services(yaml: &str) -> Result<BTreeSet<String>, TopologyError> {
    let value: serde_yaml::Value = serde_yaml::from_str(yaml)?;
    let services = value
        .get("services")
        .and_then(serde_yaml::Value::as_mapping)
        .ok_or_else(|| TopologyError::InvalidDocument {
            reason: "document has no `services` mapping".to_string(),
        })?;
    Ok(services
        .keys()
        .filter_map(|k| k.as_str().map(String::from))
        .collect())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComposeService {
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env_file: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub profiles: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub restart: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy: Option<DeployConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<HealthcheckConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposeNetwork {
    pub driver: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComposeVolume {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposeSecret {
    pub file: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<ResourceLimits>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpus: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthcheckConfig {
    pub test: Vec<String>,
    pub interval: String,
    pub timeout: String,
    pub retries: u32,
    pub start_period: String,
}
