//! Cluster topology: size classes, roles, role counts and their invariants.

use super::TopologyError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Index names owned by the platform itself.
const RESERVED_INDEX_NAMES: &[&str] = &[
    "main",
    "history",
    "summary",
    "splunklogger",
    "default",
    "lastchanceindex",
    "_internal",
    "_audit",
    "_introspection",
    "_telemetry",
    "_thefishbucket",
    "_metrics",
    "_metrics_rollup",
    "_configtracker",
];

const MAX_INDEX_NAME_LEN: usize = 80;

/// Cluster size class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeClass {
    Small,
    Medium,
    Large,
    Custom,
}

/// Role counts and cluster factors implied by a size class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeDefaults {
    pub indexers: u32,
    pub search_heads: u32,
    pub heavy_forwarders: u32,
    pub replication_factor: u32,
    pub search_factor: u32,
}

impl SizeClass {
    /// Classes that get a compose profile in every multi-profile document.
    pub const PROFILED: [SizeClass; 3] = [SizeClass::Small, SizeClass::Medium, SizeClass::Large];

    pub fn as_str(self) -> &'static str {
        match self {
            SizeClass::Small => "small",
            SizeClass::Medium => "medium",
            SizeClass::Large => "large",
            SizeClass::Custom => "custom",
        }
    }

    /// Default counts. `Custom` starts from the small layout.
    pub fn defaults(self) -> SizeDefaults {
        match self {
            SizeClass::Small | SizeClass::Custom => SizeDefaults {
                indexers: 1,
                search_heads: 1,
                heavy_forwarders: 0,
                replication_factor: 1,
                search_factor: 1,
            },
            SizeClass::Medium => SizeDefaults {
                indexers: 2,
                search_heads: 1,
                heavy_forwarders: 0,
                replication_factor: 2,
                search_factor: 2,
            },
            SizeClass::Large => SizeDefaults {
                indexers: 3,
                search_heads: 3,
                heavy_forwarders: 1,
                replication_factor: 3,
                search_factor: 2,
            },
        }
    }

    /// Minimum free disk in GB for the project filesystem.
    pub fn min_disk_gb(self) -> u64 {
        match self {
            SizeClass::Small => 10,
            SizeClass::Medium => 20,
            SizeClass::Large | SizeClass::Custom => 50,
        }
    }
}

impl fmt::Display for SizeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SizeClass {
    type Err = TopologyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "small" => Ok(SizeClass::Small),
            "medium" => Ok(SizeClass::Medium),
            "large" => Ok(SizeClass::Large),
            "custom" => Ok(SizeClass::Custom),
            _ => Err(TopologyError::UnknownSizeClass {
                value: s.to_string(),
            }),
        }
    }
}

/// Service roles known to the generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    Indexer,
    SearchHead,
    ClusterMaster,
    Deployer,
    HeavyForwarder,
    Prometheus,
    Grafana,
    Alertmanager,
}

impl Role {
    pub const ALL: [Role; 8] = [
        Role::Indexer,
        Role::SearchHead,
        Role::ClusterMaster,
        Role::Deployer,
        Role::HeavyForwarder,
        Role::Prometheus,
        Role::Grafana,
        Role::Alertmanager,
    ];

    /// Value of `SPLUNK_ROLE` for platform roles; `None` for monitoring services.
    pub fn splunk_role(self) -> Option<&'static str> {
        match self {
            Role::Indexer => Some("splunk_indexer"),
            Role::SearchHead => Some("splunk_search_head"),
            Role::ClusterMaster => Some("splunk_cluster_master"),
            Role::Deployer => Some("splunk_deployer"),
            Role::HeavyForwarder => Some("splunk_heavy_forwarder"),
            Role::Prometheus | Role::Grafana | Role::Alertmanager => None,
        }
    }

    pub fn is_monitoring(self) -> bool {
        self.splunk_role().is_none()
    }

    /// Default CPU and memory ceiling for the role.
    pub fn default_limit(self) -> ResourceLimit {
        let (cpus, memory) = match self {
            Role::Indexer | Role::SearchHead => (2.0, "4g"),
            Role::ClusterMaster | Role::HeavyForwarder => (1.0, "2g"),
            Role::Deployer => (1.0, "1g"),
            Role::Prometheus | Role::Grafana | Role::Alertmanager => (0.5, "512m"),
        };
        ResourceLimit {
            cpus,
            memory: memory.to_string(),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Indexer => "indexer",
            Role::SearchHead => "search-head",
            Role::ClusterMaster => "cluster-master",
            Role::Deployer => "deployer",
            Role::HeavyForwarder => "heavy-forwarder",
            Role::Prometheus => "prometheus",
            Role::Grafana => "grafana",
            Role::Alertmanager => "alertmanager",
        })
    }
}

impl FromStr for Role {
    type Err = TopologyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.to_string() == s)
            .ok_or_else(|| TopologyError::UnknownRole {
                value: s.to_string(),
            })
    }
}

/// Compose `deploy.resources.limits` for one role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimit {
    pub cpus: f64,
    /// Compose memory string, e.g. `4g`
    pub memory: String,
}

/// Validated index name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IndexName(String);

impl IndexName {
    /// Parses an index name, rejecting reserved and malformed names.
    pub fn parse(name: &str) -> Result<Self, TopologyError> {
        let lowered = name.to_ascii_lowercase();
        if RESERVED_INDEX_NAMES.contains(&lowered.as_str()) {
            return Err(TopologyError::ReservedIndexName {
                name: name.to_string(),
            });
        }

        let invalid = |reason: &str| TopologyError::InvalidIndexName {
            name: name.to_string(),
            reason: reason.to_string(),
        };
        if name.is_empty() {
            return Err(invalid("name is empty"));
        }
        if name.len() > MAX_INDEX_NAME_LEN {
            return Err(invalid("name is longer than 80 characters"));
        }
        if !name.starts_with(|c: char| c.is_ascii_lowercase() || c.is_ascii_digit()) {
            return Err(invalid("must start with a lowercase letter or digit"));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
        {
            return Err(invalid("only lowercase letters, digits, '_' and '-' are allowed"));
        }
        Ok(IndexName(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for IndexName {
    type Error = TopologyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        IndexName::parse(&value)
    }
}

impl From<IndexName> for String {
    fn from(value: IndexName) -> Self {
        value.0
    }
}

impl fmt::Display for IndexName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Host ports published by the stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostPorts {
    pub web: u16,
    pub management: u16,
    pub cluster_management: u16,
    pub hec: u16,
    pub s2s: u16,
    pub prometheus: u16,
    pub grafana: u16,
    pub alertmanager: u16,
}

impl Default for HostPorts {
    fn default() -> Self {
        Self {
            web: 8000,
            management: 8089,
            cluster_management: 18089,
            hec: 8088,
            s2s: 9997,
            prometheus: 9090,
            grafana: 3000,
            alertmanager: 9093,
        }
    }
}

/// Container images per service family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageSet {
    pub splunk: String,
    pub prometheus: String,
    pub grafana: String,
    pub alertmanager: String,
}

impl Default for ImageSet {
    fn default() -> Self {
        Self {
            splunk: "docker.io/splunk/splunk:9.1.2".to_string(),
            prometheus: "docker.io/prom/prometheus:v2.47.0".to_string(),
            grafana: "docker.io/grafana/grafana:10.1.0".to_string(),
            alertmanager: "docker.io/prom/alertmanager:v0.26.0".to_string(),
        }
    }
}

impl ImageSet {
    pub fn for_role(&self, role: Role) -> &str {
        match role {
            Role::Prometheus => &self.prometheus,
            Role::Grafana => &self.grafana,
            Role::Alertmanager => &self.alertmanager,
            _ => &self.splunk,
        }
    }
}

/// One service in a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedService {
    pub name: String,
    pub role: Role,
}

/// Requested cluster layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologySpec {
    pub size_class: SizeClass,
    pub indexer_count: u32,
    pub search_head_count: u32,
    pub heavy_forwarder_count: u32,
    pub replication_factor: u32,
    pub search_factor: u32,
    pub monitoring_enabled: bool,
    #[serde(default)]
    pub resource_limits: BTreeMap<Role, ResourceLimit>,
    #[serde(default)]
    pub images: ImageSet,
    #[serde(default)]
    pub index_name: Option<IndexName>,
    #[serde(default)]
    pub ports: HostPorts,
}

impl TopologySpec {
    /// Spec populated with the defaults of `class`.
    pub fn for_class(class: SizeClass) -> Self {
        let d = class.defaults();
        Self {
            size_class: class,
            indexer_count: d.indexers,
            search_head_count: d.search_heads,
            heavy_forwarder_count: d.heavy_forwarders,
            replication_factor: d.replication_factor,
            search_factor: d.search_factor,
            monitoring_enabled: false,
            resource_limits: BTreeMap::new(),
            images: ImageSet::default(),
            index_name: None,
            ports: HostPorts::default(),
        }
    }

    /// Same images, limits, ports and monitoring, but another class's default counts.
    pub fn sibling(&self, class: SizeClass) -> Self {
        Self {
            monitoring_enabled: self.monitoring_enabled,
            resource_limits: self.resource_limits.clone(),
            images: self.images.clone(),
            index_name: self.index_name.clone(),
            ports: self.ports.clone(),
            ..Self::for_class(class)
        }
    }

    /// Checks role counts and factor ordering.
    ///
    /// Runs before anything is generated or written.
    pub fn validate(&self) -> Result<(), TopologyError> {
        if self.indexer_count < 1 {
            return Err(TopologyError::InvalidCount {
                role: Role::Indexer,
                count: self.indexer_count,
                minimum: 1,
            });
        }
        if self.search_head_count < 1 {
            return Err(TopologyError::InvalidCount {
                role: Role::SearchHead,
                count: self.search_head_count,
                minimum: 1,
            });
        }
        if self.search_factor < 1
            || self.replication_factor < self.search_factor
            || self.indexer_count < self.replication_factor
        {
            return Err(TopologyError::FactorOrdering {
                indexers: self.indexer_count,
                replication_factor: self.replication_factor,
                search_factor: self.search_factor,
            });
        }

        match self.size_class {
            SizeClass::Medium if self.indexer_count < 2 => {
                return Err(TopologyError::ClassMinimum {
                    class: self.size_class,
                    reason: "medium clusters need at least 2 indexers".to_string(),
                });
            }
            SizeClass::Large if self.indexer_count < 3 || self.search_head_count < 3 => {
                return Err(TopologyError::ClassMinimum {
                    class: self.size_class,
                    reason: "large clusters need at least 3 indexers and 3 search heads"
                        .to_string(),
                });
            }
            _ => {}
        }

        for (role, limit) in &self.resource_limits {
            if !(limit.cpus > 0.0) || limit.memory.trim().is_empty() {
                return Err(TopologyError::InvalidResourceLimit { role: *role });
            }
        }
        Ok(())
    }

    pub fn has_cluster_master(&self) -> bool {
        self.indexer_count > 1 || matches!(self.size_class, SizeClass::Medium | SizeClass::Large)
    }

    pub fn has_deployer(&self) -> bool {
        self.search_head_count > 1
    }

    /// Every service this layout runs, in start order.
    pub fn services(&self) -> Vec<PlannedService> {
        let mut services = Vec::new();
        let mut push = |name: String, role: Role| services.push(PlannedService { name, role });

        if self.has_cluster_master() {
            push("cluster-master".to_string(), Role::ClusterMaster);
        }
        for i in 1..=self.indexer_count {
            push(format!("indexer-{i}"), Role::Indexer);
        }
        if self.has_deployer() {
            push("deployer".to_string(), Role::Deployer);
        }
        for i in 1..=self.search_head_count {
            push(format!("search-head-{i}"), Role::SearchHead);
        }
        for i in 1..=self.heavy_forwarder_count {
            push(format!("heavy-forwarder-{i}"), Role::HeavyForwarder);
        }
        if self.monitoring_enabled {
            push("prometheus".to_string(), Role::Prometheus);
            push("grafana".to_string(), Role::Grafana);
            push("alertmanager".to_string(), Role::Alertmanager);
        }
        services
    }

    /// Names of [`Self::services`].
    pub fn service_names(&self) -> Vec<String> {
        self.services().into_iter().map(|s| s.name).collect()
    }

    /// Service answering the management endpoint during readiness.
    pub fn admin_service(&self) -> &'static str {
        if self.has_cluster_master() {
            "cluster-master"
        } else {
            "search-head-1"
        }
    }

    /// Host port of the admin service's management endpoint.
    pub fn admin_port(&self) -> u16 {
        if self.has_cluster_master() {
            self.ports.cluster_management
        } else {
            self.ports.management
        }
    }

    /// Authoritative instance for index creation.
    pub fn index_target(&self) -> &'static str {
        if self.has_cluster_master() {
            "cluster-master"
        } else {
            "indexer-1"
        }
    }

    pub fn limit_for(&self, role: Role) -> ResourceLimit {
        self.resource_limits
            .get(&role)
            .cloned()
            .unwrap_or_else(|| role.default_limit())
    }

    /// Host ports this layout binds.
    pub fn planned_host_ports(&self) -> Vec<u16> {
        let mut ports = vec![
            self.ports.web,
            self.ports.management,
            self.ports.hec,
            self.ports.s2s,
        ];
        if self.has_cluster_master() {
            ports.push(self.ports.cluster_management);
        }
        if self.monitoring_enabled {
            ports.extend([self.ports.prometheus, self.ports.grafana, self.ports.alertmanager]);
        }
        ports
    }

    /// Distinct images the layout needs.
    pub fn images_in_use(&self) -> Vec<String> {
        let mut images: Vec<String> = self
            .services()
            .iter()
            .map(|s| self.images.for_role(s.role).to_string())
            .collect();
        images.sort();
        images.dedup();
        images
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_names_are_rejected_case_insensitively() {
        for name in ["main", "_internal", "Main", "_AUDIT"] {
            assert!(
                matches!(
                    IndexName::parse(name),
                    Err(TopologyError::ReservedIndexName { .. })
                ),
                "{name} should be reserved"
            );
        }
    }

    #[test]
    fn index_name_charset() {
        assert!(IndexName::parse("app_logs-2024").is_ok());
        assert!(IndexName::parse("-leading").is_err());
        assert!(IndexName::parse("Upper").is_err());
        assert!(IndexName::parse("has space").is_err());
        assert!(IndexName::parse("").is_err());
    }

    #[test]
    fn replication_factor_above_indexers_is_rejected() {
        let mut spec = TopologySpec::for_class(SizeClass::Small);
        spec.replication_factor = 2;
        spec.search_factor = 1;
        assert!(matches!(
            spec.validate(),
            Err(TopologyError::FactorOrdering { .. })
        ));
    }

    #[test]
    fn search_factor_above_replication_factor_is_rejected() {
        let mut spec = TopologySpec::for_class(SizeClass::Medium);
        spec.search_factor = 3;
        assert!(spec.validate().is_err());
    }

    #[test]
    fn class_minimums() {
        let mut medium = TopologySpec::for_class(SizeClass::Medium);
        medium.indexer_count = 1;
        medium.replication_factor = 1;
        medium.search_factor = 1;
        assert!(matches!(
            medium.validate(),
            Err(TopologyError::ClassMinimum { .. })
        ));

        let mut large = TopologySpec::for_class(SizeClass::Large);
        large.search_head_count = 2;
        assert!(matches!(
            large.validate(),
            Err(TopologyError::ClassMinimum { .. })
        ));
    }

    #[test]
    fn defaults_are_valid() {
        for class in [SizeClass::Small, SizeClass::Medium, SizeClass::Large, SizeClass::Custom] {
            TopologySpec::for_class(class).validate().unwrap();
        }
    }

    #[test]
    fn large_plan_has_cluster_roles() {
        let spec = TopologySpec::for_class(SizeClass::Large);
        let names = spec.service_names();
        assert!(names.contains(&"cluster-master".to_string()));
        assert!(names.contains(&"deployer".to_string()));
        assert!(names.contains(&"heavy-forwarder-1".to_string()));
        assert_eq!(spec.admin_service(), "cluster-master");
        assert_eq!(spec.index_target(), "cluster-master");
    }

    #[test]
    fn small_single_indexer_has_no_cluster_master() {
        let spec = TopologySpec::for_class(SizeClass::Small);
        assert_eq!(spec.service_names(), vec!["indexer-1", "search-head-1"]);
        assert_eq!(spec.admin_service(), "search-head-1");
        assert_eq!(spec.index_target(), "indexer-1");
        assert_eq!(spec.planned_host_ports(), vec![8000, 8089, 8088, 9997]);
    }

    #[test]
    fn size_class_parses_case_insensitively() {
        assert_eq!("LARGE".parse::<SizeClass>().unwrap(), SizeClass::Large);
        assert!("huge".parse::<SizeClass>().is_err());
    }
}
