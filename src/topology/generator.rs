//! Pure `(TopologySpec, CapabilityMatrix) -> ComposeArtifact` generation.

use super::artifact::{ComposeArtifact, EnvFile, SECRET_NAMES};
use super::compose::{
    ComposeDocument, ComposeService, DeployConfig, HealthcheckConfig, ResourceConfig,
    ResourceLimits,
};
use super::spec::{Role, SizeClass, TopologySpec};
use super::TopologyError;
use crate::runtime::CapabilityMatrix;
use std::collections::{BTreeMap, BTreeSet};

/// Network every service joins.
pub const NETWORK_NAME: &str = "splunk-net";

/// File format version written for standalone docker-compose v1.
const LEGACY_COMPOSE_VERSION: &str = "3.9";

/// Management port inside every platform container.
const CONTAINER_MANAGEMENT_PORT: u16 = 8089;

/// Generates the compose artifact for `spec`.
///
/// Validation runs first, so an invalid spec never yields a document. The
/// result is checked for every mandatory service before it is returned.
pub fn generate(spec: &TopologySpec, caps: &CapabilityMatrix) -> Result<ComposeArtifact, TopologyError> {
    spec.validate()?;

    let profiled = caps.supports_profiles;
    let plans: Vec<(SizeClass, TopologySpec)> = if profiled {
        let mut plans: Vec<(SizeClass, TopologySpec)> = SizeClass::PROFILED
            .iter()
            .map(|class| {
                if *class == spec.size_class {
                    (*class, spec.clone())
                } else {
                    (*class, spec.sibling(*class))
                }
            })
            .collect();
        if spec.size_class == SizeClass::Custom {
            plans.push((SizeClass::Custom, spec.clone()));
        }
        plans
    } else {
        vec![(spec.size_class, spec.clone())]
    };

    // service -> (role, classes whose plan includes it)
    let mut memberships: BTreeMap<String, (Role, BTreeSet<SizeClass>)> = BTreeMap::new();
    for (class, plan) in &plans {
        for service in plan.services() {
            memberships
                .entry(service.name)
                .or_insert_with(|| (service.role, BTreeSet::new()))
                .1
                .insert(*class);
        }
    }

    let mut doc = ComposeDocument::default();
    if caps.requires_version_key() {
        doc.version = Some(LEGACY_COMPOSE_VERSION.to_string());
    }
    doc.add_network(NETWORK_NAME, "bridge");

    if caps.supports_secrets {
        for name in SECRET_NAMES {
            doc.add_secret(name, &format!("./credentials/{name}"));
        }
    } else {
        log::warn!(
            "Compose secrets are not supported by {} {}; credentials will be stored in the owner-only environment file",
            caps.runtime,
            caps.compose_impl
        );
    }

    for (name, (role, classes)) in &memberships {
        let mut service = base_service(spec, caps, name, *role);
        if profiled {
            service.profiles = classes.iter().map(|c| c.as_str().to_string()).collect();
        } else {
            service.depends_on = dependencies(spec, *role);
        }
        for volume in &service.volumes {
            if let Some((volume_name, _)) = volume.split_once(':') {
                doc.add_volume(volume_name);
            }
        }
        doc.add_service(name, service);
    }

    let services = spec.service_names();
    let missing = doc.missing_services(services.iter().map(String::as_str));
    if !missing.is_empty() {
        return Err(TopologyError::MissingService {
            class: spec.size_class,
            services: missing,
        });
    }
    let dangling = doc.dangling_dependencies();
    if !dangling.is_empty() {
        return Err(TopologyError::MissingService {
            class: spec.size_class,
            services: dangling,
        });
    }

    let health_exempt = if caps.supports_healthcheck {
        BTreeSet::new()
    } else {
        log::warn!("Healthchecks unavailable; readiness of every service will be judged by running state");
        services.iter().cloned().collect()
    };

    log::debug!(
        "Generated {} services for {} ({} profile mode)",
        doc.services.len(),
        spec.size_class,
        if profiled { "multi" } else { "single" }
    );

    Ok(ComposeArtifact {
        size_class: spec.size_class,
        document: doc,
        bundled_yaml: None,
        env: cluster_env(spec),
        uses_compose_secrets: caps.supports_secrets,
        active_profile: profiled.then(|| spec.size_class.as_str().to_string()),
        services,
        health_exempt,
        admin_service: spec.admin_service().to_string(),
        admin_port: spec.admin_port(),
        index_target: spec.index_target().to_string(),
    })
}

fn base_service(spec: &TopologySpec, caps: &CapabilityMatrix, name: &str, role: Role) -> ComposeService {
    let limit = spec.limit_for(role);
    let mut service = ComposeService {
        image: spec.images.for_role(role).to_string(),
        hostname: Some(name.to_string()),
        networks: vec![NETWORK_NAME.to_string()],
        ports: published_ports(spec, name),
        volumes: volumes(name, role),
        restart: "unless-stopped".to_string(),
        deploy: Some(DeployConfig {
            resources: Some(ResourceConfig {
                limits: Some(ResourceLimits {
                    cpus: Some(format!("{:.2}", limit.cpus)),
                    memory: Some(limit.memory.clone()),
                }),
            }),
        }),
        ..Default::default()
    };

    if let Some(splunk_role) = role.splunk_role() {
        service
            .environment
            .insert("SPLUNK_ROLE".to_string(), splunk_role.to_string());
        service
            .environment
            .insert("SPLUNK_START_ARGS".to_string(), "--accept-license".to_string());
        service.env_file = vec![".env".to_string()];
        if caps.supports_secrets {
            service.secrets = SECRET_NAMES.iter().map(|s| s.to_string()).collect();
        }
    }

    if caps.supports_healthcheck {
        service.healthcheck = Some(healthcheck(role));
    }
    service
}

fn published_ports(spec: &TopologySpec, name: &str) -> Vec<String> {
    let p = &spec.ports;
    let pairs: Vec<(u16, u16)> = match name {
        "search-head-1" => vec![(p.web, 8000), (p.management, CONTAINER_MANAGEMENT_PORT)],
        "cluster-master" => vec![(p.cluster_management, CONTAINER_MANAGEMENT_PORT)],
        "indexer-1" => vec![(p.s2s, 9997), (p.hec, 8088)],
        "prometheus" => vec![(p.prometheus, 9090)],
        "grafana" => vec![(p.grafana, 3000)],
        "alertmanager" => vec![(p.alertmanager, 9093)],
        _ => Vec::new(),
    };
    pairs
        .into_iter()
        .map(|(host, container)| format!("{host}:{container}"))
        .collect()
}

fn volumes(name: &str, role: Role) -> Vec<String> {
    match role {
        Role::Prometheus => vec!["prometheus-data:/prometheus".to_string()],
        Role::Grafana => vec!["grafana-data:/var/lib/grafana".to_string()],
        Role::Alertmanager => vec!["alertmanager-data:/alertmanager".to_string()],
        _ => vec![
            format!("{name}-var:/opt/splunk/var"),
            format!("{name}-etc:/opt/splunk/etc"),
        ],
    }
}

fn healthcheck(role: Role) -> HealthcheckConfig {
    let spider = |url: &str| {
        vec![
            "CMD".to_string(),
            "wget".to_string(),
            "-q".to_string(),
            "--spider".to_string(),
            url.to_string(),
        ]
    };
    let (test, start_period) = match role {
        Role::Prometheus => (spider("http://localhost:9090/-/healthy"), "30s"),
        Role::Grafana => (spider("http://localhost:3000/api/health"), "30s"),
        Role::Alertmanager => (spider("http://localhost:9093/-/healthy"), "30s"),
        _ => (
            vec!["CMD".to_string(), "/sbin/checkstate.sh".to_string()],
            "300s",
        ),
    };
    HealthcheckConfig {
        test,
        interval: "30s".to_string(),
        timeout: "10s".to_string(),
        retries: 5,
        start_period: start_period.to_string(),
    }
}

/// Start-order hints for single-profile documents.
fn dependencies(spec: &TopologySpec, role: Role) -> Vec<String> {
    let mut deps = Vec::new();
    match role {
        Role::Indexer | Role::Deployer if spec.has_cluster_master() => {
            deps.push("cluster-master".to_string());
        }
        Role::SearchHead => {
            if spec.has_cluster_master() {
                deps.push("cluster-master".to_string());
            }
            if spec.has_deployer() {
                deps.push("deployer".to_string());
            }
        }
        Role::HeavyForwarder => deps.push("indexer-1".to_string()),
        Role::Grafana | Role::Alertmanager => deps.push("prometheus".to_string()),
        _ => {}
    }
    deps
}

/// Peer lists and factors for the requested class.
fn cluster_env(spec: &TopologySpec) -> EnvFile {
    let names_of = |role: Role| {
        spec.services()
            .into_iter()
            .filter(|s| s.role == role)
            .map(|s| s.name)
            .collect::<Vec<_>>()
            .join(",")
    };

    let mut env = EnvFile::default();
    env.push("SPLUNK_SIZE_CLASS", spec.size_class.as_str());
    if spec.has_cluster_master() {
        env.push("SPLUNK_CLUSTER_MASTER_URL", "cluster-master");
    }
    env.push("SPLUNK_INDEXER_URL", names_of(Role::Indexer));
    env.push("SPLUNK_SEARCH_HEAD_URL", names_of(Role::SearchHead));
    if spec.has_deployer() {
        env.push("SPLUNK_DEPLOYER_URL", "deployer");
    }
    if spec.heavy_forwarder_count > 0 {
        env.push("SPLUNK_HEAVY_FORWARDER_URL", names_of(Role::HeavyForwarder));
    }
    env.push("SPLUNK_REPLICATION_FACTOR", spec.replication_factor.to_string());
    env.push("SPLUNK_SEARCH_FACTOR", spec.search_factor.to_string());
    if let Some(index) = &spec.index_name {
        env.push("SPLUNK_INDEX_NAME", index.as_str());
    }
    env
}
