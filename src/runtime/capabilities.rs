//! Capability matrix: the detected runtime, its compose implementation and feature flags.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Container runtime family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    Docker,
    Podman,
}

impl RuntimeKind {
    /// Detection order: Podman is preferred when both are usable.
    pub const PREFERENCE: [RuntimeKind; 2] = [RuntimeKind::Podman, RuntimeKind::Docker];

    /// CLI binary name.
    pub fn binary_name(self) -> &'static str {
        match self {
            RuntimeKind::Docker => "docker",
            RuntimeKind::Podman => "podman",
        }
    }

    /// Standalone compose binary for this runtime.
    pub fn standalone_compose_binary(self) -> &'static str {
        match self {
            RuntimeKind::Docker => "docker-compose",
            RuntimeKind::Podman => "podman-compose",
        }
    }

    /// Compose implementation used when `<runtime> compose` works.
    pub fn subcommand_compose_kind(self) -> ComposeImplKind {
        match self {
            RuntimeKind::Docker => ComposeImplKind::Plugin,
            RuntimeKind::Podman => ComposeImplKind::Native,
        }
    }
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.binary_name())
    }
}

/// How compose is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComposeImplKind {
    /// `podman compose`
    Native,
    /// `docker compose` (Compose v2 plugin)
    Plugin,
    /// Standalone `docker-compose` v1 or `podman-compose`
    LegacyV1,
}

impl fmt::Display for ComposeImplKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ComposeImplKind::Native => "native",
            ComposeImplKind::Plugin => "plugin",
            ComposeImplKind::LegacyV1 => "legacy-v1",
        })
    }
}

/// Feature matrix built once per run and passed explicitly to every consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityMatrix {
    pub runtime: RuntimeKind,
    pub compose_impl: ComposeImplKind,
    /// Resolved runtime binary
    pub runtime_binary: PathBuf,
    /// Resolved compose program (the runtime binary itself for `Native`/`Plugin`)
    pub compose_binary: PathBuf,
    pub supports_secrets: bool,
    pub supports_healthcheck: bool,
    pub supports_profiles: bool,
    pub supports_buildkit: bool,
    pub socket_available: bool,
    pub rootless: bool,
    pub network_backend: String,
    pub air_gapped: bool,
}

impl CapabilityMatrix {
    /// Matrix with every optional feature disabled.
    pub fn baseline(
        runtime: RuntimeKind,
        compose_impl: ComposeImplKind,
        runtime_binary: impl Into<PathBuf>,
        compose_binary: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runtime,
            compose_impl,
            runtime_binary: runtime_binary.into(),
            compose_binary: compose_binary.into(),
            supports_secrets: false,
            supports_healthcheck: false,
            supports_profiles: false,
            supports_buildkit: false,
            socket_available: false,
            rootless: false,
            network_backend: "bridge".to_string(),
            air_gapped: false,
        }
    }

    /// Program and leading arguments that start a compose command.
    pub fn compose_command(&self) -> (PathBuf, Vec<String>) {
        match self.compose_impl {
            ComposeImplKind::Native | ComposeImplKind::Plugin => {
                (self.runtime_binary.clone(), vec!["compose".to_string()])
            }
            ComposeImplKind::LegacyV1 => (self.compose_binary.clone(), Vec::new()),
        }
    }

    /// Whether generated documents need a top-level `version` key.
    pub fn requires_version_key(&self) -> bool {
        self.compose_impl == ComposeImplKind::LegacyV1 && self.runtime == RuntimeKind::Docker
    }

    /// One `name: value` line per capability, for `detect` output.
    pub fn summary_lines(&self) -> Vec<String> {
        vec![
            format!("runtime: {} ({})", self.runtime, self.runtime_binary.display()),
            format!("compose: {} ({})", self.compose_impl, self.compose_binary.display()),
            format!("secrets: {}", self.supports_secrets),
            format!("healthcheck: {}", self.supports_healthcheck),
            format!("profiles: {}", self.supports_profiles),
            format!("buildkit: {}", self.supports_buildkit),
            format!("socket: {}", self.socket_available),
            format!("rootless: {}", self.rootless),
            format!("network backend: {}", self.network_backend),
            format!("air-gapped: {}", self.air_gapped),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subcommand_compose_uses_runtime_binary() {
        let caps = CapabilityMatrix::baseline(
            RuntimeKind::Docker,
            ComposeImplKind::Plugin,
            "/usr/bin/docker",
            "/usr/bin/docker",
        );
        let (program, args) = caps.compose_command();
        assert_eq!(program, PathBuf::from("/usr/bin/docker"));
        assert_eq!(args, vec!["compose".to_string()]);
        assert!(!caps.requires_version_key());
    }

    #[test]
    fn legacy_compose_runs_standalone_binary() {
        let caps = CapabilityMatrix::baseline(
            RuntimeKind::Docker,
            ComposeImplKind::LegacyV1,
            "/usr/bin/docker",
            "/usr/local/bin/docker-compose",
        );
        let (program, args) = caps.compose_command();
        assert_eq!(program, PathBuf::from("/usr/local/bin/docker-compose"));
        assert!(args.is_empty());
        assert!(caps.requires_version_key());
    }
}
