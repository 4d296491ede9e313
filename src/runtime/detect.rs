//! Container runtime and compose capability detection.
//!
//! Podman is tried first, then Docker. For the winning runtime every feature
//! is probed by exercising it rather than inferred from version strings.

use super::capabilities::{CapabilityMatrix, ComposeImplKind, RuntimeKind};
use super::config::{
    CAPABILITY_PROBE_TIMEOUT, DOCKER_SOCKET, DOCKER_START_HELP, PODMAN_ROOTFUL_SOCKET,
    REGISTRY_ENDPOINTS, REGISTRY_PROBE_TIMEOUT, RUNTIME_INFO_TIMEOUT,
};
use super::exec::{Invocation, ProcessRunner};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const SECRETS_PROBE: &str = "services:\n  probe:\n    image: busybox\n    secrets:\n      - probe_secret\nsecrets:\n  probe_secret:\n    file: ./probe_secret.txt\n";

const PROFILES_PROBE: &str =
    "services:\n  probe:\n    image: busybox\n    profiles:\n      - probe\n";

/// Detection failures. Both are unrecoverable for the current run.
#[derive(Error, Debug)]
pub enum DetectError {
    /// Neither Podman nor Docker (with a compose implementation) is usable
    #[error("no container runtime available:\n{}", attempts.iter().map(|a| format!("  • {a}")).collect::<Vec<_>>().join("\n"))]
    NoContainerRuntime {
        /// Why each candidate was rejected
        attempts: Vec<String>,
    },

    /// Docker is installed but this login session lacks the socket's group
    #[error("{user} is a member of group '{group}' but this session has not picked it up yet")]
    ReloginRequired {
        /// Invoking user
        user: String,
        /// Group owning the runtime socket
        group: String,
    },

    /// Temporary probe files could not be written
    #[error("failed to prepare capability probes: {0}")]
    ProbeSetup(#[from] std::io::Error),
}

/// How the air-gapped flag is decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryProbe {
    /// Probe these registry endpoints over HTTP; all unreachable ⇒ air-gapped
    Http {
        /// Endpoints to probe
        endpoints: Vec<String>,
        /// Per-request timeout
        timeout: Duration,
    },
    /// Skip probing and use this value
    Assume {
        /// Whether the host is air-gapped
        air_gapped: bool,
    },
}

impl Default for RegistryProbe {
    fn default() -> Self {
        RegistryProbe::Http {
            endpoints: REGISTRY_ENDPOINTS.iter().map(|s| s.to_string()).collect(),
            timeout: REGISTRY_PROBE_TIMEOUT,
        }
    }
}

/// Compose implementation found for a runtime.
struct ComposeBinding {
    kind: ComposeImplKind,
    binary: PathBuf,
}

/// Probes the host for a usable runtime and builds the [`CapabilityMatrix`].
pub struct Detector<'r, R: ProcessRunner> {
    runner: &'r R,
    registry_probe: RegistryProbe,
    info_timeout: Duration,
}

impl<'r, R: ProcessRunner> Detector<'r, R> {
    /// Detector with default registry probing.
    pub fn new(runner: &'r R) -> Self {
        Self {
            runner,
            registry_probe: RegistryProbe::default(),
            info_timeout: RUNTIME_INFO_TIMEOUT,
        }
    }

    /// Overrides how the air-gapped flag is decided.
    pub fn with_registry_probe(mut self, probe: RegistryProbe) -> Self {
        self.registry_probe = probe;
        self
    }

    /// Overrides the `info` timeout.
    pub fn with_info_timeout(mut self, timeout: Duration) -> Self {
        self.info_timeout = timeout;
        self
    }

    /// Selects exactly one runtime and probes its capabilities.
    ///
    /// # Returns
    ///
    /// * `Ok(CapabilityMatrix)` - the first usable runtime in preference order
    /// * `Err(DetectError::NoContainerRuntime)` - nothing usable; fatal, do not retry
    pub async fn detect(&self) -> Result<CapabilityMatrix, DetectError> {
        let mut attempts = Vec::new();

        for runtime in RuntimeKind::PREFERENCE {
            match self.probe_runtime(runtime).await {
                Ok((binary, compose)) => {
                    log::info!(
                        "✓ Using {} ({}) with {} compose",
                        runtime,
                        binary.display(),
                        compose.kind
                    );
                    return self.build_matrix(runtime, binary, compose).await;
                }
                Err(reason) => {
                    log::debug!("{} not usable: {}", runtime, reason);
                    attempts.push(format!("{runtime}: {reason}"));
                }
            }
        }

        #[cfg(unix)]
        {
            if let Some(err) = self.relogin_hint() {
                return Err(err);
            }
        }

        Err(DetectError::NoContainerRuntime { attempts })
    }

    /// Locates the runtime, checks `info`, then finds a compose implementation.
    async fn probe_runtime(&self, runtime: RuntimeKind) -> Result<(PathBuf, ComposeBinding), String> {
        let binary = self
            .runner
            .locate(runtime.binary_name())
            .ok_or_else(|| "not found on PATH".to_string())?;

        let info = Invocation::new(binary.clone(), self.info_timeout).arg("info");
        match self.runner.run(&info).await {
            Ok(output) if output.success() => {}
            Ok(output) => {
                let hint = if runtime == RuntimeKind::Docker {
                    format!(" ({DOCKER_START_HELP})")
                } else {
                    String::new()
                };
                return Err(format!(
                    "`{} info` exited with {:?}{}",
                    runtime,
                    output.exit_code,
                    hint
                ));
            }
            Err(e) => return Err(e.to_string()),
        }

        let compose = self
            .probe_compose(runtime, &binary)
            .await
            .ok_or_else(|| {
                format!(
                    "`{} compose` and `{}` are both unavailable",
                    runtime,
                    runtime.standalone_compose_binary()
                )
            })?;
        Ok((binary, compose))
    }

    async fn probe_compose(&self, runtime: RuntimeKind, binary: &Path) -> Option<ComposeBinding> {
        let subcommand = Invocation::new(binary.to_path_buf(), CAPABILITY_PROBE_TIMEOUT)
            .args(["compose", "version"]);
        if self.succeeds(&subcommand).await {
            return Some(ComposeBinding {
                kind: runtime.subcommand_compose_kind(),
                binary: binary.to_path_buf(),
            });
        }

        let standalone = self.runner.locate(runtime.standalone_compose_binary())?;
        let version = Invocation::new(standalone.clone(), CAPABILITY_PROBE_TIMEOUT).arg("version");
        if self.succeeds(&version).await {
            Some(ComposeBinding {
                kind: ComposeImplKind::LegacyV1,
                binary: standalone,
            })
        } else {
            None
        }
    }

    async fn build_matrix(
        &self,
        runtime: RuntimeKind,
        binary: PathBuf,
        compose: ComposeBinding,
    ) -> Result<CapabilityMatrix, DetectError> {
        let mut caps = CapabilityMatrix::baseline(runtime, compose.kind, binary, compose.binary);

        let probe_dir = tempfile::tempdir()?;
        std::fs::write(probe_dir.path().join("probe_secret.txt"), "probe")?;
        std::fs::write(probe_dir.path().join("secrets.yml"), SECRETS_PROBE)?;
        std::fs::write(probe_dir.path().join("profiles.yml"), PROFILES_PROBE)?;

        caps.supports_secrets = self
            .compose_config_accepts(&caps, probe_dir.path(), "secrets.yml")
            .await;
        caps.supports_profiles = self
            .compose_config_accepts(&caps, probe_dir.path(), "profiles.yml")
            .await;
        caps.supports_healthcheck = self.probe_healthcheck(&caps).await;
        caps.supports_buildkit = self.probe_buildkit(&caps).await;
        caps.socket_available = socket_path(runtime).map(|p| p.exists()).unwrap_or(false);
        caps.rootless = self.probe_rootless(&caps).await;
        caps.network_backend = self.probe_network_backend(&caps).await;
        caps.air_gapped = self.probe_air_gapped().await;

        for line in caps.summary_lines() {
            log::debug!("capability {}", line);
        }
        if !caps.supports_secrets {
            log::warn!("Compose secrets unsupported; credentials will be inlined into the environment file");
        }
        if !caps.supports_healthcheck {
            log::warn!("Container healthchecks unsupported; readiness will rely on running state only");
        }

        Ok(caps)
    }

    async fn compose_config_accepts(&self, caps: &CapabilityMatrix, dir: &Path, file: &str) -> bool {
        let (program, base_args) = caps.compose_command();
        let inv = Invocation::new(program, CAPABILITY_PROBE_TIMEOUT)
            .args(base_args)
            .args(["-f", file, "config", "-q"])
            .current_dir(dir);
        self.succeeds(&inv).await
    }

    async fn probe_healthcheck(&self, caps: &CapabilityMatrix) -> bool {
        let inv = Invocation::new(caps.runtime_binary.clone(), CAPABILITY_PROBE_TIMEOUT)
            .args(["run", "--help"]);
        match self.runner.run(&inv).await {
            Ok(output) if output.success() => {
                output.stdout.contains("--health-cmd") || output.stderr.contains("--health-cmd")
            }
            _ => false,
        }
    }

    async fn probe_buildkit(&self, caps: &CapabilityMatrix) -> bool {
        match caps.runtime {
            // Podman builds through Buildah
            RuntimeKind::Podman => true,
            RuntimeKind::Docker => {
                let inv = Invocation::new(caps.runtime_binary.clone(), CAPABILITY_PROBE_TIMEOUT)
                    .args(["buildx", "version"]);
                self.succeeds(&inv).await
            }
        }
    }

    async fn probe_rootless(&self, caps: &CapabilityMatrix) -> bool {
        match caps.runtime {
            RuntimeKind::Podman => {
                let value = self
                    .info_field(caps, "{{.Host.Security.Rootless}}")
                    .await
                    .unwrap_or_default();
                value.eq_ignore_ascii_case("true")
            }
            RuntimeKind::Docker => {
                if socket_owned_by_invoking_user(Path::new(DOCKER_SOCKET)) {
                    return true;
                }
                self.info_field(caps, "{{.SecurityOptions}}")
                    .await
                    .map(|v| v.contains("rootless"))
                    .unwrap_or(false)
            }
        }
    }

    async fn probe_network_backend(&self, caps: &CapabilityMatrix) -> String {
        match caps.runtime {
            RuntimeKind::Podman => self
                .info_field(caps, "{{.Host.NetworkBackend}}")
                .await
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| "bridge".to_string()),
            RuntimeKind::Docker => "bridge".to_string(),
        }
    }

    async fn probe_air_gapped(&self) -> bool {
        let (endpoints, timeout) = match &self.registry_probe {
            RegistryProbe::Assume { air_gapped } => return *air_gapped,
            RegistryProbe::Http { endpoints, timeout } => (endpoints, *timeout),
        };

        let client = match reqwest::Client::builder().timeout(timeout).build() {
            Ok(client) => client,
            Err(e) => {
                log::warn!("Cannot build HTTP client for registry probe: {}", e);
                return true;
            }
        };

        for endpoint in endpoints {
            // Any HTTP answer (including 401) proves the registry is reachable
            match client.get(endpoint.as_str()).send().await {
                Ok(response) => {
                    log::debug!("Registry {} answered {}", endpoint, response.status());
                    return false;
                }
                Err(e) => log::debug!("Registry {} unreachable: {}", endpoint, e),
            }
        }
        log::warn!("No container registry reachable; treating host as air-gapped");
        true
    }

    async fn info_field(&self, caps: &CapabilityMatrix, template: &str) -> Option<String> {
        let inv = Invocation::new(caps.runtime_binary.clone(), self.info_timeout)
            .args(["info", "--format", template]);
        match self.runner.run(&inv).await {
            Ok(output) if output.success() => Some(output.stdout_trimmed().to_string()),
            _ => None,
        }
    }

    async fn succeeds(&self, inv: &Invocation) -> bool {
        matches!(self.runner.run(inv).await, Ok(output) if output.success())
    }

    /// Docker installed, socket present but inaccessible, and the user is listed in
    /// the socket's group without the current session carrying that group.
    #[cfg(unix)]
    fn relogin_hint(&self) -> Option<DetectError> {
        use nix::unistd::{AccessFlags, access};
        use std::os::unix::fs::MetadataExt;
        use users::os::unix::GroupExt;

        self.runner.locate(RuntimeKind::Docker.binary_name())?;
        let socket = Path::new(DOCKER_SOCKET);
        let metadata = std::fs::metadata(socket).ok()?;
        if access(socket, AccessFlags::R_OK | AccessFlags::W_OK).is_ok() {
            return None;
        }

        let group = users::get_group_by_gid(metadata.gid())?;
        let user = users::get_user_by_uid(users::get_current_uid())?;
        let user_name = user.name().to_string_lossy().into_owned();
        let listed = group
            .members()
            .iter()
            .any(|m| m.to_string_lossy() == user_name);
        let active = users::group_access_list()
            .map(|groups| groups.iter().any(|g| g.gid() == metadata.gid()))
            .unwrap_or(false);

        if listed && !active {
            Some(DetectError::ReloginRequired {
                user: user_name,
                group: group.name().to_string_lossy().into_owned(),
            })
        } else {
            None
        }
    }
}

/// Well-known API socket for a runtime.
fn socket_path(runtime: RuntimeKind) -> Option<PathBuf> {
    match runtime {
        RuntimeKind::Docker => Some(PathBuf::from(DOCKER_SOCKET)),
        RuntimeKind::Podman => {
            #[cfg(unix)]
            {
                if users::get_current_uid() != 0 {
                    let runtime_dir = std::env::var_os("XDG_RUNTIME_DIR")
                        .map(PathBuf::from)
                        .unwrap_or_else(|| {
                            PathBuf::from(format!("/run/user/{}", users::get_current_uid()))
                        });
                    return Some(runtime_dir.join("podman").join("podman.sock"));
                }
            }
            Some(PathBuf::from(PODMAN_ROOTFUL_SOCKET))
        }
    }
}

#[cfg(unix)]
fn socket_owned_by_invoking_user(socket: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    let uid = users::get_current_uid();
    uid != 0
        && std::fs::metadata(socket)
            .map(|m| m.uid() == uid)
            .unwrap_or(false)
}

#[cfg(not(unix))]
fn socket_owned_by_invoking_user(_socket: &Path) -> bool {
    false
}
