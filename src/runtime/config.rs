//! Runtime invocation timeouts and well-known locations.

use std::time::Duration;

/// Timeout for `docker info` / `podman info` (5 seconds)
/// Quick daemon availability check shouldn't take long
pub const RUNTIME_INFO_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for capability probes (`config -q`, `--help`, `version`)
pub const CAPABILITY_PROBE_TIMEOUT: Duration = Duration::from_secs(15);

/// Timeout for read-only compose queries (`ps`, `config --services`, `inspect`)
pub const COMPOSE_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for `compose pull` (30 minutes)
/// Search-platform images are large and registries can be slow
pub const COMPOSE_PULL_TIMEOUT: Duration = Duration::from_secs(1800);

/// Timeout for `compose up -d` (20 minutes)
pub const COMPOSE_UP_TIMEOUT: Duration = Duration::from_secs(1200);

/// Timeout for `compose down` (5 minutes)
pub const COMPOSE_DOWN_TIMEOUT: Duration = Duration::from_secs(300);

/// Timeout for `compose exec` during post-configuration (2 minutes)
pub const COMPOSE_EXEC_TIMEOUT: Duration = Duration::from_secs(120);

/// Timeout for `compose logs`
pub const COMPOSE_LOGS_TIMEOUT: Duration = Duration::from_secs(60);

/// Timeout for `save`/`load` of image archives (60 minutes)
pub const IMAGE_ARCHIVE_TIMEOUT: Duration = Duration::from_secs(3600);

/// Timeout for a single `pull` of one image during bundle builds (30 minutes)
pub const IMAGE_PULL_TIMEOUT: Duration = Duration::from_secs(1800);

/// Timeout for registry reachability probes
pub const REGISTRY_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Registries whose reachability decides whether the host is air-gapped
pub const REGISTRY_ENDPOINTS: &[&str] = &["https://registry-1.docker.io/v2/", "https://quay.io/v2/"];

/// Docker daemon socket
pub const DOCKER_SOCKET: &str = "/var/run/docker.sock";

/// Rootful Podman API socket
pub const PODMAN_ROOTFUL_SOCKET: &str = "/run/podman/podman.sock";

/// Platform-specific Docker startup instructions
#[cfg(target_os = "macos")]
pub const DOCKER_START_HELP: &str = "Start Docker Desktop from Applications or Spotlight";

#[cfg(not(target_os = "macos"))]
pub const DOCKER_START_HELP: &str = "Start Docker daemon: sudo systemctl start docker";
