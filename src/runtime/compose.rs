//! Compose strategy object.
//!
//! One [`ComposeHandle`] hides the differences between `podman compose`,
//! `docker compose` and the standalone v1 binaries behind `up`, `down`, `ps`,
//! `logs` and `config_services`. Callers never branch on the runtime.

use super::capabilities::{CapabilityMatrix, RuntimeKind};
use super::config::{
    COMPOSE_DOWN_TIMEOUT, COMPOSE_EXEC_TIMEOUT, COMPOSE_LOGS_TIMEOUT, COMPOSE_PULL_TIMEOUT,
    COMPOSE_QUERY_TIMEOUT, COMPOSE_UP_TIMEOUT,
};
use super::exec::{CommandOutput, ExecError, Invocation, ProcessRunner};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Template passed to `<runtime> inspect` to read lifecycle and health in one call.
const STATE_FORMAT: &str = "{{.State.Status}}|{{if .State.Health}}{{.State.Health.Status}}{{end}}";

/// Compose command failures.
#[derive(Error, Debug)]
pub enum ComposeError {
    /// The compose command ran and exited non-zero
    #[error("compose {action} failed (exit code {}){}", exit_code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string()), stderr_excerpt(stderr))]
    Failed {
        /// Compose action (`up`, `pull`, `config`...)
        action: String,
        /// Exit code, if any
        exit_code: Option<i32>,
        /// Captured stderr, for operator diagnostics only
        stderr: String,
    },

    /// The compose document was rejected by `config`
    #[error("compose document rejected by `config`{}", stderr_excerpt(stderr))]
    InvalidDocument {
        /// Captured stderr, for operator diagnostics only
        stderr: String,
    },

    /// Process invocation failed
    #[error(transparent)]
    Exec(#[from] ExecError),
}

impl ComposeError {
    /// Structural errors (bad document) are never retried.
    pub fn is_structural(&self) -> bool {
        matches!(self, ComposeError::InvalidDocument { .. })
    }

    /// Transient failures: timeouts and non-zero exits of operational commands.
    pub fn is_transient(&self) -> bool {
        match self {
            ComposeError::Failed { .. } => true,
            ComposeError::Exec(e) => e.is_timeout(),
            ComposeError::InvalidDocument { .. } => false,
        }
    }
}

fn stderr_excerpt(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    let tail: Vec<&str> = trimmed.lines().rev().take(5).collect();
    let tail: Vec<&str> = tail.into_iter().rev().collect();
    format!(":\n{}", tail.join("\n"))
}

/// Files and naming of one compose project on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeProject {
    /// Project directory (compose working directory)
    pub dir: PathBuf,
    /// Compose project name (`-p`)
    pub name: String,
    /// Compose document path
    pub compose_file: PathBuf,
    /// Companion environment file
    pub env_file: PathBuf,
    /// Profile to activate, when the document uses profiles
    pub profile: Option<String>,
}

/// Runtime-agnostic compose operations for one project.
pub struct ComposeHandle<'r, R: ProcessRunner> {
    runner: &'r R,
    runtime: RuntimeKind,
    runtime_binary: PathBuf,
    program: PathBuf,
    base_args: Vec<String>,
    project: ComposeProject,
}

impl<'r, R: ProcessRunner> ComposeHandle<'r, R> {
    /// Creates a handle bound to the detected runtime and a project.
    pub fn new(runner: &'r R, caps: &CapabilityMatrix, project: ComposeProject) -> Self {
        let (program, base_args) = caps.compose_command();
        Self {
            runner,
            runtime: caps.runtime,
            runtime_binary: caps.runtime_binary.clone(),
            program,
            base_args,
            project,
        }
    }

    /// Project this handle operates on.
    pub fn project(&self) -> &ComposeProject {
        &self.project
    }

    /// Runtime family behind this handle.
    pub fn runtime(&self) -> RuntimeKind {
        self.runtime
    }

    fn compose(&self, timeout: Duration) -> Invocation {
        let mut inv = Invocation::new(self.program.clone(), timeout)
            .args(self.base_args.iter().cloned())
            .args([
                "-p".to_string(),
                self.project.name.clone(),
                "-f".to_string(),
                self.project.compose_file.display().to_string(),
            ])
            .current_dir(self.project.dir.clone());
        if self.project.env_file.exists() {
            inv = inv
                .arg("--env-file")
                .arg(self.project.env_file.display().to_string());
        }
        if let Some(profile) = &self.project.profile {
            inv = inv.arg("--profile").arg(profile.clone());
        }
        inv
    }

    async fn checked(&self, action: &str, inv: Invocation) -> Result<CommandOutput, ComposeError> {
        let output = self.runner.run(&inv).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(ComposeError::Failed {
                action: action.to_string(),
                exit_code: output.exit_code,
                stderr: output.stderr,
            })
        }
    }

    /// `config -q`: validates the document without touching containers.
    pub async fn validate(&self) -> Result<(), ComposeError> {
        let inv = self.compose(COMPOSE_QUERY_TIMEOUT).args(["config", "-q"]);
        let output = self.runner.run(&inv).await?;
        if output.success() {
            Ok(())
        } else {
            Err(ComposeError::InvalidDocument {
                stderr: output.stderr,
            })
        }
    }

    /// `config --services`: services the runtime sees for the active profile.
    pub async fn config_services(&self) -> Result<Vec<String>, ComposeError> {
        let inv = self.compose(COMPOSE_QUERY_TIMEOUT).args(["config", "--services"]);
        let output = self.checked("config", inv).await?;
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    /// `pull`: fetches every image the active services need.
    pub async fn pull(&self) -> Result<(), ComposeError> {
        let inv = self.compose(COMPOSE_PULL_TIMEOUT).arg("pull");
        self.checked("pull", inv).await.map(|_| ())
    }

    /// `up -d --remove-orphans`: start order is left to the runtime's dependency resolution.
    pub async fn up(&self) -> Result<(), ComposeError> {
        let inv = self
            .compose(COMPOSE_UP_TIMEOUT)
            .args(["up", "-d", "--remove-orphans"]);
        self.checked("up", inv).await.map(|_| ())
    }

    /// `down --remove-orphans`, optionally removing named volumes.
    pub async fn down(&self, remove_volumes: bool) -> Result<(), ComposeError> {
        let mut inv = self
            .compose(COMPOSE_DOWN_TIMEOUT)
            .args(["down", "--remove-orphans"]);
        if remove_volumes {
            inv = inv.arg("-v");
        }
        self.checked("down", inv).await.map(|_| ())
    }

    /// `ps -q <service>`: container IDs backing a service.
    pub async fn ps(&self, service: &str) -> Result<Vec<String>, ComposeError> {
        let inv = self
            .compose(COMPOSE_QUERY_TIMEOUT)
            .args(["ps", "-q", service]);
        let output = self.checked("ps", inv).await?;
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    /// `logs --no-color --tail N [service]`.
    pub async fn logs(&self, service: Option<&str>, tail: u32) -> Result<String, ComposeError> {
        let mut inv = self
            .compose(COMPOSE_LOGS_TIMEOUT)
            .args(["logs", "--no-color", "--tail"])
            .arg(tail.to_string());
        if let Some(service) = service {
            inv = inv.arg(service);
        }
        let output = self.checked("logs", inv).await?;
        Ok(output.stdout)
    }

    /// `exec -T <service> <argv...>`. The exit code is returned for the caller to interpret.
    pub async fn exec(&self, service: &str, argv: &[String]) -> Result<CommandOutput, ComposeError> {
        let inv = self
            .compose(COMPOSE_EXEC_TIMEOUT)
            .args(["exec", "-T", service])
            .args(argv.iter().cloned());
        Ok(self.runner.run(&inv).await?)
    }

    /// Lifecycle and health state of one container as `(status, health)`.
    ///
    /// `health` is empty when the container has no health probe.
    pub async fn inspect_state(&self, container_id: &str) -> Result<(String, String), ComposeError> {
        let inv = Invocation::new(self.runtime_binary.clone(), COMPOSE_QUERY_TIMEOUT)
            .args(["inspect", "--format", STATE_FORMAT, container_id]);
        let output = self.checked("inspect", inv).await?;
        let line = output.stdout_trimmed();
        let (status, health) = line.split_once('|').unwrap_or((line, ""));
        Ok((status.trim().to_string(), health.trim().to_string()))
    }
}
