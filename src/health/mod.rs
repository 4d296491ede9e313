//! Readiness and health polling.

pub mod poller;
pub mod probe;

pub use poller::ReadinessPoller;
pub use probe::{EndpointStatus, HttpManagementProbe, ManagementProbe};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Container lifecycle state as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Created,
    Running,
    Restarting,
    Paused,
    Exited,
    Dead,
    /// No container exists for the service
    Missing,
    Unknown(String),
}

impl LifecycleState {
    pub fn parse(status: &str) -> Self {
        match status.trim().to_ascii_lowercase().as_str() {
            "created" | "configured" | "initialized" => LifecycleState::Created,
            "running" => LifecycleState::Running,
            "restarting" => LifecycleState::Restarting,
            "paused" => LifecycleState::Paused,
            "exited" | "stopped" => LifecycleState::Exited,
            "dead" | "removing" => LifecycleState::Dead,
            "" => LifecycleState::Missing,
            other => LifecycleState::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Created => f.write_str("created"),
            LifecycleState::Running => f.write_str("running"),
            LifecycleState::Restarting => f.write_str("restarting"),
            LifecycleState::Paused => f.write_str("paused"),
            LifecycleState::Exited => f.write_str("exited"),
            LifecycleState::Dead => f.write_str("dead"),
            LifecycleState::Missing => f.write_str("missing"),
            LifecycleState::Unknown(s) => write!(f, "unknown ({s})"),
        }
    }
}

/// Result of the container's own health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Unhealthy,
    Starting,
    /// No health probe configured
    None,
}

impl HealthState {
    pub fn parse(health: &str) -> Self {
        match health.trim().to_ascii_lowercase().as_str() {
            "healthy" => HealthState::Healthy,
            "unhealthy" => HealthState::Unhealthy,
            "starting" => HealthState::Starting,
            _ => HealthState::None,
        }
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HealthState::Healthy => "healthy",
            HealthState::Unhealthy => "unhealthy",
            HealthState::Starting => "starting",
            HealthState::None => "no probe",
        })
    }
}

/// State of one service at one tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceHealth {
    pub container_id: Option<String>,
    pub lifecycle_state: LifecycleState,
    pub health_state: HealthState,
    pub last_checked_at: DateTime<Utc>,
    /// Readiness judged by running state alone
    pub health_exempt: bool,
}

impl ServiceHealth {
    /// Running, and healthy unless there is no probe or the service is exempt.
    pub fn is_ready(&self) -> bool {
        self.lifecycle_state == LifecycleState::Running
            && (self.health_exempt
                || matches!(self.health_state, HealthState::Healthy | HealthState::None))
    }
}

/// Every watched service at one tick. Recomputed each tick, never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    pub services: BTreeMap<String, ServiceHealth>,
    /// Service expected to answer the management endpoint
    pub admin_service: Option<String>,
    pub management: Option<EndpointStatus>,
}

impl HealthSnapshot {
    /// Services that are not ready, in name order.
    pub fn not_ready(&self) -> Vec<String> {
        let mut pending: BTreeSet<String> = self
            .services
            .iter()
            .filter(|(_, health)| !health.is_ready())
            .map(|(name, _)| name.clone())
            .collect();
        if let Some(admin) = &self.admin_service {
            let answering = self
                .management
                .as_ref()
                .map(EndpointStatus::is_answering)
                .unwrap_or(false);
            if !answering {
                pending.insert(admin.clone());
            }
        }
        pending.into_iter().collect()
    }

    pub fn is_ready(&self) -> bool {
        self.not_ready().is_empty()
    }

    /// One line per service for operator output.
    pub fn describe(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .services
            .iter()
            .map(|(name, h)| {
                format!(
                    "{}: {} / {}{}",
                    name,
                    h.lifecycle_state,
                    h.health_state,
                    if h.is_ready() { "" } else { "  (not ready)" }
                )
            })
            .collect();
        if let (Some(admin), Some(status)) = (&self.admin_service, &self.management) {
            lines.push(format!("{admin} management endpoint: {status}"));
        }
        lines
    }
}

/// Polling outcomes other than readiness.
#[derive(Error, Debug)]
pub enum PollError {
    /// Deadline elapsed; every failing service is listed
    #[error("services not ready after {}s: {}", waited.as_secs(), not_ready.join(", "))]
    Timeout {
        snapshot: Box<HealthSnapshot>,
        not_ready: Vec<String>,
        waited: Duration,
    },

    /// Interrupted by the operator
    #[error("readiness polling cancelled")]
    Cancelled { snapshot: Box<HealthSnapshot> },
}

impl PollError {
    /// Last snapshot taken before the poll stopped.
    pub fn snapshot(&self) -> &HealthSnapshot {
        match self {
            PollError::Timeout { snapshot, .. } | PollError::Cancelled { snapshot } => snapshot,
        }
    }
}
