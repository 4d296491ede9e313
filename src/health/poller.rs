//! Readiness poller.
//!
//! Each tick inspects every watched container and, when configured, probes
//! the management endpoint of the admin service. Polling stops on readiness,
//! on the deadline, or when the cancellation token fires.

use super::probe::{HttpManagementProbe, ManagementProbe};
use super::{HealthSnapshot, HealthState, LifecycleState, PollError, ServiceHealth};
use crate::runtime::{ComposeHandle, ProcessRunner};
use chrono::Utc;
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

struct ManagementTarget<P> {
    service: String,
    port: u16,
    probe: P,
}

/// Polls compose services until all are ready.
pub struct ReadinessPoller<'a, 'r, R: ProcessRunner, P: ManagementProbe = HttpManagementProbe> {
    compose: &'a ComposeHandle<'r, R>,
    cancel: CancellationToken,
    exempt: BTreeSet<String>,
    management: Option<ManagementTarget<P>>,
}

impl<'a, 'r, R: ProcessRunner> ReadinessPoller<'a, 'r, R> {
    pub fn new(compose: &'a ComposeHandle<'r, R>, cancel: CancellationToken) -> Self {
        Self {
            compose,
            cancel,
            exempt: BTreeSet::new(),
            management: None,
        }
    }
}

impl<'a, 'r, R: ProcessRunner, P: ManagementProbe> ReadinessPoller<'a, 'r, R, P> {
    /// Also requires `service` to answer on host port `port`.
    pub fn with_management<Q: ManagementProbe>(
        self,
        service: impl Into<String>,
        port: u16,
        probe: Q,
    ) -> ReadinessPoller<'a, 'r, R, Q> {
        ReadinessPoller {
            compose: self.compose,
            cancel: self.cancel,
            exempt: self.exempt,
            management: Some(ManagementTarget {
                service: service.into(),
                port,
                probe,
            }),
        }
    }

    /// Services judged by running state alone.
    pub fn with_exempt(mut self, exempt: impl IntoIterator<Item = String>) -> Self {
        self.exempt.extend(exempt);
        self
    }

    /// One tick: the current state of every service.
    pub async fn snapshot(&self, services: &[String]) -> HealthSnapshot {
        let mut snapshot = HealthSnapshot::default();
        for service in services {
            let health = self.check_service(service).await;
            snapshot.services.insert(service.clone(), health);
        }
        if let Some(target) = &self.management {
            snapshot.admin_service = Some(target.service.clone());
            snapshot.management = Some(target.probe.check(target.port).await);
        }
        snapshot
    }

    async fn check_service(&self, service: &str) -> ServiceHealth {
        let health_exempt = self.exempt.contains(service);
        let missing = |state: LifecycleState| ServiceHealth {
            container_id: None,
            lifecycle_state: state,
            health_state: HealthState::None,
            last_checked_at: Utc::now(),
            health_exempt,
        };

        let ids = match self.compose.ps(service).await {
            Ok(ids) => ids,
            Err(e) => {
                log::debug!("ps {} failed: {}", service, e);
                return missing(LifecycleState::Unknown("ps failed".to_string()));
            }
        };
        let Some(id) = ids.into_iter().next() else {
            return missing(LifecycleState::Missing);
        };

        match self.compose.inspect_state(&id).await {
            Ok((status, health)) => ServiceHealth {
                container_id: Some(id),
                lifecycle_state: LifecycleState::parse(&status),
                health_state: HealthState::parse(&health),
                last_checked_at: Utc::now(),
                health_exempt,
            },
            Err(e) => {
                log::debug!("inspect {} failed: {}", id, e);
                ServiceHealth {
                    container_id: Some(id),
                    ..missing(LifecycleState::Unknown("inspect failed".to_string()))
                }
            }
        }
    }

    /// Polls every `interval` until all `services` are ready or `timeout` elapses.
    ///
    /// A tick still in flight at the deadline is abandoned, so a wedged runtime
    /// cannot hold the poll past `timeout`.
    pub async fn poll_until_ready(
        &self,
        services: &[String],
        timeout: Duration,
        interval: Duration,
    ) -> Result<HealthSnapshot, PollError> {
        let started = Instant::now();
        let deadline = started + timeout;
        let mut last = HealthSnapshot::default();

        loop {
            let snapshot = tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Err(PollError::Cancelled { snapshot: Box::new(last) });
                }
                _ = tokio::time::sleep_until(deadline) => {
                    log::debug!("Deadline reached during a readiness check");
                    let snapshot = self.unanswered(last, services);
                    return Err(PollError::Timeout {
                        not_ready: snapshot.not_ready(),
                        snapshot: Box::new(snapshot),
                        waited: started.elapsed(),
                    });
                }
                snapshot = self.snapshot(services) => snapshot,
            };

            let not_ready = snapshot.not_ready();
            if not_ready.is_empty() {
                log::info!(
                    "✓ All {} services ready after {}s",
                    services.len(),
                    started.elapsed().as_secs()
                );
                return Ok(snapshot);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(PollError::Timeout {
                    snapshot: Box::new(snapshot),
                    not_ready,
                    waited: now - started,
                });
            }
            log::debug!("Waiting on: {}", not_ready.join(", "));

            let pause = interval.min(deadline - now);
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Err(PollError::Cancelled { snapshot: Box::new(snapshot) });
                }
                _ = tokio::time::sleep(pause) => {}
            }
            last = snapshot;
        }
    }

    /// `last` with every service it has no answer for marked unknown.
    fn unanswered(&self, mut last: HealthSnapshot, services: &[String]) -> HealthSnapshot {
        for service in services {
            last.services
                .entry(service.clone())
                .or_insert_with(|| ServiceHealth {
                    container_id: None,
                    lifecycle_state: LifecycleState::Unknown("no answer".to_string()),
                    health_state: HealthState::None,
                    last_checked_at: Utc::now(),
                    health_exempt: self.exempt.contains(service),
                });
        }
        if let Some(target) = &self.management {
            last.admin_service = Some(target.service.clone());
        }
        last
    }
}
