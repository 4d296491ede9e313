//! Management endpoint probe.

use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::time::Duration;

/// Path probed on the management port.
pub const MANAGEMENT_PATH: &str = "/services/server/info";

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of one management probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum EndpointStatus {
    /// 2xx, 401 or 403: the service is up, auth notwithstanding
    Answering { status: u16 },
    /// Any other HTTP status
    Rejected { status: u16 },
    /// Connection, TLS or timeout failure
    Unreachable { reason: String },
}

impl EndpointStatus {
    /// Classifies an HTTP status code.
    pub fn from_status(status: u16) -> Self {
        if (200..300).contains(&status) || status == 401 || status == 403 {
            EndpointStatus::Answering { status }
        } else {
            EndpointStatus::Rejected { status }
        }
    }

    pub fn is_answering(&self) -> bool {
        matches!(self, EndpointStatus::Answering { .. })
    }
}

impl fmt::Display for EndpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointStatus::Answering { status } => write!(f, "answering (HTTP {status})"),
            EndpointStatus::Rejected { status } => write!(f, "rejected (HTTP {status})"),
            EndpointStatus::Unreachable { reason } => write!(f, "unreachable ({reason})"),
        }
    }
}

/// Checks whether the management endpoint on a host port answers.
pub trait ManagementProbe: Send + Sync {
    fn check(&self, port: u16) -> impl Future<Output = EndpointStatus> + Send;
}

impl<P: ManagementProbe> ManagementProbe for &P {
    fn check(&self, port: u16) -> impl Future<Output = EndpointStatus> + Send {
        (**self).check(port)
    }
}

/// HTTPS probe against `127.0.0.1`. Certificate verification is disabled:
/// a freshly bootstrapped cluster only has its self-signed certificate.
#[derive(Debug, Clone)]
pub struct HttpManagementProbe {
    client: reqwest::Client,
    host: String,
}

impl HttpManagementProbe {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(PROBE_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            host: "127.0.0.1".to_string(),
        })
    }

    fn url(&self, port: u16) -> String {
        format!("https://{}:{}{}", self.host, port, MANAGEMENT_PATH)
    }
}

impl ManagementProbe for HttpManagementProbe {
    async fn check(&self, port: u16) -> EndpointStatus {
        let url = self.url(port);
        match self.client.get(&url).send().await {
            Ok(response) => {
                let status = EndpointStatus::from_status(response.status().as_u16());
                log::debug!("Management probe {} -> {}", url, status);
                status
            }
            Err(e) => {
                log::debug!("Management probe {} failed: {}", url, e);
                let reason = if e.is_timeout() {
                    "timed out".to_string()
                } else if e.is_connect() {
                    "connection failed".to_string()
                } else {
                    "request failed".to_string()
                };
                EndpointStatus::Unreachable { reason }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failures_count_as_answering() {
        assert!(EndpointStatus::from_status(200).is_answering());
        assert!(EndpointStatus::from_status(401).is_answering());
        assert!(EndpointStatus::from_status(403).is_answering());
        assert!(!EndpointStatus::from_status(404).is_answering());
        assert!(!EndpointStatus::from_status(503).is_answering());
    }

    #[tokio::test]
    async fn closed_port_is_unreachable() {
        let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let probe = HttpManagementProbe::new().unwrap();
        let status = probe.check(port).await;
        assert!(matches!(status, EndpointStatus::Unreachable { .. }));
    }
}
