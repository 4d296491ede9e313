//! Post-readiness configuration: idempotent index creation.
//!
//! Runs a small shell script inside the elected container through
//! `compose exec`. The admin password is read from the container's own
//! environment or secret mount, never passed on the command line.

use crate::retry::{RetryConfig, with_retry};
use crate::runtime::{ComposeError, ComposeHandle, ProcessRunner};
use crate::topology::IndexName;
use thiserror::Error;

/// Exit code used by the scripts when the management API is not up yet.
const EXIT_NOT_READY: i32 = 75;
/// Exit code used by the lookup script when the index does not exist.
const EXIT_ABSENT: i32 = 3;

const CREDENTIALS_PRELUDE: &str = r#"set -u
user="${SPLUNK_ADMIN_USER:-admin}"
pw="${SPLUNK_PASSWORD:-}"
if [ -z "$pw" ] && [ -r /run/secrets/splunk_password ]; then pw="$(cat /run/secrets/splunk_password)"; fi
base="https://localhost:8089"
"#;

const LOOKUP_SCRIPT: &str = r#"code="$(curl -sk -o /dev/null -w '%{http_code}' -u "$user:$pw" "$base/services/data/indexes/$1")" || exit 75
case "$code" in
  200) exit 0 ;;
  404) exit 3 ;;
  000|5*) exit 75 ;;
  *) exit 2 ;;
esac
"#;

const CREATE_SCRIPT: &str = r#"code="$(curl -sk -o /dev/null -w '%{http_code}' -u "$user:$pw" -d "name=$1" "$base/services/data/indexes")" || exit 75
case "$code" in
  201|409) exit 0 ;;
  000|5*) exit 75 ;;
  *) exit 2 ;;
esac
"#;

/// Result of [`ensure_index`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    Created,
    AlreadyExists,
}

/// Post-configuration failures.
#[derive(Error, Debug)]
pub enum PostConfigError {
    /// The service's management API did not answer yet
    #[error("{service} is not ready to accept configuration")]
    NotReady { service: String },

    /// The script ran and failed
    #[error("{action} on {service} failed with exit code {}", exit_code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string()))]
    Failed {
        service: String,
        action: &'static str,
        exit_code: Option<i32>,
    },

    #[error(transparent)]
    Compose(#[from] ComposeError),
}

impl PostConfigError {
    pub fn is_retryable(&self) -> bool {
        match self {
            PostConfigError::NotReady { .. } => true,
            // `compose exec` exits non-zero while the container is still starting
            PostConfigError::Failed { exit_code, .. } => *exit_code != Some(2),
            PostConfigError::Compose(e) => e.is_transient(),
        }
    }
}

/// Instances consulted for index creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexTargets {
    /// Authoritative instance
    pub primary: String,
    /// Also queried; disagreement is logged
    pub secondary: Option<String>,
}

impl IndexTargets {
    /// Cluster-master is authoritative when present; indexer-1 is consulted as well.
    pub fn elect(services: &[String]) -> Self {
        let has = |name: &str| services.iter().any(|s| s == name);
        if has("cluster-master") {
            Self {
                primary: "cluster-master".to_string(),
                secondary: has("indexer-1").then(|| "indexer-1".to_string()),
            }
        } else {
            Self {
                primary: "indexer-1".to_string(),
                secondary: None,
            }
        }
    }
}

/// Creates `index` unless it already exists. Calling it twice is a no-op the second time.
pub async fn ensure_index<R: ProcessRunner>(
    compose: &ComposeHandle<'_, R>,
    targets: &IndexTargets,
    index: &IndexName,
    retry: RetryConfig,
) -> Result<IndexOutcome, PostConfigError> {
    let primary = targets.primary.as_str();
    let exists = with_retry(retry, "index lookup", PostConfigError::is_retryable, |_| {
        index_exists(compose, primary, index)
    })
    .await?;

    if let Some(secondary) = &targets.secondary {
        match index_exists(compose, secondary, index).await {
            Ok(found) if found != exists => log::warn!(
                "{} and {} disagree on whether index '{}' exists; {} is authoritative",
                primary,
                secondary,
                index,
                primary
            ),
            Ok(_) => {}
            Err(e) => log::debug!("Could not query {} for index '{}': {}", secondary, index, e),
        }
    }

    if exists {
        log::info!("Index '{}' already exists on {}; nothing to do", index, primary);
        return Ok(IndexOutcome::AlreadyExists);
    }

    with_retry(retry, "index creation", PostConfigError::is_retryable, |_| {
        create_index(compose, primary, index)
    })
    .await?;
    log::info!("✓ Created index '{}' on {}", index, primary);
    Ok(IndexOutcome::Created)
}

async fn index_exists<R: ProcessRunner>(
    compose: &ComposeHandle<'_, R>,
    service: &str,
    index: &IndexName,
) -> Result<bool, PostConfigError> {
    let output = compose
        .exec(service, &script_argv(LOOKUP_SCRIPT, index))
        .await?;
    match output.exit_code {
        Some(0) => Ok(true),
        Some(EXIT_ABSENT) => Ok(false),
        Some(EXIT_NOT_READY) => Err(PostConfigError::NotReady {
            service: service.to_string(),
        }),
        exit_code => Err(PostConfigError::Failed {
            service: service.to_string(),
            action: "index lookup",
            exit_code,
        }),
    }
}

async fn create_index<R: ProcessRunner>(
    compose: &ComposeHandle<'_, R>,
    service: &str,
    index: &IndexName,
) -> Result<(), PostConfigError> {
    let output = compose
        .exec(service, &script_argv(CREATE_SCRIPT, index))
        .await?;
    match output.exit_code {
        Some(0) => Ok(()),
        Some(EXIT_NOT_READY) => Err(PostConfigError::NotReady {
            service: service.to_string(),
        }),
        exit_code => Err(PostConfigError::Failed {
            service: service.to_string(),
            action: "index creation",
            exit_code,
        }),
    }
}

/// `sh -c <script> sh <index>`: the index name is a positional argument, never interpolated.
fn script_argv(body: &str, index: &IndexName) -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!("{CREDENTIALS_PRELUDE}{body}"),
        "sh".to_string(),
        index.as_str().to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_master_is_authoritative() {
        let services = vec![
            "cluster-master".to_string(),
            "indexer-1".to_string(),
            "indexer-2".to_string(),
        ];
        let targets = IndexTargets::elect(&services);
        assert_eq!(targets.primary, "cluster-master");
        assert_eq!(targets.secondary.as_deref(), Some("indexer-1"));

        let single = IndexTargets::elect(&["indexer-1".to_string()]);
        assert_eq!(single.primary, "indexer-1");
        assert!(single.secondary.is_none());
    }

    #[test]
    fn index_name_is_positional() {
        let index = IndexName::parse("app_logs").unwrap();
        let argv = script_argv(LOOKUP_SCRIPT, &index);
        assert_eq!(argv.last().map(String::as_str), Some("app_logs"));
        assert!(!argv[2].contains("app_logs"));
    }

    #[test]
    fn bad_request_is_not_retried() {
        let err = PostConfigError::Failed {
            service: "indexer-1".to_string(),
            action: "index creation",
            exit_code: Some(2),
        };
        assert!(!err.is_retryable());
        assert!(PostConfigError::NotReady {
            service: "indexer-1".to_string()
        }
        .is_retryable());
    }
}
