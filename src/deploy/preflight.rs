//! Host pre-flight checks. Nothing here has side effects beyond the lock file.

use super::record::DeploymentRecord;
use crate::topology::TopologySpec;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::time::Duration;
use sysinfo::Disks;
use thiserror::Error;

const GB: u64 = 1024 * 1024 * 1024;

/// Pre-flight failures. All of them abort before any side effect.
#[derive(Error, Debug)]
pub enum PreflightError {
    #[error("insufficient disk space on {}: {available_gb} GB available, {required_gb} GB required", path.display())]
    InsufficientDisk {
        path: PathBuf,
        available_gb: u64,
        required_gb: u64,
    },

    #[error("port {port} is already in use: {reason}")]
    PortInUse { port: u16, reason: String },

    #[error("a deployment already exists (id {deployment_id}, {size_class}); refusing to replace it without --force")]
    AlreadyDeployed {
        deployment_id: String,
        size_class: String,
    },

    #[error("another deployment holds {} (waited {}s)", path.display(), waited.as_secs())]
    Locked { path: PathBuf, waited: Duration },

    #[error("cannot use lock file {}: {source}", path.display())]
    LockIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// What pre-flight checks and how strictly.
#[derive(Debug, Clone, Default)]
pub struct PreflightOptions {
    /// Replace an existing deployment
    pub force: bool,
    /// Overrides the size-class disk minimum, in GB
    pub min_disk_gb: Option<u64>,
    /// Skip the port probe
    pub skip_port_check: bool,
}

/// Runs the disk, port and record checks in that order.
pub fn run_checks(
    project_dir: &Path,
    spec: &TopologySpec,
    existing: Option<&DeploymentRecord>,
    options: &PreflightOptions,
) -> Result<(), PreflightError> {
    if let Some(record) = existing {
        if !options.force {
            return Err(PreflightError::AlreadyDeployed {
                deployment_id: record.deployment_id.to_string(),
                size_class: record.size_class.to_string(),
            });
        }
        log::warn!(
            "Replacing existing deployment {} because --force was given",
            record.deployment_id
        );
    }

    let required_gb = options
        .min_disk_gb
        .unwrap_or_else(|| spec.size_class.min_disk_gb());
    check_disk_space(project_dir, required_gb)?;

    // A forced redeploy reuses ports held by the running stack
    if options.skip_port_check || existing.is_some() {
        log::debug!("Skipping port availability check");
    } else {
        for port in spec.planned_host_ports() {
            check_port_free(port)?;
        }
    }
    Ok(())
}

/// Verifies the filesystem holding `path` has at least `required_gb` free.
pub fn check_disk_space(path: &Path, required_gb: u64) -> Result<(), PreflightError> {
    let target = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let disks = Disks::new_with_refreshed_list();

    // Longest mount point that prefixes the target
    let disk = disks
        .list()
        .iter()
        .filter(|d| target.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len());

    let Some(disk) = disk else {
        log::warn!(
            "Could not determine the filesystem for {}; skipping disk space check",
            target.display()
        );
        return Ok(());
    };

    let available_gb = disk.available_space() / GB;
    log::debug!(
        "{} GB available on {} (need {} GB)",
        available_gb,
        disk.mount_point().display(),
        required_gb
    );
    if available_gb < required_gb {
        return Err(PreflightError::InsufficientDisk {
            path: target,
            available_gb,
            required_gb,
        });
    }
    Ok(())
}

/// Binds and releases `port` on all interfaces.
pub fn check_port_free(port: u16) -> Result<(), PreflightError> {
    match TcpListener::bind(("0.0.0.0", port)) {
        Ok(listener) => {
            drop(listener);
            Ok(())
        }
        Err(e) => Err(PreflightError::PortInUse {
            port,
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::SizeClass;

    #[test]
    fn bound_port_is_reported() {
        let listener = TcpListener::bind(("0.0.0.0", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(matches!(
            check_port_free(port),
            Err(PreflightError::PortInUse { port: p, .. }) if p == port
        ));
    }

    #[test]
    fn impossible_disk_requirement_fails_or_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        // Either the mount is found (and u64::MAX GB is never free) or the check is skipped
        match check_disk_space(dir.path(), u64::MAX) {
            Ok(()) => {}
            Err(PreflightError::InsufficientDisk { required_gb, .. }) => {
                assert_eq!(required_gb, u64::MAX)
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn existing_record_requires_force() {
        let dir = tempfile::tempdir().unwrap();
        let spec = TopologySpec::for_class(SizeClass::Small);
        let record = DeploymentRecord::new(&spec, vec!["docker-compose.yml".into()], "podman");
        let options = PreflightOptions {
            min_disk_gb: Some(0),
            ..Default::default()
        };
        assert!(matches!(
            run_checks(dir.path(), &spec, Some(&record), &options),
            Err(PreflightError::AlreadyDeployed { .. })
        ));

        let forced = PreflightOptions {
            force: true,
            min_disk_gb: Some(0),
            ..Default::default()
        };
        run_checks(dir.path(), &spec, Some(&record), &forced).unwrap();
    }
}
