//! Exclusive project lock.
//!
//! One deployment at a time per project directory. The lock is an advisory
//! `flock` on `.deploy.lock`, taken with a bounded wait and released when the
//! guard drops, on every exit path.

use super::PreflightError;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Default wait for a competing deployment to finish.
pub const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(30);

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Held project lock.
pub struct ProjectLock {
    path: PathBuf,
    #[cfg(unix)]
    _guard: nix::fcntl::Flock<File>,
    #[cfg(not(unix))]
    _file: File,
}

impl ProjectLock {
    /// Acquires the lock, waiting up to `wait` for another holder to release it.
    pub async fn acquire(path: &Path, wait: Duration) -> Result<Self, PreflightError> {
        let deadline = Instant::now() + wait;
        let mut file = open_lock_file(path)?;

        loop {
            match try_lock(file) {
                Ok(lock) => {
                    log::debug!("Acquired project lock {}", path.display());
                    return Ok(lock.into_project_lock(path));
                }
                Err(LockAttempt::Busy(returned)) => {
                    if Instant::now() >= deadline {
                        return Err(PreflightError::Locked {
                            path: path.to_path_buf(),
                            waited: wait,
                        });
                    }
                    file = returned;
                    tokio::time::sleep(LOCK_POLL_INTERVAL).await;
                }
                Err(LockAttempt::Failed(source)) => {
                    return Err(PreflightError::LockIo {
                        path: path.to_path_buf(),
                        source,
                    });
                }
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for ProjectLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectLock").field("path", &self.path).finish()
    }
}

impl Drop for ProjectLock {
    fn drop(&mut self) {
        log::debug!("Releasing project lock {}", self.path.display());
    }
}

fn open_lock_file(path: &Path) -> Result<File, PreflightError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| PreflightError::LockIo {
            path: path.to_path_buf(),
            source,
        })?;
    }
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
        .map_err(|source| PreflightError::LockIo {
            path: path.to_path_buf(),
            source,
        })
}

enum LockAttempt {
    Busy(File),
    Failed(std::io::Error),
}

#[cfg(unix)]
struct Locked(nix::fcntl::Flock<File>);

#[cfg(unix)]
fn try_lock(file: File) -> Result<Locked, LockAttempt> {
    use nix::errno::Errno;
    use nix::fcntl::{Flock, FlockArg};

    match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
        Ok(mut guard) => {
            // Holder pid, for operators inspecting a stuck lock
            let _ = guard.set_len(0);
            let _ = writeln!(&mut *guard, "{}", std::process::id());
            Ok(Locked(guard))
        }
        Err((file, errno)) if errno == Errno::EWOULDBLOCK => Err(LockAttempt::Busy(file)),
        Err((_, errno)) => Err(LockAttempt::Failed(std::io::Error::from(errno))),
    }
}

#[cfg(unix)]
impl Locked {
    fn into_project_lock(self, path: &Path) -> ProjectLock {
        ProjectLock {
            path: path.to_path_buf(),
            _guard: self.0,
        }
    }
}

#[cfg(not(unix))]
struct Locked(File);

#[cfg(not(unix))]
fn try_lock(mut file: File) -> Result<Locked, LockAttempt> {
    let _ = writeln!(file, "{}", std::process::id());
    Ok(Locked(file))
}

#[cfg(not(unix))]
impl Locked {
    fn into_project_lock(self, path: &Path) -> ProjectLock {
        ProjectLock {
            path: path.to_path_buf(),
            _file: self.0,
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_holder_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".deploy.lock");
        let first = ProjectLock::acquire(&path, Duration::from_secs(1)).await.unwrap();

        let started = Instant::now();
        let err = ProjectLock::acquire(&path, Duration::from_millis(300))
            .await
            .unwrap_err();
        assert!(matches!(err, PreflightError::Locked { .. }));
        assert!(started.elapsed() < Duration::from_secs(2));

        drop(first);
        ProjectLock::acquire(&path, Duration::from_millis(300))
            .await
            .unwrap();
    }
}
