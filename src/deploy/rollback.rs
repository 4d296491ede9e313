//! Compensating actions.
//!
//! Each resource created after the commit point registers its compensation
//! at creation time. Rollback runs them last-in first-out and keeps going when
//! one fails.

use crate::fs::{remove_dir_all_if_exists, remove_file_if_exists};
use crate::runtime::{ComposeHandle, ProcessRunner};
use std::path::{Path, PathBuf};

/// Suffix of backups taken before overwriting a project file.
const BACKUP_SUFFIX: &str = "rollback";

/// Undo action for one created resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compensation {
    /// File did not exist before this run
    RemoveFile { path: PathBuf },
    /// File existed; its previous content is in `backup`
    RestoreFile { path: PathBuf, backup: PathBuf },
    /// Directory did not exist before this run
    RemoveDir { path: PathBuf },
    /// Containers may have been started by this run
    ComposeDown,
}

impl Compensation {
    fn describe(&self) -> String {
        match self {
            Compensation::RemoveFile { path } => format!("remove {}", path.display()),
            Compensation::RestoreFile { path, .. } => format!("restore {}", path.display()),
            Compensation::RemoveDir { path } => format!("remove directory {}", path.display()),
            Compensation::ComposeDown => "stop containers started by this run".to_string(),
        }
    }
}

/// Outcome of a rollback.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackReport {
    /// Compensations that completed
    pub completed: Vec<String>,
    /// `(compensation, error)` for those that failed
    pub failed: Vec<(String, String)>,
}

impl RollbackReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// LIFO stack of compensations.
#[derive(Debug, Default)]
pub struct CompensationStack {
    actions: Vec<Compensation>,
}

impl CompensationStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, action: Compensation) {
        log::debug!("Registered compensation: {}", action.describe());
        self.actions.push(action);
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn actions(&self) -> &[Compensation] {
        &self.actions
    }

    /// Prepares an overwrite of `path`: backs up existing content and registers the undo.
    pub fn guard_file(&mut self, path: &Path) -> std::io::Result<()> {
        if path.exists() {
            let backup = backup_path(path);
            std::fs::copy(path, &backup)?;
            self.push(Compensation::RestoreFile {
                path: path.to_path_buf(),
                backup,
            });
        } else {
            self.push(Compensation::RemoveFile {
                path: path.to_path_buf(),
            });
        }
        Ok(())
    }

    /// Creates `path` through `create` and registers its removal if it was new.
    pub fn guard_dir(&mut self, path: &Path, create: impl FnOnce(&Path) -> std::io::Result<()>) -> std::io::Result<()> {
        let existed = path.exists();
        create(path)?;
        if !existed {
            self.push(Compensation::RemoveDir {
                path: path.to_path_buf(),
            });
        }
        Ok(())
    }

    /// Runs every compensation in reverse registration order.
    pub async fn rollback<R: ProcessRunner>(
        &mut self,
        compose: Option<&ComposeHandle<'_, R>>,
    ) -> RollbackReport {
        let mut report = RollbackReport::default();
        while let Some(action) = self.actions.pop() {
            let description = action.describe();
            log::info!("Rolling back: {}", description);
            let result = match &action {
                Compensation::RemoveFile { path } => {
                    remove_file_if_exists(path).map_err(|e| e.to_string())
                }
                Compensation::RestoreFile { path, backup } => {
                    std::fs::rename(backup, path).map_err(|e| e.to_string())
                }
                Compensation::RemoveDir { path } => {
                    remove_dir_all_if_exists(path).map_err(|e| e.to_string())
                }
                Compensation::ComposeDown => match compose {
                    Some(compose) => compose.down(false).await.map_err(|e| e.to_string()),
                    None => Err("no compose handle available".to_string()),
                },
            };
            match result {
                Ok(()) => report.completed.push(description),
                Err(e) => {
                    log::error!("Compensation '{}' failed: {}", description, e);
                    report.failed.push((description, e));
                }
            }
        }
        report
    }

    /// Deployment committed: drops every compensation and deletes backups.
    pub fn disarm(&mut self) {
        for action in self.actions.drain(..) {
            if let Compensation::RestoreFile { backup, .. } = action {
                if let Err(e) = remove_file_if_exists(&backup) {
                    log::warn!("Failed to remove backup {}: {}", backup.display(), e);
                }
            }
        }
    }
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".");
    name.push(BACKUP_SUFFIX);
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::SystemRunner;

    #[tokio::test]
    async fn rollback_runs_in_reverse_and_restores_files() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("docker-compose.yml");
        let fresh = dir.path().join(".env");
        std::fs::write(&existing, "old").unwrap();

        let mut stack = CompensationStack::new();
        stack.guard_file(&existing).unwrap();
        std::fs::write(&existing, "new").unwrap();
        stack.guard_file(&fresh).unwrap();
        std::fs::write(&fresh, "SECRET=1").unwrap();

        let report = stack.rollback::<SystemRunner>(None).await;
        assert!(report.is_clean());
        assert_eq!(
            report.completed,
            vec![
                format!("remove {}", fresh.display()),
                format!("restore {}", existing.display()),
            ]
        );
        assert!(!fresh.exists());
        assert_eq!(std::fs::read_to_string(&existing).unwrap(), "old");
        assert!(stack.is_empty());
    }

    #[tokio::test]
    async fn failures_do_not_stop_rollback() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a");
        std::fs::write(&file, "x").unwrap();

        let mut stack = CompensationStack::new();
        stack.push(Compensation::RemoveFile { path: file.clone() });
        stack.push(Compensation::ComposeDown);

        let report = stack.rollback::<SystemRunner>(None).await;
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.completed.len(), 1);
        assert!(!file.exists());
    }

    #[test]
    fn disarm_removes_backups() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("docker-compose.yml");
        std::fs::write(&file, "old").unwrap();

        let mut stack = CompensationStack::new();
        stack.guard_file(&file).unwrap();
        let backup = backup_path(&file);
        assert!(backup.exists());

        stack.disarm();
        assert!(!backup.exists());
        assert!(stack.is_empty());
    }
}
