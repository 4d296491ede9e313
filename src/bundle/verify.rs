//! Bundle verification. Read-only: the bundle directory is never modified.

use super::checksum::{SIDECAR_SUFFIX, parse_sidecar, sha256_bytes, sha256_file, sidecar_path};
use super::manifest::{BundleManifest, COMPOSE_FILE, MANIFEST_FILE};
use super::{BundleError, IntegrityIssue};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A bundle whose every manifest checksum matched.
///
/// Only [`verify`] constructs one, so loading cannot skip verification.
#[derive(Debug, Clone)]
pub struct VerifiedBundle {
    dir: PathBuf,
    manifest: BundleManifest,
    /// Compose document exactly as hashed
    compose_yaml: String,
}

impl VerifiedBundle {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn manifest(&self) -> &BundleManifest {
        &self.manifest
    }

    pub fn compose_path(&self) -> PathBuf {
        self.dir.join(COMPOSE_FILE)
    }

    /// Path of the verified image archive.
    pub fn archive_path(&self) -> Option<PathBuf> {
        self.manifest.archive_file().map(|f| self.dir.join(f))
    }

    /// Compose document text as it was when its checksum matched.
    ///
    /// Later changes to the file on disk are never seen here.
    pub fn compose_yaml(&self) -> &str {
        &self.compose_yaml
    }
}

/// Recomputes every manifest checksum. Any mismatch fails verification.
///
/// With `mirror`, the error carries one re-download command per failing file.
pub async fn verify(dir: &Path, mirror: Option<&str>) -> Result<VerifiedBundle, BundleError> {
    let manifest = BundleManifest::load(dir)?;
    let mut issues = Vec::new();
    let mut compose_bytes = None;

    for (rel, expected) in &manifest.files {
        let path = dir.join(rel);
        if !path.is_file() {
            issues.push(IntegrityIssue::Missing { file: rel.clone() });
            continue;
        }
        // The compose document is kept from the same read that is hashed
        let actual = if rel == COMPOSE_FILE {
            let bytes = tokio::fs::read(&path).await.map_err(BundleError::io("read", &path))?;
            let digest = sha256_bytes(&bytes);
            compose_bytes = Some(bytes);
            digest
        } else {
            sha256_file(&path).await.map_err(BundleError::io("hash", &path))?
        };
        if !actual.eq_ignore_ascii_case(expected) {
            issues.push(IntegrityIssue::Mismatch {
                file: rel.clone(),
                expected: expected.clone(),
                actual,
            });
            continue;
        }

        let sidecar = sidecar_path(&path);
        if let Ok(content) = std::fs::read_to_string(&sidecar) {
            let agrees = parse_sidecar(&content)
                .map(|d| d.eq_ignore_ascii_case(expected))
                .unwrap_or(false);
            if !agrees {
                issues.push(IntegrityIssue::Sidecar { file: rel.clone() });
            }
        }
    }

    let consistent = manifest
        .files
        .get(COMPOSE_FILE)
        .is_some_and(|d| d.eq_ignore_ascii_case(&manifest.compose_checksum));
    if !consistent {
        issues.push(IntegrityIssue::ComposeChecksum);
    }

    if !issues.is_empty() {
        for issue in &issues {
            log::error!("Integrity failure: {}", issue);
        }
        let redownload = mirror
            .map(|mirror| redownload_commands(dir, mirror, &issues))
            .unwrap_or_default();
        return Err(BundleError::Integrity {
            dir: dir.to_path_buf(),
            issues,
            redownload,
        });
    }

    let compose_path = dir.join(COMPOSE_FILE);
    let compose_yaml = compose_bytes
        .map(String::from_utf8)
        .ok_or_else(|| BundleError::InvalidManifest {
            path: dir.join(MANIFEST_FILE),
            reason: format!("no checksum for {COMPOSE_FILE}"),
        })?
        .map_err(|e| {
            BundleError::io("read", &compose_path)(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                e,
            ))
        })?;

    for extra in unlisted_files(dir, &manifest) {
        log::warn!("{} is not covered by the manifest and will be ignored", extra);
    }

    log::info!(
        "✓ Bundle verified: {} files, {} images",
        manifest.files.len(),
        manifest.images.len()
    );
    Ok(VerifiedBundle {
        dir: dir.to_path_buf(),
        manifest,
        compose_yaml,
    })
}

/// Files in `dir` that are neither manifest entries, sidecars nor the manifest itself.
fn unlisted_files(dir: &Path, manifest: &BundleManifest) -> Vec<String> {
    let sidecar_ext = format!(".{SIDECAR_SUFFIX}");
    WalkDir::new(dir)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let rel = entry.path().strip_prefix(dir).ok()?;
            Some(rel.to_string_lossy().replace('\\', "/"))
        })
        .filter(|rel| {
            rel != MANIFEST_FILE && !rel.ends_with(&sidecar_ext) && !manifest.files.contains_key(rel)
        })
        .collect()
}

fn redownload_commands(dir: &Path, mirror: &str, issues: &[IntegrityIssue]) -> Vec<String> {
    let mirror = mirror.trim_end_matches('/');
    let mut commands: Vec<String> = issues
        .iter()
        .filter_map(IntegrityIssue::file)
        .map(|file| {
            format!(
                "curl -fL --output '{}' '{}/{}'",
                dir.join(file).display(),
                mirror,
                file
            )
        })
        .collect();
    commands.dedup();
    commands
}
