//! Bundle build and load through the detected runtime.

use super::checksum::{sha256_file, sidecar_line, sidecar_path};
use super::manifest::{
    BundleManifest, COMPOSE_FILE, IMAGE_ARCHIVE, IMAGE_ARCHIVE_GZ, ImageEntry, SCHEMA_VERSION,
};
use super::verify::{VerifiedBundle, verify};
use super::BundleError;
use crate::retry::{RetryConfig, with_retry};
use crate::runtime::config::{COMPOSE_QUERY_TIMEOUT, IMAGE_ARCHIVE_TIMEOUT, IMAGE_PULL_TIMEOUT};
use crate::runtime::{CapabilityMatrix, CommandOutput, Invocation, ProcessRunner, RuntimeKind};
use chrono::Utc;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};

/// `--format` template for `image inspect`.
const IMAGE_FORMAT: &str = "{{.Id}}|{{json .RepoDigests}}";

/// Image archive compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    None,
    #[default]
    Gzip,
}

impl Compression {
    fn archive_name(self) -> &'static str {
        match self {
            Compression::None => IMAGE_ARCHIVE,
            Compression::Gzip => IMAGE_ARCHIVE_GZ,
        }
    }
}

/// Inputs of a bundle build.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub images: Vec<String>,
    pub compose_file: PathBuf,
    pub out_dir: PathBuf,
    pub compression: Compression,
    /// Skip pulling; images must already be present locally
    pub assume_pulled: bool,
}

/// Builds and loads bundles with the detected runtime binary.
pub struct BundleManager<'r, R: ProcessRunner> {
    runner: &'r R,
    runtime: RuntimeKind,
    runtime_binary: PathBuf,
    retry: RetryConfig,
}

impl<'r, R: ProcessRunner> BundleManager<'r, R> {
    pub fn new(runner: &'r R, caps: &CapabilityMatrix) -> Self {
        Self {
            runner,
            runtime: caps.runtime,
            runtime_binary: caps.runtime_binary.clone(),
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Builds a bundle in a sibling staging directory and renames it into place.
    ///
    /// The manifest is written last, so a failed build never leaves a manifest behind.
    pub async fn build(&self, request: &BuildRequest) -> Result<BundleManifest, BundleError> {
        if request.images.is_empty() {
            return Err(BundleError::NoImages);
        }
        ensure_output_free(&request.out_dir)?;

        let parent = match request.out_dir.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent).map_err(BundleError::io("create", &parent))?;
        let staging = tempfile::Builder::new()
            .prefix(".bundle-staging-")
            .tempdir_in(&parent)
            .map_err(BundleError::io("create staging directory in", &parent))?;
        let stage = staging.path();

        let mut images = Vec::with_capacity(request.images.len());
        for image in &request.images {
            if request.assume_pulled {
                log::debug!("Assuming {} is already present", image);
            } else {
                self.pull(image).await?;
            }
            images.push(self.resolve_digest(image).await?);
        }

        let tar_path = stage.join(IMAGE_ARCHIVE);
        self.save(&request.images, &tar_path).await?;
        check_archive(tar_path.clone()).await?;

        let archive_name = request.compression.archive_name();
        if request.compression == Compression::Gzip {
            log::info!("Compressing image archive...");
            gzip(tar_path, stage.join(IMAGE_ARCHIVE_GZ)).await?;
        }

        let compose_dest = stage.join(COMPOSE_FILE);
        std::fs::copy(&request.compose_file, &compose_dest)
            .map_err(BundleError::io("copy", &request.compose_file))?;

        let mut files = BTreeMap::new();
        for name in [archive_name, COMPOSE_FILE] {
            let path = stage.join(name);
            let digest = sha256_file(&path).await.map_err(BundleError::io("hash", &path))?;
            let sidecar = sidecar_path(&path);
            std::fs::write(&sidecar, sidecar_line(&digest, name))
                .map_err(BundleError::io("write", &sidecar))?;
            files.insert(name.to_string(), digest);
        }

        let manifest = BundleManifest {
            schema_version: SCHEMA_VERSION,
            created_at: Utc::now(),
            runtime_used: self.runtime.to_string(),
            compose_checksum: files.get(COMPOSE_FILE).cloned().unwrap_or_default(),
            images,
            files,
        };
        manifest.save(stage)?;

        if request.out_dir.exists() {
            std::fs::remove_dir(&request.out_dir)
                .map_err(BundleError::io("replace", &request.out_dir))?;
        }
        std::fs::rename(stage, &request.out_dir)
            .map_err(BundleError::io("move bundle into", &request.out_dir))?;
        log::info!(
            "✓ Bundle written to {} ({} images)",
            request.out_dir.display(),
            manifest.images.len()
        );
        Ok(manifest)
    }

    /// Verifies `dir`; see [`verify`].
    pub async fn verify(&self, dir: &Path, mirror: Option<&str>) -> Result<VerifiedBundle, BundleError> {
        verify(dir, mirror).await
    }

    /// Imports the verified archive, then confirms every manifest image is present and matches.
    pub async fn load(&self, bundle: &VerifiedBundle) -> Result<(), BundleError> {
        let archive = bundle
            .archive_path()
            .ok_or_else(|| BundleError::InvalidManifest {
                path: bundle.dir().join(super::manifest::MANIFEST_FILE),
                reason: "no image archive listed".to_string(),
            })?;

        log::info!("Loading images from {}...", archive.display());
        let inv = Invocation::new(self.runtime_binary.clone(), IMAGE_ARCHIVE_TIMEOUT)
            .args(["load", "-i"])
            .arg(archive.display().to_string());
        let output = self.runner.run(&inv).await?;
        check_output("load", &archive.display().to_string(), &output)?;

        for entry in &bundle.manifest().images {
            let Some((id, repo_digests)) = self.inspect(&entry.name).await? else {
                return Err(BundleError::ImageMissing {
                    image: entry.name.clone(),
                });
            };
            if !matches_entry(entry, &id, &repo_digests) {
                return Err(BundleError::DigestMismatch {
                    image: entry.name.clone(),
                    expected: entry.digest.clone(),
                    actual: id,
                });
            }
            log::debug!("{} present as {}", entry.name, id);
        }
        log::info!("✓ Loaded {} images", bundle.manifest().images.len());
        Ok(())
    }

    async fn pull(&self, image: &str) -> Result<(), BundleError> {
        with_retry(self.retry, &format!("pull {image}"), is_transient, |_| async move {
            let inv = Invocation::new(self.runtime_binary.clone(), IMAGE_PULL_TIMEOUT)
                .args(["pull", image]);
            let output = self.runner.run(&inv).await?;
            check_output("pull", image, &output)
        })
        .await
    }

    async fn save(&self, images: &[String], dest: &Path) -> Result<(), BundleError> {
        log::info!("Saving {} images...", images.len());
        let mut inv = Invocation::new(self.runtime_binary.clone(), IMAGE_ARCHIVE_TIMEOUT).arg("save");
        if self.runtime == RuntimeKind::Podman && images.len() > 1 {
            inv = inv.arg("--multi-image-archive");
        }
        inv = inv
            .arg("-o")
            .arg(dest.display().to_string())
            .args(images.iter().cloned());
        let output = self.runner.run(&inv).await?;
        check_output("save", &images.join(" "), &output)
    }

    /// `(image id, repo digests)`, or `None` when the image is absent.
    async fn inspect(&self, image: &str) -> Result<Option<(String, Vec<String>)>, BundleError> {
        let inv = Invocation::new(self.runtime_binary.clone(), COMPOSE_QUERY_TIMEOUT)
            .args(["image", "inspect", "--format", IMAGE_FORMAT, image]);
        let output = self.runner.run(&inv).await?;
        if !output.success() {
            return Ok(None);
        }
        Ok(Some(parse_inspect(output.stdout_trimmed())))
    }

    /// Registry digest when the image has one, else its image ID.
    async fn resolve_digest(&self, image: &str) -> Result<ImageEntry, BundleError> {
        let (id, repo_digests) = self.inspect(image).await?.ok_or_else(|| BundleError::ImageMissing {
            image: image.to_string(),
        })?;
        let digest = repo_digests
            .iter()
            .find_map(|d| d.split_once('@').map(|(_, digest)| digest.to_string()))
            .unwrap_or_else(|| id.clone());
        log::debug!("{} resolved to {}", image, digest);
        Ok(ImageEntry {
            name: image.to_string(),
            digest,
            image_id: Some(id),
        })
    }
}

fn is_transient(err: &BundleError) -> bool {
    match err {
        BundleError::Runtime { .. } => true,
        BundleError::Exec(e) => e.is_timeout(),
        _ => false,
    }
}

fn check_output(action: &'static str, subject: &str, output: &CommandOutput) -> Result<(), BundleError> {
    if output.success() {
        return Ok(());
    }
    Err(BundleError::Runtime {
        action,
        subject: subject.to_string(),
        exit_code: output.exit_code,
        stderr: output.stderr.clone(),
    })
}

fn normalize_id(id: &str) -> String {
    let id = id.trim();
    if id.starts_with("sha256:") {
        id.to_string()
    } else {
        format!("sha256:{id}")
    }
}

fn parse_inspect(line: &str) -> (String, Vec<String>) {
    let (id, digests) = line.split_once('|').unwrap_or((line, "[]"));
    let repo_digests: Vec<String> = serde_json::from_str::<Option<Vec<String>>>(digests.trim())
        .ok()
        .flatten()
        .unwrap_or_default();
    (normalize_id(id), repo_digests)
}

fn matches_entry(entry: &ImageEntry, id: &str, repo_digests: &[String]) -> bool {
    if entry.image_id.as_deref().map(normalize_id).as_deref() == Some(id) {
        return true;
    }
    normalize_id(&entry.digest) == id
        || repo_digests
            .iter()
            .any(|d| d.split_once('@').map(|(_, digest)| digest) == Some(entry.digest.as_str()))
}

fn ensure_output_free(out_dir: &Path) -> Result<(), BundleError> {
    match std::fs::read_dir(out_dir) {
        Ok(mut entries) => {
            if entries.next().is_some() {
                return Err(BundleError::OutputExists {
                    path: out_dir.to_path_buf(),
                });
            }
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(BundleError::Io {
            action: "inspect",
            path: out_dir.to_path_buf(),
            source,
        }),
    }
}

/// A usable image archive carries a top-level `manifest.json`.
async fn check_archive(path: PathBuf) -> Result<(), BundleError> {
    let result = tokio::task::spawn_blocking({
        let path = path.clone();
        move || -> io::Result<bool> {
            let mut archive = tar::Archive::new(BufReader::new(File::open(&path)?));
            for entry in archive.entries()? {
                let entry = entry?;
                let entry_path = entry.path()?;
                if entry_path == Path::new("manifest.json") || entry_path == Path::new("./manifest.json") {
                    return Ok(true);
                }
            }
            Ok(false)
        }
    })
    .await
    .map_err(|e| io::Error::other(e.to_string()));

    match result.and_then(|r| r) {
        Ok(true) => Ok(()),
        Ok(false) => Err(BundleError::InvalidArchive {
            path,
            reason: "no manifest.json entry".to_string(),
        }),
        Err(e) => Err(BundleError::InvalidArchive {
            path,
            reason: e.to_string(),
        }),
    }
}

/// Compresses `src` into `dest` and removes `src`.
async fn gzip(src: PathBuf, dest: PathBuf) -> Result<(), BundleError> {
    let target = dest.clone();
    tokio::task::spawn_blocking(move || -> io::Result<()> {
        let mut input = BufReader::new(File::open(&src)?);
        let output = BufWriter::new(File::create(&dest)?);
        let mut encoder = flate2::write::GzEncoder::new(output, flate2::Compression::default());
        io::copy(&mut input, &mut encoder)?;
        encoder.finish()?.into_inner().map_err(|e| e.into_error())?.sync_all()?;
        std::fs::remove_file(&src)
    })
    .await
    .map_err(|e| io::Error::other(e.to_string()))
    .and_then(|r| r)
    .map_err(BundleError::io("compress", target))
}
