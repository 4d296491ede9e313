use super::detect_capabilities;
use crate::bundle::{BuildRequest, BundleManager, Compression, verify};
use crate::cli::{BundleCommand, RuntimeConfig};
use crate::error::DeployError;
use crate::runtime::SystemRunner;
use crate::settings::Settings;
use crate::topology::generate;
use anyhow::Context;
use std::io::Write;

pub async fn bundle(
    command: &BundleCommand,
    settings: &Settings,
    config: &RuntimeConfig,
) -> anyhow::Result<i32> {
    match command {
        BundleCommand::Build {
            output,
            compose,
            images,
            no_compress,
            assume_pulled,
        } => {
            let runner = SystemRunner::new();
            let caps = detect_capabilities(&runner, Some(false)).await?;
            let spec = settings.topology_spec().map_err(DeployError::from)?;

            // Holds the generated document until the build has copied it
            let mut generated = None;
            let compose_file = match compose {
                Some(path) => path.clone(),
                None => {
                    let yaml = generate(&spec, &caps)
                        .and_then(|artifact| artifact.compose_yaml())
                        .map_err(DeployError::from)?;
                    let mut file = tempfile::Builder::new()
                        .prefix("bundle-compose-")
                        .suffix(".yml")
                        .tempfile()
                        .context("failed to stage the generated compose file")?;
                    file.write_all(yaml.as_bytes())
                        .context("failed to stage the generated compose file")?;
                    let path = file.path().to_path_buf();
                    generated = Some(file);
                    path
                }
            };
            let images = if images.is_empty() {
                spec.images_in_use()
            } else {
                images.clone()
            };

            config.verbose_println(&format!("compose file: {}", compose_file.display()))?;
            config.progress(&format!(
                "Building bundle with {} images into {}",
                images.len(),
                output.display()
            ))?;
            let request = BuildRequest {
                images,
                compose_file,
                out_dir: output.clone(),
                compression: if *no_compress {
                    Compression::None
                } else {
                    Compression::Gzip
                },
                assume_pulled: *assume_pulled,
            };
            let manifest = BundleManager::new(&runner, &caps)
                .with_retry(settings.retry_config())
                .build(&request)
                .await
                .map_err(DeployError::from)?;
            drop(generated);

            for image in &manifest.images {
                config.indent(&format!("{} {}", image.name, image.digest))?;
            }
            config.success(&format!("Bundle written to {}", output.display()))?;
            Ok(0)
        }
        BundleCommand::Verify { dir, mirror } => {
            let result = verify(dir, mirror.as_deref()).await;
            if let Err(crate::bundle::BundleError::Integrity { redownload, .. }) = &result {
                if !redownload.is_empty() {
                    config.section("Re-download the failing files")?;
                    for command in redownload {
                        config.indent(command)?;
                    }
                }
            }
            let verified = result.map_err(DeployError::from)?;
            config.success(&format!(
                "Bundle verified: {} files, {} images",
                verified.manifest().files.len(),
                verified.manifest().images.len()
            ))?;
            Ok(0)
        }
        BundleCommand::Load { dir } => {
            let verified = verify(dir, None).await.map_err(DeployError::from)?;
            let runner = SystemRunner::new();
            let caps = detect_capabilities(&runner, Some(true)).await?;
            BundleManager::new(&runner, &caps)
                .with_retry(settings.retry_config())
                .load(&verified)
                .await
                .map_err(DeployError::from)?;
            config.success(&format!(
                "Loaded {} images into {}",
                verified.manifest().images.len(),
                caps.runtime
            ))?;
            Ok(0)
        }
    }
}
