//! Command handlers. Each returns the process exit code.

mod bundle;
mod deploy;
mod detect;
mod lifecycle;

pub use bundle::bundle;
pub use deploy::deploy;
pub use detect::detect;
pub use lifecycle::{logs, status, teardown};

use crate::error::DeployError;
use crate::runtime::{CapabilityMatrix, Detector, RegistryProbe, SystemRunner};

/// Capability detection shared by every command.
///
/// `offline` of `None` probes registries; commands that never pull pass `Some`.
pub(crate) async fn detect_capabilities(
    runner: &SystemRunner,
    offline: Option<bool>,
) -> Result<CapabilityMatrix, DeployError> {
    let probe = match offline {
        Some(air_gapped) => RegistryProbe::Assume { air_gapped },
        None => RegistryProbe::default(),
    };
    let caps = Detector::new(runner).with_registry_probe(probe).detect().await?;
    for line in caps.summary_lines() {
        log::debug!("capability {}", line);
    }
    Ok(caps)
}
