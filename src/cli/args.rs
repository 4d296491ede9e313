//! Command line argument parsing and validation.
//!
//! Flags overlay the settings file, which overlays built-in defaults.

use crate::error::CliError;
use crate::settings::Settings;
use crate::topology::SizeClass;
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

/// Cluster deployment for Podman or Docker hosts
#[derive(Parser, Debug)]
#[command(
    name = "kodegen_cluster_deploy",
    version,
    about = "Deploys a clustered indexing/search stack on Podman or Docker, online or air-gapped",
    long_about = "Detects the container runtime, generates a compose project for the requested
cluster size, applies it and waits until every service is healthy.

Usage:
  kodegen_cluster_deploy deploy --size medium --index app_logs
  kodegen_cluster_deploy bundle build --output ./bundle
  kodegen_cluster_deploy deploy --bundle ./bundle --non-interactive
  kodegen_cluster_deploy status --json

Exit codes: 0 success, 1 failure, 2 usage, 3 re-login required, 4 readiness timeout."
)]
pub struct Args {
    /// Project directory holding the generated files
    #[arg(short = 'C', long, global = true, value_name = "DIR", default_value = ".")]
    pub project_dir: PathBuf,

    /// Settings file (TOML)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Show debug output
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only show warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Deploy (or with --force, redeploy) the cluster
    Deploy(DeployArgs),
    /// Stop the deployed stack
    Teardown(TeardownArgs),
    /// Show the recorded deployment and live service health
    Status {
        /// Print JSON on stdout
        #[arg(long)]
        json: bool,
    },
    /// Probe the host and print the capability matrix
    Detect {
        /// Print JSON on stdout
        #[arg(long)]
        json: bool,
        /// Skip the registry probe and report air-gapped
        #[arg(long)]
        offline: bool,
    },
    /// Show recent service logs
    Logs {
        /// Service name; all services when omitted
        service: Option<String>,
        /// Lines per service
        #[arg(long, default_value_t = 200)]
        tail: u32,
    },
    /// Build, verify or load an offline bundle
    #[command(subcommand)]
    Bundle(BundleCommand),
}

#[derive(ClapArgs, Debug, Default)]
pub struct DeployArgs {
    /// Size class: small, medium, large or custom
    #[arg(long, value_name = "CLASS")]
    pub size: Option<SizeClass>,

    #[arg(long, value_name = "N")]
    pub indexers: Option<u32>,

    #[arg(long, value_name = "N")]
    pub search_heads: Option<u32>,

    #[arg(long, value_name = "N")]
    pub heavy_forwarders: Option<u32>,

    /// Replication factor
    #[arg(long = "rf", value_name = "N")]
    pub replication_factor: Option<u32>,

    /// Search factor
    #[arg(long = "sf", value_name = "N")]
    pub search_factor: Option<u32>,

    /// Add the Prometheus/Grafana/Alertmanager stack
    #[arg(long)]
    pub monitoring: bool,

    /// Index to create once the cluster is up
    #[arg(long = "index", value_name = "NAME")]
    pub index_name: Option<String>,

    /// Admin user name
    #[arg(long, value_name = "USER")]
    pub username: Option<String>,

    /// Admin password; prefer the environment variable over the flag
    #[arg(long, env = "CLUSTER_ADMIN_PASSWORD", hide_env_values = true, value_name = "PASSWORD")]
    pub password: Option<String>,

    /// Never prompt; fail or generate instead
    #[arg(long)]
    pub non_interactive: bool,

    /// Replace an existing deployment
    #[arg(long)]
    pub force: bool,

    /// Deploy from a verified offline bundle directory
    #[arg(long, value_name = "DIR")]
    pub bundle: Option<PathBuf>,

    /// Mirror URL used in re-download hints when bundle verification fails
    #[arg(long, value_name = "URL", requires = "bundle")]
    pub mirror: Option<String>,

    /// Treat the host as air-gapped without probing registries
    #[arg(long, conflicts_with = "online")]
    pub offline: bool,

    /// Treat the host as online without probing registries
    #[arg(long)]
    pub online: bool,

    #[arg(long, value_name = "SECS")]
    pub readiness_timeout: Option<u64>,

    /// Minimum free disk in GB (overrides the size-class default)
    #[arg(long, value_name = "GB")]
    pub min_disk_gb: Option<u64>,

    #[arg(long)]
    pub skip_port_check: bool,
}

#[derive(ClapArgs, Debug, Default)]
pub struct TeardownArgs {
    /// Also remove named volumes (destroys indexed data)
    #[arg(long)]
    pub volumes: bool,

    /// Also remove generated files and stored credentials
    #[arg(long)]
    pub purge: bool,
}

#[derive(Subcommand, Debug)]
pub enum BundleCommand {
    /// Pull, save and checksum images plus the compose file into a bundle
    Build {
        /// Output directory; must not exist or be empty
        #[arg(short, long, value_name = "DIR")]
        output: PathBuf,

        /// Compose file to ship; generated from the settings when omitted
        #[arg(long, value_name = "FILE")]
        compose: Option<PathBuf>,

        /// Images to include; the images the settings use when omitted
        #[arg(long = "image", value_name = "IMAGE")]
        images: Vec<String>,

        /// Keep the image archive uncompressed
        #[arg(long)]
        no_compress: bool,

        /// Images are already present locally; do not pull
        #[arg(long)]
        assume_pulled: bool,
    },
    /// Recompute every checksum in a bundle
    Verify {
        dir: PathBuf,

        /// Mirror URL for per-file re-download commands
        #[arg(long, value_name = "URL")]
        mirror: Option<String>,
    },
    /// Verify a bundle, then load its images into the local runtime
    Load {
        dir: PathBuf,
    },
}

impl Args {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Checks clap cannot express.
    pub fn validate(&self) -> Result<(), CliError> {
        if let Command::Deploy(deploy) = &self.command {
            let counts_given = deploy.indexers.is_some()
                || deploy.search_heads.is_some()
                || deploy.heavy_forwarders.is_some();
            if counts_given && deploy.size.is_some_and(|s| s != SizeClass::Custom) {
                return Err(CliError::ConflictingArguments {
                    arguments: vec!["--size".to_string(), "--indexers/--search-heads/--heavy-forwarders".to_string()],
                });
            }
            if deploy.password.as_deref().is_some_and(str::is_empty) {
                return Err(CliError::InvalidArguments {
                    reason: "password cannot be empty".to_string(),
                });
            }
            if deploy.readiness_timeout == Some(0) {
                return Err(CliError::InvalidArguments {
                    reason: "readiness timeout must be at least one second".to_string(),
                });
            }
        }
        Ok(())
    }
}

impl DeployArgs {
    /// Overlays these flags on `settings`.
    pub fn apply(&self, settings: &mut Settings) {
        let cluster = &mut settings.cluster;
        if let Some(size) = self.size {
            cluster.size = size;
        }
        let counts_given =
            self.indexers.is_some() || self.search_heads.is_some() || self.heavy_forwarders.is_some();
        if counts_given && self.size.is_none() {
            cluster.size = SizeClass::Custom;
        }
        if self.indexers.is_some() {
            cluster.indexers = self.indexers;
        }
        if self.search_heads.is_some() {
            cluster.search_heads = self.search_heads;
        }
        if self.heavy_forwarders.is_some() {
            cluster.heavy_forwarders = self.heavy_forwarders;
        }
        if self.replication_factor.is_some() {
            cluster.replication_factor = self.replication_factor;
        }
        if self.search_factor.is_some() {
            cluster.search_factor = self.search_factor;
        }
        if self.monitoring {
            cluster.monitoring = true;
        }
        if self.index_name.is_some() {
            cluster.index_name = self.index_name.clone();
        }

        if let Some(username) = &self.username {
            settings.credentials.username = username.clone();
        }
        if self.non_interactive {
            settings.credentials.non_interactive = true;
        }

        let deploy = &mut settings.deploy;
        if let Some(secs) = self.readiness_timeout {
            deploy.readiness_timeout_secs = secs;
        }
        if self.min_disk_gb.is_some() {
            deploy.min_disk_gb = self.min_disk_gb;
        }
        if self.skip_port_check {
            deploy.skip_port_check = true;
        }
        if self.offline {
            deploy.offline = Some(true);
        } else if self.online {
            deploy.offline = Some(false);
        }
    }
}

/// Configuration derived from command line arguments
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    output: super::OutputManager,
}

impl From<&Args> for RuntimeConfig {
    fn from(args: &Args) -> Self {
        Self {
            output: super::OutputManager::new(args.verbose, args.quiet),
        }
    }
}

impl RuntimeConfig {
    pub fn verbose_println(&self, message: &str) -> std::io::Result<()> {
        self.output.verbose(message)
    }

    pub fn warn(&self, message: &str) -> std::io::Result<()> {
        self.output.warn(message)
    }

    pub fn success(&self, message: &str) -> std::io::Result<()> {
        self.output.success(message)
    }

    pub fn progress(&self, message: &str) -> std::io::Result<()> {
        self.output.progress(message)
    }

    pub fn section(&self, title: &str) -> std::io::Result<()> {
        self.output.section(title)
    }

    pub fn indent(&self, message: &str) -> std::io::Result<()> {
        self.output.indent(message)
    }
}
