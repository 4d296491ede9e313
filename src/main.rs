//! Cluster deployment CLI.
//!
//! Exit codes: 0 success, 1 failure, 2 usage, 3 re-login required,
//! 4 stack applied but not ready in time.

use kodegen_cluster_deploy::cli::{self, OutputManager};
use kodegen_cluster_deploy::error::{DeployError, EXIT_FAILURE};
use std::process;

#[tokio::main]
async fn main() {
    // -v raises the default filter; RUST_LOG still wins
    let verbose = std::env::args().any(|a| a == "-v" || a == "--verbose");
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if verbose { "debug" } else { "info" }),
    )
    .init();

    let exit_code = match cli::run().await {
        Ok(code) => code,
        Err(e) => {
            let output = OutputManager::new(false, false);
            match e.downcast_ref::<DeployError>() {
                Some(err) => {
                    let _ = output.error(&format!("Error: {}", err));
                    if let Some(hint) = err.remediation() {
                        let _ = output.indent(&format!("→ {}", hint));
                    }
                    err.exit_code()
                }
                None => {
                    let _ = output.error(&format!("Error: {:#}", e));
                    EXIT_FAILURE
                }
            }
        }
    };

    process::exit(exit_code);
}
