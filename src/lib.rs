//! # helm-ci
//!
//! Deploys an application to Kubernetes from a CI pipeline, either by
//! installing a Helm chart or by applying the raw manifests kept next to its
//! values files.
//!
//! ## Features
//!
//! - **Vault placeholders**: `<<vault.path/key>>` tokens in values files and
//!   manifests are replaced with secrets from a Vault KV engine (v1 or v2)
//! - **Secret encoding**: `data` of `kind: Secret` manifests is base64-encoded
//!   after resolution
//! - **Namespace binding**: every manifest document gets `metadata.namespace`
//!   set without disturbing comments or anchors
//! - **Preview first**: changes are diffed against the cluster and confirmed
//!   before anything is applied; charts that ship CRDs skip the preview on
//!   first install
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use helm_ci::common::{ConsoleReporter, SystemRunner, TerminalConfirmation};
//! use helm_ci::config::Config;
//!
//! # fn main() -> helm_ci::Result<()> {
//! let mut config = Config {
//!     app_name: "shop".to_string(),
//!     stage: "dev".to_string(),
//!     environment: "prod".to_string(),
//!     chart: Some("shop".to_string()),
//!     repository: Some("oci://registry.example.com/charts".to_string()),
//!     ..Default::default()
//! };
//! config.setup_names();
//!
//! let outcome = helm_ci::deploy(
//!     &config,
//!     &SystemRunner,
//!     &TerminalConfirmation::new(false),
//!     Arc::new(ConsoleReporter::new(false)),
//! )?;
//! println!("{}", outcome);
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod common;
pub mod config;
pub mod deploy;
pub mod error;
pub mod manifest;
pub mod templates;
pub mod vault;

use std::sync::Arc;

// Re-export commonly used types and functions
pub use config::Config;
pub use deploy::{DeployContext, Deployer, HelmDeployer, ManifestDeployer, ReconcileOutcome};
pub use error::{DeployError, Result};
pub use manifest::{NamespacePatcher, apply_if_secret};
pub use vault::{PlaceholderResolver, SecretPath, SecretStore, SecretStoreClient};

use cli::Cli;
use common::{Confirmation, ProcessRunner, Reporter};

/// The current version of the CLI tool
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build the validated run configuration from flags and config files.
pub fn build_config(cli: &Cli) -> Result<Config> {
    let file = config::load_config(cli.config.as_deref())?;
    let mut config = cli.to_config(&file);
    config.validate()?;
    config.setup_names();
    Ok(config)
}

/// Print the configuration and run the deployer it selects.
pub fn deploy(
    config: &Config,
    runner: &dyn ProcessRunner,
    confirmation: &dyn Confirmation,
    reporter: Arc<dyn Reporter>,
) -> Result<ReconcileOutcome> {
    config.print(reporter.as_ref());

    let ctx = DeployContext::new(config, runner, confirmation, reporter);
    if config.custom {
        ManifestDeployer::new(ctx).deploy()
    } else {
        HelmDeployer::new(ctx).deploy()
    }
}
