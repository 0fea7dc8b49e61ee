//! Deployment back-ends.
//!
//! [`HelmDeployer`] installs a chart with `helm upgrade --install`;
//! [`ManifestDeployer`] applies raw manifests with `kubectl`. Both render
//! their inputs through [`ValuesProcessor`] and hand the cluster-facing part
//! to [`ReconciliationPlanner`], which previews changes and asks for
//! confirmation before anything is applied.

pub mod helm;
pub mod manifests;
pub mod plan;
pub mod root_ca;
pub mod values;

pub use helm::{HelmDeployer, HelmRelease};
pub use manifests::{ManifestDeployer, ManifestSet};
pub use plan::{
    ReconcileOutcome, ReconcileTarget, ReconciliationPlan, ReconciliationPlanner, declares_crd,
    is_missing_crd_error,
};
pub use root_ca::setup_root_ca;
pub use values::{ProcessedFile, ValuesProcessor, discover_manifests, discover_values_files};

use std::sync::Arc;

use crate::common::{Confirmation, ProcessOutput, ProcessRunner, Reporter};
use crate::config::Config;
use crate::error::{DeployError, Result};

/// A deployment strategy.
pub trait Deployer {
    /// Render, preview and apply. Errors raised before the preview are
    /// returned; everything after it is folded into the outcome.
    fn deploy(&self) -> Result<ReconcileOutcome>;
}

/// Collaborators shared by every deployer.
#[derive(Clone)]
pub struct DeployContext<'a> {
    pub config: &'a Config,
    pub runner: &'a dyn ProcessRunner,
    pub confirmation: &'a dyn Confirmation,
    pub reporter: Arc<dyn Reporter>,
}

impl<'a> DeployContext<'a> {
    pub fn new(
        config: &'a Config,
        runner: &'a dyn ProcessRunner,
        confirmation: &'a dyn Confirmation,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self {
            config,
            runner,
            confirmation,
            reporter,
        }
    }

    pub fn planner(&self) -> ReconciliationPlanner<'a> {
        ReconciliationPlanner::new(self.confirmation, self.reporter.clone())
    }

    /// Run a command, turning spawn failures and non-zero exits into
    /// [`DeployError::Command`].
    pub fn run_checked(&self, command: &str, args: &[String]) -> Result<ProcessOutput> {
        run_checked(self.runner, command, args)
    }
}

/// Fail unless every tool in `commands` can be executed.
pub(crate) fn require_commands(runner: &dyn ProcessRunner, commands: &[&str]) -> Result<()> {
    let missing: Vec<&str> = commands
        .iter()
        .copied()
        .filter(|command| !runner.command_exists(command))
        .collect();
    if missing.is_empty() {
        return Ok(());
    }

    Err(DeployError::InvalidConfig(format!(
        "required command(s) not found in PATH: {}",
        missing.join(", ")
    )))
}

pub(crate) fn run_checked(
    runner: &dyn ProcessRunner,
    command: &str,
    args: &[String],
) -> Result<ProcessOutput> {
    let line = format!("{} {}", command, args.join(" "));
    let output = runner
        .run(command, args)
        .map_err(|e| DeployError::command(&line, e.to_string()))?;

    if output.success() {
        Ok(output)
    } else {
        Err(DeployError::command(
            line,
            format!("exit code {}: {}", output.exit_code, output.combined().trim()),
        ))
    }
}

/// The rendered manifests of a `helm ... --dry-run` run.
///
/// Keeps the lines between `MANIFEST:` and `NOTES:`, dropping `***` banner
/// lines.
pub fn extract_manifest(helm_output: &str) -> String {
    let mut lines = Vec::new();
    let mut in_manifest = false;

    for line in helm_output.lines() {
        if line.starts_with("MANIFEST:") {
            in_manifest = true;
            continue;
        }
        if !in_manifest || line.contains("***") {
            continue;
        }
        if line.starts_with("NOTES:") {
            break;
        }
        lines.push(line);
    }

    lines.join("\n")
}
