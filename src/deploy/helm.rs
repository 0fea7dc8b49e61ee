//! Helm chart deployment.

use std::path::Path;
use std::sync::Arc;

use similar::{ChangeTag, TextDiff};

use super::plan::{ReconcileOutcome, ReconcileTarget, ReconciliationPlan, declares_crd};
use super::root_ca::setup_root_ca;
use super::values::{ProcessedFile, ValuesProcessor, discover_values_files};
use super::{DeployContext, Deployer, extract_manifest, require_commands, run_checked};
use crate::common::{ProcessRunner, Reporter, args, colorize_kubectl_diff};
use crate::config::Config;
use crate::error::{DeployError, Result};
use crate::templates::write_domain_values;

/// One `helm upgrade --install` invocation, ready to preview or apply.
pub struct HelmRelease<'a> {
    runner: &'a dyn ProcessRunner,
    reporter: Arc<dyn Reporter>,
    release: String,
    namespace: String,
    chart_ref: String,
    version: Option<String>,
    install_args: Vec<String>,
    debug: bool,
}

impl<'a> HelmRelease<'a> {
    pub fn new(
        runner: &'a dyn ProcessRunner,
        reporter: Arc<dyn Reporter>,
        config: &Config,
        chart_ref: impl Into<String>,
        install_args: Vec<String>,
    ) -> Self {
        Self {
            runner,
            reporter,
            release: config.release_name.clone(),
            namespace: config.namespace.clone(),
            chart_ref: chart_ref.into(),
            version: config.version.clone(),
            install_args,
            debug: config.debug,
        }
    }

    fn template_args(&self) -> Vec<String> {
        let mut template = args([
            "template",
            self.release.as_str(),
            self.chart_ref.as_str(),
            "--include-crds",
            "--namespace",
            self.namespace.as_str(),
        ]);
        if let Some(version) = &self.version {
            template.push("--version".to_string());
            template.push(version.clone());
        }
        template.push("--dry-run".to_string());
        template
    }
}

impl ReconcileTarget for HelmRelease<'_> {
    fn describe(&self) -> String {
        format!("release {} in namespace {}", self.release, self.namespace)
    }

    fn current_state(&self) -> Option<Vec<u8>> {
        let get = args(["get", "manifest", self.release.as_str(), "-n", self.namespace.as_str()]);
        match self.runner.run("helm", &get) {
            Ok(output) if output.success() => Some(output.stdout),
            Ok(output) => {
                log::debug!("helm get manifest failed: {}", output.combined().trim());
                None
            }
            Err(e) => {
                log::debug!("helm get manifest failed: {}", e);
                None
            }
        }
    }

    fn has_crds(&self) -> bool {
        match self.runner.run("helm", &self.template_args()) {
            Ok(output) if output.success() => declares_crd(&output.stdout_str()),
            Ok(output) => {
                log::debug!("CRD probe failed, assuming none: {}", output.combined().trim());
                false
            }
            Err(e) => {
                log::debug!("CRD probe failed, assuming none: {}", e);
                false
            }
        }
    }

    fn proposed_state(&self) -> Result<Vec<u8>> {
        let mut dry_run = self.install_args.clone();
        dry_run.push("--dry-run".to_string());

        let output = self
            .runner
            .run("helm", &dry_run)
            .map_err(|e| DeployError::DiffFailed(e.to_string()))?;
        if !output.success() {
            return Err(DeployError::DiffFailed(output.combined().trim().to_string()));
        }

        let manifest = extract_manifest(&output.stdout_str());
        if self.debug {
            self.reporter.debug("Proposed manifest:");
            self.reporter.block(&manifest);
        }
        Ok(manifest.into_bytes())
    }

    fn show_diff(&self, plan: &ReconciliationPlan) -> Result<()> {
        let proposed = String::from_utf8_lossy(&plan.proposed_state);
        let Some(current) = &plan.current_state else {
            self.reporter
                .info("No existing release found. Showing what would be installed:");
            self.reporter.block(&proposed);
            return Ok(());
        };

        let current = String::from_utf8_lossy(current);
        if self.debug {
            self.reporter.debug("Current manifest:");
            self.reporter.block(&current);
        }

        match unified_diff(&current, &proposed) {
            Some(diff) => self.reporter.block(&colorize_kubectl_diff(&diff)),
            None => self.reporter.info("No changes detected"),
        }
        Ok(())
    }

    fn apply(&self) -> Result<()> {
        run_checked(self.runner, "helm", &self.install_args)?;
        Ok(())
    }
}

/// Line diff with `+`/`-` markers, or `None` when both sides are equal.
fn unified_diff(current: &str, proposed: &str) -> Option<String> {
    let diff = TextDiff::from_lines(current, proposed);
    let mut changed = false;
    let mut lines = Vec::new();

    for change in diff.iter_all_changes() {
        let prefix = match change.tag() {
            ChangeTag::Delete => {
                changed = true;
                "-"
            }
            ChangeTag::Insert => {
                changed = true;
                "+"
            }
            ChangeTag::Equal => " ",
        };
        lines.push(format!("{}{}", prefix, change.value().trim_end_matches(['\r', '\n'])));
    }

    changed.then(|| lines.join("\n"))
}

/// `--set` arguments exposing the Traefik dashboard on the ingress hosts.
///
/// Empty unless the dashboard is requested and the app is a Traefik install.
pub fn traefik_args(config: &Config, reporter: &dyn Reporter) -> Vec<String> {
    if !config.traefik_dashboard || !config.app_name.contains("traefik") {
        return Vec::new();
    }

    let mut extra = Vec::new();
    if config.ingress_hosts.is_empty() {
        reporter.warn("Traefik dashboard enabled but no domains specified");
    } else {
        let rule = config
            .ingress_hosts
            .iter()
            .map(|host| format!("Host(`{host}`)"))
            .collect::<Vec<_>>()
            .join(" || ");
        extra.push("--set".to_string());
        extra.push(format!("ingressRoute.dashboard.matchRule={rule}"));
    }
    extra.push("--set".to_string());
    extra.push("ingressRoute.dashboard.entryPoints[0]=websecure".to_string());
    extra
}

/// Full argument list of `helm upgrade --install`.
pub fn install_args(
    config: &Config,
    chart_ref: &str,
    domain_values: Option<&Path>,
    values_files: &[ProcessedFile],
    reporter: &dyn Reporter,
) -> Vec<String> {
    let mut install = args([
        "upgrade",
        "--install",
        config.release_name.as_str(),
        chart_ref,
        "--namespace",
        config.namespace.as_str(),
        "--create-namespace",
    ]);

    if let Some(path) = domain_values {
        install.push("--values".to_string());
        install.push(path.display().to_string());
    }
    for file in values_files {
        install.push("--values".to_string());
        install.push(file.arg());
    }
    if let Some(version) = config.version.as_deref().filter(|v| !v.is_empty()) {
        install.push("--version".to_string());
        install.push(version.to_string());
    }
    install.extend(traefik_args(config, reporter));
    install
}

/// Installs or upgrades the configured chart.
pub struct HelmDeployer<'a> {
    ctx: DeployContext<'a>,
}

impl<'a> HelmDeployer<'a> {
    pub fn new(ctx: DeployContext<'a>) -> Self {
        Self { ctx }
    }

    /// Chart reference to pass to helm, registering the repository first
    /// unless it is an OCI registry.
    fn chart_ref(&self) -> Result<String> {
        let config = self.ctx.config;
        let chart = required(&config.chart, "chart")?;
        let repository = required(&config.repository, "repository")?;

        if repository.starts_with("oci://") {
            return Ok(format!("{}/{}", repository.trim_end_matches('/'), chart));
        }

        let app = config.app_name.as_str();
        self.ctx
            .run_checked("helm", &args(["repo", "add", app, repository]))?;
        self.ctx.run_checked("helm", &args(["repo", "update"]))?;
        Ok(format!("{app}/{chart}"))
    }
}

fn required<'c>(value: &'c Option<String>, name: &str) -> Result<&'c str> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| DeployError::InvalidConfig(format!("{name} is required for Helm deployments")))
}

impl Deployer for HelmDeployer<'_> {
    fn deploy(&self) -> Result<ReconcileOutcome> {
        let config = self.ctx.config;
        let reporter = self.ctx.reporter.clone();

        let root_ca = config.root_ca.as_deref().filter(|s| !s.is_empty());
        if root_ca.is_some() {
            require_commands(self.ctx.runner, &["helm", "kubectl"])?;
        } else {
            require_commands(self.ctx.runner, &["helm"])?;
        }

        if let Some(root_ca) = root_ca {
            setup_root_ca(&self.ctx, root_ca)?;
        }

        let chart_ref = self.chart_ref()?;

        let domain_values = write_domain_values(config)?;
        let processor = ValuesProcessor::from_config(config, reporter.clone())?;
        let values_files = discover_values_files(&config.values_path, &config.stage)?
            .iter()
            .map(|path| processor.process_file(path))
            .collect::<Result<Vec<_>>>()?;
        if values_files.is_empty() {
            log::warn!("No values files found in {}", config.values_path.display());
        }

        let install = install_args(
            config,
            &chart_ref,
            domain_values.as_ref().map(|file| file.path()),
            &values_files,
            reporter.as_ref(),
        );
        log::debug!("helm {}", install.join(" "));

        let release = HelmRelease::new(self.ctx.runner, reporter, config, chart_ref, install);
        // Rendered values and domain files stay alive until the release is applied
        Ok(self.ctx.planner().reconcile(&release))
    }
}
