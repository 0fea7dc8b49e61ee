//! Raw manifest deployment with `kubectl`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::plan::{ReconcileOutcome, ReconcileTarget, ReconciliationPlan, declares_crd};
use super::values::{ProcessedFile, ValuesProcessor, discover_manifests, write_temp};
use super::{DeployContext, Deployer, require_commands, run_checked};
use crate::common::{ProcessRunner, Reporter, args, colorize_kubectl_diff};
use crate::error::{DeployError, Result};
use crate::manifest::NamespacePatcher;

/// A manifest file after secret resolution and namespace patching.
#[derive(Debug)]
struct PreparedManifest {
    file: ProcessedFile,
    content: String,
}

/// The manifests of one stage, bound to a namespace.
pub struct ManifestSet<'a> {
    runner: &'a dyn ProcessRunner,
    reporter: Arc<dyn Reporter>,
    namespace: String,
    manifests: Vec<PreparedManifest>,
}

impl<'a> ManifestSet<'a> {
    pub fn new(
        runner: &'a dyn ProcessRunner,
        reporter: Arc<dyn Reporter>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            reporter,
            namespace: namespace.into(),
            manifests: Vec::new(),
        }
    }

    /// Resolve and patch `path`, writing a `manifest-*.yml` file only when
    /// the content changed.
    pub fn add(
        &mut self,
        path: &Path,
        processor: &ValuesProcessor,
        patcher: &NamespacePatcher,
    ) -> Result<()> {
        let original = fs::read_to_string(path).map_err(|e| {
            DeployError::InvalidConfig(format!("failed to read manifest {}: {}", path.display(), e))
        })?;
        let rendered = processor.render(&original)?;
        let patched = patcher.patch_namespaces(&rendered);

        let file = if patched.as_ref() == original {
            ProcessedFile::Original(path.to_path_buf())
        } else {
            let file = write_temp("manifest-", &patched)?;
            log::debug!("{} rewritten to {}", path.display(), file.path().display());
            ProcessedFile::Rendered {
                source: path.to_path_buf(),
                file,
            }
        };

        self.manifests.push(PreparedManifest {
            file,
            content: patched.into_owned(),
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.manifests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.manifests.is_empty()
    }

    /// Paths handed to kubectl, in apply order.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.manifests
            .iter()
            .map(|m| m.file.path().to_path_buf())
            .collect()
    }

    fn kubectl(&self, verb: &str, manifest: &PreparedManifest) -> Vec<String> {
        let path = manifest.file.arg();
        args([verb, "-f", path.as_str(), "-n", self.namespace.as_str()])
    }
}

impl ReconcileTarget for ManifestSet<'_> {
    fn describe(&self) -> String {
        format!("{} manifest(s) in namespace {}", self.manifests.len(), self.namespace)
    }

    fn current_state(&self) -> Option<Vec<u8>> {
        let mut found = Vec::new();
        for manifest in &self.manifests {
            let mut get = self.kubectl("get", manifest);
            get.extend(args(["-o", "yaml"]));
            match self.runner.run("kubectl", &get) {
                Ok(output) if output.success() => found.push(output.stdout_str().into_owned()),
                Ok(_) | Err(_) => {
                    log::debug!("{} is not deployed yet", manifest.file.source().display());
                }
            }
        }

        if found.is_empty() {
            None
        } else {
            Some(found.join("---\n").into_bytes())
        }
    }

    fn has_crds(&self) -> bool {
        self.manifests.iter().any(|m| declares_crd(&m.content))
    }

    fn proposed_state(&self) -> Result<Vec<u8>> {
        let documents: Vec<&str> = self.manifests.iter().map(|m| m.content.as_str()).collect();
        Ok(documents.join("---\n").into_bytes())
    }

    fn show_diff(&self, _plan: &ReconciliationPlan) -> Result<()> {
        let mut changed = false;

        for manifest in &self.manifests {
            let output = self
                .runner
                .run("kubectl", &self.kubectl("diff", manifest))
                .map_err(|e| DeployError::DiffFailed(e.to_string()))?;

            match output.exit_code {
                0 => {}
                // Differences found
                1 => {
                    changed = true;
                    self.reporter.info(&format!("{}:", manifest.file.source().display()));
                    self.reporter
                        .block(&colorize_kubectl_diff(&output.stdout_str()));
                }
                _ => return Err(DeployError::DiffFailed(output.combined().trim().to_string())),
            }
        }

        if !changed {
            self.reporter.info("No changes detected");
        }
        Ok(())
    }

    fn apply(&self) -> Result<()> {
        for manifest in &self.manifests {
            run_checked(self.runner, "kubectl", &self.kubectl("apply", manifest))?;
            self.reporter
                .success(&format!("Applied {}", manifest.file.source().display()));
        }
        Ok(())
    }
}

/// Applies the manifests under `{values}/{stage}` and `{values}/common`.
pub struct ManifestDeployer<'a> {
    ctx: DeployContext<'a>,
}

impl<'a> ManifestDeployer<'a> {
    pub fn new(ctx: DeployContext<'a>) -> Self {
        Self { ctx }
    }

    /// Create the target namespace unless it already exists.
    fn ensure_namespace(&self) -> Result<()> {
        let namespace = self.ctx.config.namespace.as_str();
        let exists = self
            .ctx
            .runner
            .run("kubectl", &args(["get", "namespace", namespace]))
            .is_ok_and(|output| output.success());

        if !exists {
            self.ctx
                .run_checked("kubectl", &args(["create", "namespace", namespace]))?;
            self.ctx
                .reporter
                .info(&format!("Created namespace {namespace}"));
        }
        Ok(())
    }
}

impl Deployer for ManifestDeployer<'_> {
    fn deploy(&self) -> Result<ReconcileOutcome> {
        let config = self.ctx.config;
        let reporter = self.ctx.reporter.clone();

        let paths = discover_manifests(&config.values_path, &config.stage)?;
        if paths.is_empty() {
            return Err(DeployError::InvalidConfig(format!(
                "no manifests found in {}/{} or {}/common",
                config.values_path.display(),
                config.stage,
                config.values_path.display()
            )));
        }
        require_commands(self.ctx.runner, &["kubectl"])?;

        let processor = ValuesProcessor::from_config(config, reporter.clone())?;
        let patcher = NamespacePatcher::new(config.namespace.clone(), reporter.clone());
        let mut set = ManifestSet::new(self.ctx.runner, reporter, config.namespace.clone());
        for path in &paths {
            set.add(path, &processor, &patcher)?;
        }
        log::info!("Prepared {} manifest(s)", set.len());

        self.ensure_namespace()?;
        Ok(self.ctx.planner().reconcile(&set))
    }
}
