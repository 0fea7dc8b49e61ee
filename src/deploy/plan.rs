//! Diff-before-apply state machine.
//!
//! One attempt walks: fetch the deployed state (failure means first install),
//! probe for CustomResourceDefinitions on first installs, compute and show
//! the diff, ask for confirmation, apply. Diffing against a cluster that does
//! not know a chart's CRDs yet fails with a recognisable message; on a first
//! install that failure skips the preview instead of aborting.

use std::fmt;
use std::sync::{Arc, LazyLock};

use regex::Regex;

use crate::common::{Confirmation, Reporter};
use crate::error::{DeployError, Result};

/// What one deployment attempt is about to change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationPlan {
    /// `None` when nothing is deployed yet.
    pub current_state: Option<Vec<u8>>,
    /// Empty when the preview is skipped.
    pub proposed_state: Vec<u8>,
    pub must_skip_diff: bool,
    pub is_first_install: bool,
}

/// Something the planner can preview and apply.
pub trait ReconcileTarget {
    /// Short name used in progress messages.
    fn describe(&self) -> String;

    /// Currently deployed state, or `None` if nothing is deployed.
    fn current_state(&self) -> Option<Vec<u8>>;

    /// Whether the rendered output declares a CustomResourceDefinition.
    /// Probe failures count as "no".
    fn has_crds(&self) -> bool;

    fn proposed_state(&self) -> Result<Vec<u8>>;

    /// Show the changes `plan` describes.
    fn show_diff(&self, plan: &ReconciliationPlan) -> Result<()>;

    fn apply(&self) -> Result<()>;
}

/// Terminal state of one attempt.
#[derive(Debug)]
pub enum ReconcileOutcome {
    Applied,
    /// The confirmation gate said no. Nothing was changed.
    Cancelled,
    Failed(DeployError),
}

impl ReconcileOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

impl fmt::Display for ReconcileOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Applied => write!(f, "applied"),
            Self::Cancelled => write!(f, "deployment cancelled by user"),
            Self::Failed(e) => write!(f, "failed: {e}"),
        }
    }
}

static CRD_KIND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^kind:\s*["']?CustomResourceDefinition["']?\s*$"#).unwrap()
});

/// Whether rendered YAML declares a CustomResourceDefinition.
pub fn declares_crd(manifest: &str) -> bool {
    CRD_KIND.is_match(manifest)
}

/// Diff failure caused by resource kinds the cluster does not know yet.
pub fn is_missing_crd_error(message: &str) -> bool {
    message.contains("no matches for kind") && message.contains("ensure CRDs are installed first")
}

pub struct ReconciliationPlanner<'a> {
    confirmation: &'a dyn Confirmation,
    reporter: Arc<dyn Reporter>,
}

impl<'a> ReconciliationPlanner<'a> {
    pub fn new(confirmation: &'a dyn Confirmation, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            confirmation,
            reporter,
        }
    }

    /// Decide what the preview will show, without mutating anything.
    pub fn plan(&self, target: &dyn ReconcileTarget) -> Result<ReconciliationPlan> {
        let current_state = target.current_state();
        let mut plan = ReconciliationPlan {
            is_first_install: current_state.is_none(),
            current_state,
            ..Default::default()
        };

        if plan.is_first_install {
            log::info!("No existing deployment found for {}", target.describe());
            self.reporter.info("Checking if chart contains CRDs...");
            if target.has_crds() {
                self.reporter
                    .info("Chart contains CRDs. Skipping diff preview to avoid CRD issues.");
                plan.must_skip_diff = true;
                return Ok(plan);
            }
        }

        match target.proposed_state() {
            Ok(proposed) => plan.proposed_state = proposed,
            Err(e) => self.recover(e, &mut plan)?,
        }
        Ok(plan)
    }

    /// Run the whole attempt to a terminal state.
    pub fn reconcile(&self, target: &dyn ReconcileTarget) -> ReconcileOutcome {
        let mut plan = match self.plan(target) {
            Ok(plan) => plan,
            Err(e) => return ReconcileOutcome::Failed(e),
        };

        if !plan.must_skip_diff {
            self.reporter.success("Showing differences:");
            if let Err(e) = target.show_diff(&plan) {
                if let Err(e) = self.recover(e, &mut plan) {
                    return ReconcileOutcome::Failed(e);
                }
            }
        }

        if plan.must_skip_diff {
            self.reporter
                .info("Proceeding with installation (CRDs will be installed automatically)...");
        } else if !self.confirmation.confirm("Do you want to proceed with the deployment?") {
            self.reporter.warn("Deployment cancelled by user");
            return ReconcileOutcome::Cancelled;
        }

        match target.apply() {
            Ok(()) => {
                self.reporter
                    .success(&format!("Deployed {}", target.describe()));
                ReconcileOutcome::Applied
            }
            Err(e) => ReconcileOutcome::Failed(e),
        }
    }

    /// Swallow a diff failure when it only means "CRDs not installed yet" on
    /// a first install.
    fn recover(&self, error: DeployError, plan: &mut ReconciliationPlan) -> Result<()> {
        if plan.is_first_install && is_missing_crd_error(&error.to_string()) {
            self.reporter.warn(
                "Diff failed due to missing CRDs. Proceeding directly with installation.",
            );
            plan.must_skip_diff = true;
            plan.proposed_state.clear();
            return Ok(());
        }

        match error {
            DeployError::DiffFailed(_) => Err(error),
            other => Err(DeployError::DiffFailed(other.to_string())),
        }
    }
}
