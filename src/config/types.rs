use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::common::Reporter;
use crate::error::{DeployError, Result};
use crate::vault::StoreConfig;

/// Everything one deployment run needs to know.
#[derive(Debug, Clone)]
pub struct Config {
    pub app_name: String,
    pub stage: String,
    pub environment: String,
    pub pr_number: Option<String>,
    pub pr_deployments: bool,
    pub values_path: PathBuf,

    pub chart: Option<String>,
    pub version: Option<String>,
    pub repository: Option<String>,

    pub domains: Vec<String>,
    pub domain_template: String,

    pub custom: bool,
    pub custom_namespace: Option<String>,
    pub custom_namespace_staged: bool,
    pub traefik_dashboard: bool,
    pub root_ca: Option<String>,

    pub vault: VaultSettings,

    /// Prints resolved files, secrets included.
    pub debug: bool,
    pub auto_approve: bool,

    // Derived by `setup_names`
    pub namespace: String,
    pub release_name: String,
    pub ingress_hosts: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_name: String::new(),
            stage: String::new(),
            environment: String::new(),
            pr_number: None,
            pr_deployments: true,
            values_path: PathBuf::from("helm/values"),
            chart: None,
            version: None,
            repository: None,
            domains: Vec::new(),
            domain_template: "default".to_string(),
            custom: false,
            custom_namespace: None,
            custom_namespace_staged: false,
            traefik_dashboard: false,
            root_ca: None,
            vault: VaultSettings::default(),
            debug: false,
            auto_approve: false,
            namespace: String::new(),
            release_name: String::new(),
            ingress_hosts: Vec::new(),
        }
    }
}

/// Connection details for the secret store.
#[derive(Clone)]
pub struct VaultSettings {
    /// Secret resolution is skipped entirely when unset.
    pub url: Option<String>,
    pub token: Option<String>,
    pub base_path: String,
    pub kv_version: u8,
    pub insecure_tls: bool,
}

impl Default for VaultSettings {
    fn default() -> Self {
        Self {
            url: None,
            token: None,
            base_path: String::new(),
            kv_version: 2,
            insecure_tls: false,
        }
    }
}

impl fmt::Debug for VaultSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultSettings")
            .field("url", &self.url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("base_path", &self.base_path)
            .field("kv_version", &self.kv_version)
            .field("insecure_tls", &self.insecure_tls)
            .finish()
    }
}

impl VaultSettings {
    /// Client settings, or `None` when no store is configured.
    pub fn store_config(&self) -> Option<StoreConfig> {
        let url = self.url.as_deref().filter(|u| !u.is_empty())?;
        Some(StoreConfig {
            base_url: url.to_string(),
            token: self.token.clone().unwrap_or_default(),
            base_path: self.base_path.clone(),
            kv_version: self.kv_version,
            insecure_tls: self.insecure_tls,
        })
    }
}

/// Defaults read from `.helm-ci.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub vault: VaultFileConfig,
}

/// The `[vault]` table. Tokens are not accepted here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultFileConfig {
    pub url: Option<String>,
    pub base_path: Option<String>,
    pub kv_version: Option<u8>,
    pub insecure_tls: Option<bool>,
}

impl VaultFileConfig {
    /// Fill the settings the command line left empty.
    pub fn apply_defaults(&self, settings: &mut VaultSettings) {
        if settings.url.is_none() {
            settings.url = self.url.clone();
        }
        if settings.base_path.is_empty() {
            if let Some(base_path) = &self.base_path {
                settings.base_path = base_path.clone();
            }
        }
        if let Some(insecure) = self.insecure_tls {
            settings.insecure_tls |= insecure;
        }
    }
}

/// Whether a configuration value may be printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Redacted,
    Public,
}

/// One row of the printable configuration table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigEntry {
    pub name: &'static str,
    pub value: String,
    pub visibility: Visibility,
}

impl ConfigEntry {
    /// A redacted entry; call [`ConfigEntry::public`] to allow printing.
    pub fn new(name: &'static str, value: impl fmt::Display) -> Self {
        Self {
            name,
            value: value.to_string(),
            visibility: Visibility::Redacted,
        }
    }

    pub fn public(mut self) -> Self {
        self.visibility = Visibility::Public;
        self
    }

    pub fn render(&self) -> String {
        match self.visibility {
            Visibility::Public => format!("{}: {}", self.name, self.value),
            Visibility::Redacted => format!("{}: [REDACTED]", self.name),
        }
    }
}

fn optional(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("")
}

impl Config {
    /// Reject configurations that cannot produce a deployment.
    pub fn validate(&self) -> Result<()> {
        if self.app_name.is_empty() {
            return Err(DeployError::InvalidConfig("app name is required".to_string()));
        }
        if self.stage.is_empty() {
            return Err(DeployError::InvalidConfig("stage is required".to_string()));
        }
        if self.environment.is_empty() {
            return Err(DeployError::InvalidConfig("environment is required".to_string()));
        }
        if !matches!(self.vault.kv_version, 1 | 2) {
            return Err(DeployError::InvalidConfig(format!(
                "vault KV version must be 1 or 2, got {}",
                self.vault.kv_version
            )));
        }
        Ok(())
    }

    fn is_pr_deployment(&self) -> bool {
        self.stage == "dev"
            && self.pr_deployments
            && self.pr_number.as_deref().is_some_and(|pr| !pr.is_empty())
    }

    /// Derive namespace, release name and ingress hosts.
    pub fn setup_names(&mut self) {
        self.namespace = match self.custom_namespace.as_deref().filter(|ns| !ns.is_empty()) {
            Some(custom) if self.custom_namespace_staged && self.stage != "live" => {
                format!("{}-{}", custom, self.stage)
            }
            Some(custom) => custom.to_string(),
            None if self.stage == "live" => self.app_name.clone(),
            None => format!("{}-{}", self.app_name, self.stage),
        };

        let host_prefix = if self.is_pr_deployment() {
            format!("{}-pr-{}", self.app_name, optional(&self.pr_number))
        } else {
            self.app_name.clone()
        };

        self.release_name = host_prefix.clone();
        self.ingress_hosts = self
            .domains
            .iter()
            .map(|domain| format!("{host_prefix}.{domain}"))
            .collect();
    }

    /// The configuration as a printable table.
    ///
    /// New fields are redacted unless they are marked public here.
    pub fn entries(&self) -> Vec<ConfigEntry> {
        vec![
            ConfigEntry::new("AppName", &self.app_name).public(),
            ConfigEntry::new("Stage", &self.stage).public(),
            ConfigEntry::new("Environment", &self.environment).public(),
            ConfigEntry::new("PRNumber", optional(&self.pr_number)).public(),
            ConfigEntry::new("PRDeployments", self.pr_deployments).public(),
            ConfigEntry::new("ValuesPath", self.values_path.display()).public(),
            ConfigEntry::new("Chart", optional(&self.chart)).public(),
            ConfigEntry::new("Version", optional(&self.version)).public(),
            ConfigEntry::new("Repository", optional(&self.repository)).public(),
            ConfigEntry::new("Domains", self.domains.join(",")).public(),
            ConfigEntry::new("DomainTemplate", &self.domain_template).public(),
            ConfigEntry::new("Custom", self.custom).public(),
            ConfigEntry::new("CustomNamespace", optional(&self.custom_namespace)).public(),
            ConfigEntry::new("CustomNamespaceStaged", self.custom_namespace_staged).public(),
            ConfigEntry::new("TraefikDashboard", self.traefik_dashboard).public(),
            ConfigEntry::new("RootCA", optional(&self.root_ca)).public(),
            ConfigEntry::new("VaultURL", optional(&self.vault.url)).public(),
            ConfigEntry::new("VaultToken", optional(&self.vault.token)),
            ConfigEntry::new("VaultBasePath", &self.vault.base_path).public(),
            ConfigEntry::new("VaultKVVersion", self.vault.kv_version).public(),
            ConfigEntry::new("VaultInsecureTLS", self.vault.insecure_tls).public(),
            ConfigEntry::new("Debug", self.debug).public(),
            ConfigEntry::new("Namespace", &self.namespace).public(),
            ConfigEntry::new("ReleaseName", &self.release_name).public(),
            ConfigEntry::new("IngressHosts", self.ingress_hosts.join(",")).public(),
        ]
    }

    pub fn print(&self, reporter: &dyn Reporter) {
        reporter.info("Current Configuration:");
        for entry in self.entries() {
            reporter.info(&entry.render());
        }
    }
}
