use clap::{ArgAction, Parser};
use std::path::PathBuf;

use crate::config::{Config, FileConfig, VaultSettings};

#[derive(Parser, Debug)]
#[command(name = "helm-ci")]
#[command(version = env!("CARGO_PKG_VERSION"))]
// `--version` selects the chart version
#[command(disable_version_flag = true)]
#[command(about = "Deploy Helm charts and Kubernetes manifests with Vault secrets")]
#[command(long_about = "Resolves <<vault.path/key>> placeholders in values files and manifests, \
binds manifests to the target namespace, previews the changes against the cluster and applies \
them after confirmation.")]
pub struct Cli {
    /// Deployment stage (dev/live)
    #[arg(long)]
    pub stage: Option<String>,

    /// Application name
    #[arg(long)]
    pub app: Option<String>,

    /// Environment
    #[arg(long = "env")]
    pub environment: Option<String>,

    /// PR number
    #[arg(long)]
    pub pr: Option<String>,

    /// Path to values files
    #[arg(long = "values", value_name = "DIR", default_value = "helm/values")]
    pub values_path: PathBuf,

    /// Helm chart
    #[arg(long)]
    pub chart: Option<String>,

    /// Chart version
    #[arg(long)]
    pub version: Option<String>,

    /// Helm repository (an oci:// URL or a chart repository URL)
    #[arg(long = "repo")]
    pub repository: Option<String>,

    /// Comma-separated list of domains
    #[arg(long, value_delimiter = ',')]
    pub domains: Vec<String>,

    /// Domain template: default, bitnami, vault or a path to a template file
    #[arg(long, default_value = "default")]
    pub domain_template: String,

    /// Custom Kubernetes namespace
    #[arg(long)]
    pub custom_namespace: Option<String>,

    /// Suffix the custom namespace with the stage (except on live)
    #[arg(long)]
    pub custom_namespace_staged: bool,

    /// Apply raw manifests with kubectl instead of installing a chart
    #[arg(long)]
    pub custom: bool,

    /// Expose the Traefik dashboard on the ingress hosts
    #[arg(long)]
    pub traefik_dashboard: bool,

    /// Root CA certificate, as a file path or an http(s) URL
    #[arg(long, value_name = "PATH_OR_URL")]
    pub root_ca: Option<String>,

    /// Enable PR deployments
    #[arg(long, default_value_t = true, num_args = 0..=1, default_missing_value = "true", action = ArgAction::Set)]
    pub pr_deployments: bool,

    /// Vault server URL; secret resolution is skipped when unset
    #[arg(long)]
    pub vault_url: Option<String>,

    /// Vault authentication token
    #[arg(long, env = "VAULT_TOKEN", hide_env_values = true)]
    pub vault_token: Option<String>,

    /// Base path (mount) for Vault secrets
    #[arg(long)]
    pub vault_base_path: Option<String>,

    /// Allow insecure TLS connections to Vault (not recommended for production)
    #[arg(long)]
    pub vault_insecure_tls: bool,

    /// Vault KV version (1 or 2) [default: 2]
    #[arg(long, value_name = "VERSION")]
    pub vault_kv_version: Option<u8>,

    /// DEBUG output; THIS MAY OUTPUT SECRETS!!!
    #[arg(long)]
    pub debug: bool,

    /// Deploy without asking for confirmation
    #[arg(short = 'y', long = "yes")]
    pub auto_approve: bool,

    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    pub quiet: bool,
}

impl Cli {
    /// Initialize logging based on verbosity level
    pub fn init_logging(&self) {
        if self.quiet {
            return;
        }

        let level = match self.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        };

        env_logger::Builder::from_default_env()
            .filter_level(level)
            .init();
    }

    /// Merge the flags with file defaults. Flags win.
    ///
    /// Derived names are not set here; call [`Config::setup_names`].
    pub fn to_config(&self, file: &FileConfig) -> Config {
        let mut vault = VaultSettings {
            url: self.vault_url.clone().filter(|u| !u.is_empty()),
            token: self.vault_token.clone().filter(|t| !t.is_empty()),
            base_path: self.vault_base_path.clone().unwrap_or_default(),
            kv_version: self.vault_kv_version.or(file.vault.kv_version).unwrap_or(2),
            insecure_tls: self.vault_insecure_tls,
        };
        file.vault.apply_defaults(&mut vault);

        Config {
            app_name: self.app.clone().unwrap_or_default(),
            stage: self.stage.clone().unwrap_or_default(),
            environment: self.environment.clone().unwrap_or_default(),
            pr_number: self.pr.clone().filter(|pr| !pr.is_empty()),
            pr_deployments: self.pr_deployments,
            values_path: self.values_path.clone(),
            chart: self.chart.clone(),
            version: self.version.clone(),
            repository: self.repository.clone(),
            domains: self
                .domains
                .iter()
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty())
                .collect(),
            domain_template: self.domain_template.clone(),
            custom: self.custom,
            custom_namespace: self.custom_namespace.clone(),
            custom_namespace_staged: self.custom_namespace_staged,
            traefik_dashboard: self.traefik_dashboard,
            root_ca: self.root_ca.clone(),
            vault,
            debug: self.debug,
            auto_approve: self.auto_approve,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("helm-ci").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&["--app", "shop", "--stage", "dev", "--env", "prod"]);
        let config = cli.to_config(&FileConfig::default());

        assert_eq!(config.values_path, PathBuf::from("helm/values"));
        assert_eq!(config.domain_template, "default");
        assert!(config.pr_deployments);
        assert_eq!(config.vault.kv_version, 2);
        assert!(!config.custom);
    }

    #[test]
    fn test_domains_are_split_and_trimmed() {
        let cli = parse(&["--domains", "example.com, example.org,"]);
        assert_eq!(
            cli.to_config(&FileConfig::default()).domains,
            vec!["example.com", "example.org"]
        );
    }

    #[test]
    fn test_pr_deployments_can_be_disabled() {
        assert!(!parse(&["--pr-deployments", "false"]).pr_deployments);
        assert!(!parse(&["--pr-deployments=false"]).pr_deployments);
        assert!(parse(&["--pr-deployments"]).pr_deployments);
    }

    #[test]
    fn test_chart_version_flag() {
        let cli = parse(&["--chart", "traefik", "--version", "34.1.0"]);
        assert_eq!(cli.version.as_deref(), Some("34.1.0"));
    }

    #[test]
    fn test_flags_override_file() {
        let file: FileConfig = toml::from_str(
            "[vault]\nurl = \"https://file.vault\"\nbase_path = \"kv\"\nkv_version = 1\n",
        )
        .unwrap();

        let from_file = parse(&[]).to_config(&file);
        assert_eq!(from_file.vault.url.as_deref(), Some("https://file.vault"));
        assert_eq!(from_file.vault.base_path, "kv");
        assert_eq!(from_file.vault.kv_version, 1);

        let overridden = parse(&[
            "--vault-url",
            "https://cli.vault",
            "--vault-kv-version",
            "2",
        ])
        .to_config(&file);
        assert_eq!(overridden.vault.url.as_deref(), Some("https://cli.vault"));
        assert_eq!(overridden.vault.kv_version, 2);
    }
}
