//! Secret resolution for values files and manifests.

use std::borrow::Cow;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::NamedTempFile;

use crate::common::Reporter;
use crate::config::Config;
use crate::error::{DeployError, Result};
use crate::manifest::apply_if_secret;
use crate::vault::{PlaceholderResolver, SecretStore, SecretStoreClient, count_placeholders};

/// A file ready to hand to helm or kubectl.
///
/// Rendered files live in a temporary file that is deleted when this value
/// is dropped, whichever way the deployment ends.
#[derive(Debug)]
pub enum ProcessedFile {
    Original(PathBuf),
    Rendered { source: PathBuf, file: NamedTempFile },
}

impl ProcessedFile {
    pub fn path(&self) -> &Path {
        match self {
            Self::Original(path) => path,
            Self::Rendered { file, .. } => file.path(),
        }
    }

    /// The file the content came from.
    pub fn source(&self) -> &Path {
        match self {
            Self::Original(path) | Self::Rendered { source: path, .. } => path,
        }
    }

    /// Path as a command-line argument.
    pub fn arg(&self) -> String {
        self.path().display().to_string()
    }

    pub fn is_rendered(&self) -> bool {
        matches!(self, Self::Rendered { .. })
    }
}

/// Write `content` to a temporary `{prefix}*.yml` file.
pub(crate) fn write_temp(prefix: &str, content: &str) -> Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix(prefix)
        .suffix(".yml")
        .tempfile()?;
    file.write_all(content.as_bytes())?;
    file.flush()?;
    Ok(file)
}

/// Resolves placeholders and encodes Secrets in deployment inputs.
pub struct ValuesProcessor {
    resolver: Option<PlaceholderResolver<Box<dyn SecretStore>>>,
    debug: bool,
    reporter: Arc<dyn Reporter>,
}

impl ValuesProcessor {
    /// Build from configuration; without a Vault URL files pass through.
    pub fn from_config(config: &Config, reporter: Arc<dyn Reporter>) -> Result<Self> {
        let store = match config.vault.store_config() {
            Some(store_config) => {
                let client = SecretStoreClient::new(store_config, reporter.clone())?;
                Some(Box::new(client) as Box<dyn SecretStore>)
            }
            None => None,
        };

        Ok(Self {
            resolver: store.map(PlaceholderResolver::new),
            debug: config.debug,
            reporter,
        })
    }

    /// Use `store` for every placeholder.
    pub fn with_store(store: Box<dyn SecretStore>, debug: bool, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            resolver: Some(PlaceholderResolver::new(store)),
            debug,
            reporter,
        }
    }

    /// Leave every file untouched.
    pub fn passthrough(reporter: Arc<dyn Reporter>) -> Self {
        Self {
            resolver: None,
            debug: false,
            reporter,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.resolver.is_some()
    }

    /// Resolve placeholders, then base64-encode any Secret data.
    pub fn render<'t>(&self, content: &'t str) -> Result<Cow<'t, str>> {
        let Some(resolver) = &self.resolver else {
            return Ok(Cow::Borrowed(content));
        };

        let resolved = resolver.resolve(content)?;
        let encoded = apply_if_secret(&resolved)?.into_owned();
        Ok(Cow::Owned(encoded))
    }

    /// Render `path` into a temporary `values-*.yml` file.
    pub fn process_file(&self, path: &Path) -> Result<ProcessedFile> {
        if !self.is_enabled() {
            log::debug!("No Vault URL configured, using original values file");
            return Ok(ProcessedFile::Original(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).map_err(|e| {
            DeployError::InvalidConfig(format!("failed to read values file {}: {}", path.display(), e))
        })?;
        log::debug!(
            "Resolving {} placeholder(s) in {}",
            count_placeholders(&content),
            path.display()
        );
        let rendered = self.render(&content)?;

        if self.debug {
            self.reporter.debug(&format!(
                "DEBUG: resolved content of {} (may contain secrets)",
                path.display()
            ));
            self.reporter.block(&rendered);
        }

        let file = write_temp("values-", &rendered)?;
        log::info!("Successfully processed values file: {}", file.path().display());
        Ok(ProcessedFile::Rendered {
            source: path.to_path_buf(),
            file,
        })
    }
}

fn first_match(pattern: &Path) -> Result<Option<PathBuf>> {
    Ok(all_matches(pattern)?.into_iter().next())
}

fn all_matches(pattern: &Path) -> Result<Vec<PathBuf>> {
    let pattern = pattern.to_string_lossy();
    let mut paths: Vec<PathBuf> = glob::glob(&pattern)?.filter_map(|entry| entry.ok()).collect();
    paths.sort();
    Ok(paths)
}

/// `common.y*ml` then `{stage}.y*ml` under `values_path`, first match each.
pub fn discover_values_files(values_path: &Path, stage: &str) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    files.extend(first_match(&values_path.join("common.y*ml"))?);
    files.extend(first_match(&values_path.join(format!("{stage}.y*ml")))?);
    Ok(files)
}

/// Manifests in `{values_path}/{stage}/` followed by `{values_path}/common/`.
pub fn discover_manifests(values_path: &Path, stage: &str) -> Result<Vec<PathBuf>> {
    let mut files = all_matches(&values_path.join(stage).join("*.y*ml"))?;
    files.extend(all_matches(&values_path.join("common").join("*.y*ml"))?);
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::MemoryReporter;
    use crate::vault::{SecretPath, VaultError};
    use std::collections::HashMap;

    struct MapStore(HashMap<String, String>);

    impl SecretStore for MapStore {
        fn fetch(&self, secret: &SecretPath) -> std::result::Result<String, VaultError> {
            let id = format!("{}/{}", secret.path, secret.key);
            self.0.get(&id).cloned().ok_or(VaultError::KeyNotFound {
                key: secret.key.clone(),
                path: secret.path.clone(),
            })
        }
    }

    fn processor(debug: bool) -> (ValuesProcessor, Arc<MemoryReporter>) {
        let reporter = Arc::new(MemoryReporter::new());
        let store = MapStore(HashMap::from([
            ("db/main/password".to_string(), "hunter2".to_string()),
            ("tls/ca/pem".to_string(), "line1\nline2".to_string()),
        ]));
        (
            ValuesProcessor::with_store(Box::new(store), debug, reporter.clone()),
            reporter,
        )
    }

    #[test]
    fn test_passthrough_keeps_original_path() {
        let processor = ValuesProcessor::passthrough(Arc::new(MemoryReporter::new()));
        let processed = processor.process_file(Path::new("helm/values/common.yaml")).unwrap();

        assert!(!processed.is_rendered());
        assert_eq!(processed.path(), Path::new("helm/values/common.yaml"));
    }

    #[test]
    fn test_rendered_file_resolves_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("common.yaml");
        fs::write(&source, "db:\n  password: <<vault.db/main/password>>\n").unwrap();

        let (processor, reporter) = processor(false);
        let processed = processor.process_file(&source).unwrap();
        let path = processed.path().to_path_buf();

        assert!(processed.is_rendered());
        assert_eq!(processed.source(), source.as_path());
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "db:\n  password: hunter2\n"
        );
        assert!(!reporter.mentions("hunter2"));

        drop(processed);
        assert!(!path.exists());
    }

    #[test]
    fn test_secret_manifests_are_encoded_after_resolution() {
        let (processor, _) = processor(false);
        let rendered = processor
            .render("kind: Secret\ndata:\n  password: <<vault.db/main/password>>\n")
            .unwrap();

        let value: serde_yaml::Value = serde_yaml::from_str(&rendered).unwrap();
        assert_eq!(value["data"]["password"].as_str(), Some("aHVudGVyMg=="));
    }

    #[test]
    fn test_debug_mode_prints_resolved_content() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("dev.yaml");
        fs::write(&source, "password: <<vault.db/main/password>>\n").unwrap();

        let (processor, reporter) = processor(true);
        processor.process_file(&source).unwrap();

        assert!(reporter.mentions("may contain secrets"));
        assert!(reporter.blocks().iter().any(|b| b.contains("hunter2")));
    }

    #[test]
    fn test_failed_resolution_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("dev.yaml");
        fs::write(&source, "a: <<vault.db/main/password>>\nb: <<vault.missing/x/y>>\n").unwrap();

        let (processor, _) = processor(false);
        let err = processor.process_file(&source).unwrap_err();
        assert!(matches!(err, DeployError::Vault(VaultError::KeyNotFound { .. })));
    }

    #[test]
    fn test_discover_values_files_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("dev.yml"), "").unwrap();
        fs::write(dir.path().join("common.yaml"), "").unwrap();
        fs::write(dir.path().join("live.yaml"), "").unwrap();

        let files = discover_values_files(dir.path(), "dev").unwrap();
        assert_eq!(
            files,
            vec![dir.path().join("common.yaml"), dir.path().join("dev.yml")]
        );
    }

    #[test]
    fn test_discover_manifests_stage_before_common() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("dev")).unwrap();
        fs::create_dir_all(dir.path().join("common")).unwrap();
        fs::write(dir.path().join("dev").join("b.yaml"), "").unwrap();
        fs::write(dir.path().join("dev").join("a.yml"), "").unwrap();
        fs::write(dir.path().join("common").join("ns.yaml"), "").unwrap();
        fs::write(dir.path().join("common").join("README.md"), "").unwrap();

        let files = discover_manifests(dir.path(), "dev").unwrap();
        assert_eq!(
            files,
            vec![
                dir.path().join("dev").join("a.yml"),
                dir.path().join("dev").join("b.yaml"),
                dir.path().join("common").join("ns.yaml"),
            ]
        );
    }
}
