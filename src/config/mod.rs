pub mod types;

pub use types::{Config, ConfigEntry, FileConfig, VaultFileConfig, VaultSettings, Visibility};

use crate::error::{DeployError, Result};
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = ".helm-ci.toml";

/// Get the global config file path (~/.helm-ci.toml)
pub fn global_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(CONFIG_FILE_NAME))
}

/// Get the local config file path (dir/.helm-ci.toml)
pub fn local_config_path(dir: &Path) -> PathBuf {
    dir.join(CONFIG_FILE_NAME)
}

/// Load file defaults.
///
/// An explicit path must exist and parse. Otherwise the working directory is
/// checked first, then the home directory; unreadable files there are
/// skipped with a warning.
pub fn load_config(explicit: Option<&Path>) -> Result<FileConfig> {
    if let Some(path) = explicit {
        let content = fs::read_to_string(path).map_err(|e| {
            DeployError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        return parse(&content, path);
    }

    let candidates = [Some(local_config_path(Path::new("."))), global_config_path()];
    for path in candidates.into_iter().flatten() {
        if !path.exists() {
            continue;
        }
        match fs::read_to_string(&path).map_err(DeployError::from).and_then(|c| parse(&c, &path)) {
            Ok(config) => {
                log::debug!("Loaded configuration from {}", path.display());
                return Ok(config);
            }
            Err(e) => log::warn!("Ignoring {}: {}", path.display(), e),
        }
    }

    Ok(FileConfig::default())
}

fn parse(content: &str, path: &Path) -> Result<FileConfig> {
    toml::from_str(content)
        .map_err(|e| DeployError::InvalidConfig(format!("{}: {}", path.display(), e)))
}
