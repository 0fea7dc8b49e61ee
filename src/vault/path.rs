//! Placeholder addressing grammar.
//!
//! A placeholder looks like `<<vault.team/app/password>>`: everything between
//! `vault.` and the last `/` is the secret's address, the last segment is the
//! key inside that secret.

use std::fmt;

use super::VaultError;

const OPEN: &str = "<<";
const CLOSE: &str = ">>";
const PREFIX: &str = "vault.";

/// REST layout of the key/value secret engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KvVersion {
    V1,
    #[default]
    V2,
}

impl KvVersion {
    /// Map the numeric version used on the command line.
    pub fn from_number(version: u8) -> Result<Self, VaultError> {
        match version {
            1 => Ok(Self::V1),
            2 => Ok(Self::V2),
            other => Err(VaultError::InvalidConfig(format!(
                "invalid KV version {other}: must be 1 or 2"
            ))),
        }
    }

    pub fn number(self) -> u8 {
        match self {
            Self::V1 => 1,
            Self::V2 => 2,
        }
    }
}

impl fmt::Display for KvVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// Parsed placeholder bound to a mount point and engine version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretPath {
    pub base_path: String,
    pub path: String,
    pub key: String,
    pub kv_version: KvVersion,
}

impl SecretPath {
    /// Parse a full placeholder token, `<<` and `>>` included.
    ///
    /// The returned path has an empty base path and the default engine
    /// version; use [`SecretPath::with_mount`] to bind it to a store.
    pub fn parse(placeholder: &str) -> Result<Self, VaultError> {
        let malformed = |reason: &str| VaultError::MalformedPlaceholder {
            placeholder: placeholder.to_string(),
            reason: reason.to_string(),
        };

        let inner = placeholder
            .strip_prefix(OPEN)
            .and_then(|rest| rest.strip_suffix(CLOSE))
            .ok_or_else(|| malformed("must be enclosed in <<>>"))?;

        let address = inner
            .strip_prefix(PREFIX)
            .ok_or_else(|| malformed("must start with vault."))?;

        let (path, key) = address
            .rsplit_once('/')
            .ok_or_else(|| malformed("must have at least one path segment and a key"))?;

        if path.is_empty() || key.is_empty() {
            return Err(malformed("path segments and key must not be empty"));
        }

        Ok(Self {
            base_path: String::new(),
            path: path.to_string(),
            key: key.to_string(),
            kv_version: KvVersion::default(),
        })
    }

    pub fn with_mount(mut self, base_path: &str, kv_version: KvVersion) -> Self {
        self.base_path = base_path.to_string();
        self.kv_version = kv_version;
        self
    }

    /// Request path below `/v1/`.
    ///
    /// KV v2 reads live under `{mount}/data/{path}`, KV v1 reads directly under
    /// `{mount}/{path}`. A trailing slash on the mount is ignored.
    pub fn build_secret_path(&self) -> String {
        let base = self.base_path.trim_end_matches('/');
        match self.kv_version {
            KvVersion::V2 => format!("{}/data/{}", base, self.path),
            KvVersion::V1 => format!("{}/{}", base, self.path),
        }
    }
}

impl fmt::Display for SecretPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{OPEN}{PREFIX}{}/{}{CLOSE}", self.path, self.key)
    }
}
