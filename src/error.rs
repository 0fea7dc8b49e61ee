//! Error types for helm-ci.

use thiserror::Error;

use crate::manifest::ManifestError;
use crate::vault::VaultError;

/// Anything that aborts a deployment before it reaches the cluster.
#[derive(Debug, Error)]
pub enum DeployError {
    /// Secret lookup or placeholder parsing failed
    #[error(transparent)]
    Vault(#[from] VaultError),

    /// A manifest could not be rewritten
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Domain template missing or failed to render
    #[error("template error: {0}")]
    Template(String),

    /// An external tool exited unsuccessfully
    #[error("{command} failed: {message}")]
    Command { command: String, message: String },

    /// Computing the change preview failed
    #[error("failed to compute diff: {0}")]
    DiffFailed(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid file pattern: {0}")]
    Glob(String),

    /// Root CA download failed
    #[error("failed to download root CA: {0}")]
    Download(#[from] reqwest::Error),
}

impl DeployError {
    pub fn command(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Command {
            command: command.into(),
            message: message.into(),
        }
    }
}

impl From<glob::PatternError> for DeployError {
    fn from(e: glob::PatternError) -> Self {
        Self::Glob(e.to_string())
    }
}

impl From<tera::Error> for DeployError {
    fn from(e: tera::Error) -> Self {
        // Tera keeps the useful part of the message in the source chain
        let mut message = e.to_string();
        let mut source = std::error::Error::source(&e);
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        Self::Template(message)
    }
}

pub type Result<T> = std::result::Result<T, DeployError>;
