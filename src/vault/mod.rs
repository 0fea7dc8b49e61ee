//! Vault secret templating.
//!
//! Values files and manifests reference secrets with `<<vault.path/key>>`
//! placeholders. [`PlaceholderResolver`] replaces every placeholder with the
//! value fetched through a [`SecretStore`], usually a [`SecretStoreClient`]
//! talking to a KV v1 or v2 engine.

pub mod client;
pub mod path;
pub mod resolver;

pub use client::{SecretStore, SecretStoreClient, StoreConfig};
pub use path::{KvVersion, SecretPath};
pub use resolver::{PlaceholderResolver, count_placeholders};

use thiserror::Error;

/// Errors raised while resolving secret placeholders.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("invalid vault placeholder {placeholder}: {reason}")]
    MalformedPlaceholder { placeholder: String, reason: String },

    #[error("invalid vault configuration: {0}")]
    InvalidConfig(String),

    #[error("vault request failed ({status}): {body}")]
    StoreRequestFailed { status: u16, body: String },

    #[error("key {key} not found in secret {path}")]
    KeyNotFound { key: String, path: String },

    #[error("failed to decode vault response: {0}")]
    Decode(String),

    #[error("vault request could not be sent: {0}")]
    Transport(#[from] reqwest::Error),
}
