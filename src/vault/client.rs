//! HTTP client for the Vault key/value engine.

use std::fmt;
use std::sync::Arc;

use reqwest::StatusCode;
use serde_json::Value;

use super::path::{KvVersion, SecretPath};
use super::VaultError;
use crate::common::Reporter;

const TOKEN_HEADER: &str = "X-Vault-Token";

/// Anything that can produce the value stored under a [`SecretPath`].
pub trait SecretStore {
    fn fetch(&self, secret: &SecretPath) -> Result<String, VaultError>;
}

impl<S: SecretStore + ?Sized> SecretStore for &S {
    fn fetch(&self, secret: &SecretPath) -> Result<String, VaultError> {
        (**self).fetch(secret)
    }
}

impl<S: SecretStore + ?Sized> SecretStore for Box<S> {
    fn fetch(&self, secret: &SecretPath) -> Result<String, VaultError> {
        (**self).fetch(secret)
    }
}

/// Connection settings for [`SecretStoreClient`].
#[derive(Clone, Default)]
pub struct StoreConfig {
    pub base_url: String,
    pub token: String,
    pub base_path: String,
    pub kv_version: u8,
    pub insecure_tls: bool,
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("base_url", &self.base_url)
            .field("token", &"[REDACTED]")
            .field("base_path", &self.base_path)
            .field("kv_version", &self.kv_version)
            .field("insecure_tls", &self.insecure_tls)
            .finish()
    }
}

/// Blocking client reading one secret per request.
pub struct SecretStoreClient {
    base_url: String,
    token: String,
    base_path: String,
    kv_version: KvVersion,
    http: reqwest::blocking::Client,
}

impl fmt::Debug for SecretStoreClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretStoreClient")
            .field("base_url", &self.base_url)
            .field("base_path", &self.base_path)
            .field("kv_version", &self.kv_version)
            .finish_non_exhaustive()
    }
}

impl SecretStoreClient {
    /// Create a client, rejecting unknown KV versions before any request.
    ///
    /// Disabling TLS verification is reported as a warning every time.
    pub fn new(config: StoreConfig, reporter: Arc<dyn Reporter>) -> Result<Self, VaultError> {
        let kv_version = KvVersion::from_number(config.kv_version)?;

        if config.insecure_tls {
            reporter.warn(
                "Skipping TLS verification for Vault. This is insecure and should not be used in production.",
            );
        }

        let http = reqwest::blocking::Client::builder()
            .user_agent(format!("helm-ci/{}", env!("CARGO_PKG_VERSION")))
            .danger_accept_invalid_certs(config.insecure_tls)
            .build()?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token,
            base_path: config.base_path,
            kv_version,
            http,
        })
    }

    /// Parse `placeholder` and fetch the value it points to.
    pub fn get_secret(&self, placeholder: &str) -> Result<String, VaultError> {
        let secret = SecretPath::parse(placeholder)?;
        self.fetch(&secret)
    }

    fn extract_key(&self, body: &str, secret_path: &str, key: &str) -> Result<String, VaultError> {
        let response: Value =
            serde_json::from_str(body).map_err(|e| VaultError::Decode(e.to_string()))?;

        let data = match self.kv_version {
            KvVersion::V2 => response.get("data").and_then(|d| d.get("data")),
            KvVersion::V1 => response.get("data"),
        };

        let data = data
            .and_then(Value::as_object)
            .ok_or_else(|| VaultError::Decode(format!("no data map in response for {secret_path}")))?;

        match data.get(key) {
            Some(Value::String(value)) => Ok(value.clone()),
            Some(value @ (Value::Number(_) | Value::Bool(_))) => Ok(value.to_string()),
            Some(_) => Err(VaultError::Decode(format!(
                "value of {key} in {secret_path} is not a scalar"
            ))),
            None => Err(VaultError::KeyNotFound {
                key: key.to_string(),
                path: secret_path.to_string(),
            }),
        }
    }
}

impl SecretStore for SecretStoreClient {
    fn fetch(&self, secret: &SecretPath) -> Result<String, VaultError> {
        let bound = secret.clone().with_mount(&self.base_path, self.kv_version);
        let secret_path = bound.build_secret_path();
        let url = format!("{}/v1/{}", self.base_url, secret_path);

        log::debug!("Fetching key {} from {}", bound.key, secret_path);
        let response = self
            .http
            .get(&url)
            .header(TOKEN_HEADER, &self.token)
            .send()?;

        let status = response.status();
        let body = response.text()?;

        if status != StatusCode::OK {
            return Err(VaultError::StoreRequestFailed {
                status: status.as_u16(),
                body,
            });
        }

        self.extract_key(&body, &secret_path, &bound.key)
    }
}
