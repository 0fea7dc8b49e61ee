//! Ingress values rendered from domain templates.
//!
//! A template name without `/` selects one of the built-in templates (or,
//! failing that, `deploy/templates/domains/{name}.yml`); anything containing
//! `/` is read as a path to a custom template.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tera::{Context, Tera};

use crate::config::Config;
use crate::error::{DeployError, Result};

const DEFAULT_TEMPLATE: &str = include_str!("domains/default.yml");
const BITNAMI_TEMPLATE: &str = include_str!("domains/bitnami.yml");
const VAULT_TEMPLATE: &str = include_str!("domains/vault.yml");

/// Directory searched for named templates that are not built in.
const TEMPLATE_DIR: &str = "deploy/templates/domains";

/// Built-in template by name.
pub fn embedded_template(name: &str) -> Option<&'static str> {
    match name {
        "default" => Some(DEFAULT_TEMPLATE),
        "bitnami" => Some(BITNAMI_TEMPLATE),
        "vault" => Some(VAULT_TEMPLATE),
        _ => None,
    }
}

pub fn list_embedded_templates() -> &'static [&'static str] {
    &["default", "bitnami", "vault"]
}

/// Template source for `name`.
pub fn load_template(name: &str) -> Result<String> {
    if name.contains('/') {
        log::debug!("Reading custom template file: {}", name);
        return fs::read_to_string(name).map_err(|e| {
            DeployError::Template(format!("failed to read domain template file {name}: {e}"))
        });
    }

    if let Some(content) = embedded_template(name) {
        log::debug!("Using embedded template: {}", name);
        return Ok(content.to_string());
    }

    let fallback: PathBuf = Path::new(TEMPLATE_DIR).join(format!("{name}.yml"));
    log::debug!(
        "Embedded template '{}' not found, checking file: {}",
        name,
        fallback.display()
    );
    fs::read_to_string(&fallback).map_err(|_| {
        DeployError::Template(format!(
            "template '{}' not found. Available built-in templates: {}",
            name,
            list_embedded_templates().join(", ")
        ))
    })
}

/// Render the configured domain template.
///
/// Returns `None` when the configuration has no ingress hosts.
pub fn render_domain_values(config: &Config) -> Result<Option<String>> {
    if config.ingress_hosts.is_empty() {
        return Ok(None);
    }

    let source = load_template(&config.domain_template)?;
    let mut context = Context::new();
    context.insert("domains", &config.domains);
    context.insert("ingress_hosts", &config.ingress_hosts);
    context.insert("app", &config.app_name);
    context.insert("namespace", &config.namespace);
    context.insert("stage", &config.stage);

    let rendered = Tera::one_off(&source, &context, false)?;
    Ok(Some(rendered))
}

/// Render the domain template into a `domains-*.yml` file that is removed
/// when the handle is dropped.
pub fn write_domain_values(config: &Config) -> Result<Option<NamedTempFile>> {
    let Some(rendered) = render_domain_values(config)? else {
        return Ok(None);
    };

    let mut file = tempfile::Builder::new()
        .prefix("domains-")
        .suffix(".yml")
        .tempfile()?;
    file.write_all(rendered.as_bytes())?;
    file.flush()?;

    log::info!("Using template: {}", config.domain_template);
    Ok(Some(file))
}
