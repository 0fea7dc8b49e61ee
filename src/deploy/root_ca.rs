//! Distributes a custom root certificate into the target namespace as the
//! `custom-root-ca` secret, so charts can mount it.

use std::fs;
use std::io::Write;

use tempfile::NamedTempFile;

use super::DeployContext;
use super::values::write_temp;
use crate::common::args;
use crate::error::{DeployError, Result};

const SECRET_NAME: &str = "custom-root-ca";

fn is_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// Certificate bytes from a local file or an `http(s)://` URL.
///
/// Downloads skip TLS verification; the certificate being fetched is usually
/// the one that would be needed to verify the server.
fn read_certificate(source: &str) -> Result<Vec<u8>> {
    if !is_url(source) {
        return fs::read(source).map_err(|e| {
            DeployError::InvalidConfig(format!("cannot read root CA file {source}: {e}"))
        });
    }

    log::warn!("Downloading root CA from {} without TLS verification", source);
    let client = reqwest::blocking::Client::builder()
        .user_agent(format!("helm-ci/{}", env!("CARGO_PKG_VERSION")))
        .danger_accept_invalid_certs(true)
        .build()?;
    let response = client.get(source).send()?.error_for_status()?;
    Ok(response.bytes()?.to_vec())
}

fn write_certificate(content: &[u8]) -> Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("root-ca-")
        .suffix(".crt")
        .tempfile()?;
    file.write_all(content)?;
    file.flush()?;
    Ok(file)
}

/// Render a resource with `kubectl ... --dry-run=client -o yaml` and apply
/// the result from a temporary file.
fn apply_rendered(ctx: &DeployContext<'_>, render_args: Vec<String>) -> Result<()> {
    let rendered = ctx.run_checked("kubectl", &render_args)?;
    let manifest = write_temp("root-ca-", &rendered.stdout_str())?;
    let path = manifest.path().display().to_string();
    ctx.run_checked("kubectl", &args(["apply", "-f", path.as_str()]))?;
    Ok(())
}

/// Create the namespace if needed and apply the `custom-root-ca` secret.
pub fn setup_root_ca(ctx: &DeployContext<'_>, source: &str) -> Result<()> {
    let namespace = ctx.config.namespace.as_str();
    ctx.reporter.info(&format!("Setting up root CA from {source}"));

    let certificate = read_certificate(source)?;
    let cert_file = write_certificate(&certificate)?;
    log::debug!("Root CA written to {}", cert_file.path().display());

    apply_rendered(
        ctx,
        args([
            "create",
            "namespace",
            namespace,
            "--dry-run=client",
            "-o",
            "yaml",
        ]),
    )?;

    let from_file = format!("--from-file=ca.crt={}", cert_file.path().display());
    apply_rendered(
        ctx,
        args([
            "create",
            "secret",
            "generic",
            SECRET_NAME,
            from_file.as_str(),
            "-n",
            namespace,
            "--dry-run=client",
            "-o",
            "yaml",
        ]),
    )?;

    ctx.reporter.success("Root CA setup completed successfully");
    Ok(())
}
