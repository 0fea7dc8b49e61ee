use std::fs;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use helm_ci::common::{Level, MemoryReporter, ProcessOutput, RecordingRunner, StaticConfirmation};
use helm_ci::config::Config;
use helm_ci::deploy::ValuesProcessor;
use helm_ci::{DeployError, ReconcileOutcome};
use tempfile::TempDir;

/// End-to-end deployment scenarios driven through `helm_ci::deploy` with a
/// recording process runner instead of a cluster

const CRD_ERROR: &str = "Error: unable to build kubernetes objects from release manifest: \
resource mapping not found for name: \"default\" namespace: \"\" from \"\": no matches for kind \
\"IngressRoute\" in version \"traefik.io/v1alpha1\"\nensure CRDs are installed first";

fn create_values(dir: &Path) {
    fs::write(dir.join("common.yaml"), "replicaCount: 1\n").unwrap();
    fs::write(dir.join("dev.yaml"), "image:\n  tag: dev\n").unwrap();
}

fn helm_config(values: &Path) -> Config {
    let mut config = Config {
        app_name: "shop".to_string(),
        stage: "dev".to_string(),
        environment: "prod".to_string(),
        chart: Some("shop".to_string()),
        repository: Some("https://charts.example.com".to_string()),
        version: Some("1.4.2".to_string()),
        domains: vec!["example.com".to_string()],
        values_path: values.to_path_buf(),
        ..Default::default()
    };
    config.setup_names();
    config
}

fn upgrade_calls(runner: &RecordingRunner) -> Vec<String> {
    runner
        .lines()
        .into_iter()
        .filter(|line| line.starts_with("helm upgrade"))
        .collect()
}

#[test]
fn test_existing_release_is_previewed_and_upgraded() {
    let values = TempDir::new().unwrap();
    create_values(values.path());
    let config = helm_config(values.path());

    let runner = RecordingRunner::new();
    runner.respond("helm get manifest", ProcessOutput::ok("replicaCount: 1\n"));
    runner.respond(
        "helm upgrade",
        ProcessOutput::ok("NAME: shop\nMANIFEST:\nreplicaCount: 2\nNOTES:\nenjoy\n"),
    );
    let gate = StaticConfirmation::approve();
    let reporter = Arc::new(MemoryReporter::new());

    let outcome = helm_ci::deploy(&config, &runner, &gate, reporter.clone()).unwrap();
    assert!(outcome.is_applied());

    let lines = runner.lines();
    assert_eq!(lines[0], "helm repo add shop https://charts.example.com");
    assert_eq!(lines[1], "helm repo update");
    assert_eq!(lines[2], "helm get manifest shop -n shop-dev");

    let upgrades = upgrade_calls(&runner);
    assert_eq!(upgrades.len(), 2);
    assert!(upgrades[0].ends_with("--dry-run"));
    assert!(upgrades[0].starts_with(&upgrades[1]));

    // Domain values come first, then common and stage values, then the version
    let calls = runner.calls();
    let apply = &calls.last().unwrap().args;
    let values_args: Vec<&String> = apply
        .windows(2)
        .filter(|pair| pair[0] == "--values")
        .map(|pair| &pair[1])
        .collect();
    assert_eq!(values_args.len(), 3);
    assert!(
        Path::new(values_args[0])
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("domains-")
    );
    assert_eq!(PathBuf::from(values_args[1]), values.path().join("common.yaml"));
    assert_eq!(PathBuf::from(values_args[2]), values.path().join("dev.yaml"));
    assert!(apply.ends_with(&["--version".to_string(), "1.4.2".to_string()]));

    // The rendered domain file is gone once the deployment returns
    assert!(!Path::new(values_args[0]).exists());

    assert!(reporter.mentions("Showing differences:"));
    assert!(reporter.blocks().iter().any(|block| block.contains("replicaCount: 2")));
    assert_eq!(gate.times_asked(), 1);
}

#[test]
fn test_first_install_with_crds_skips_preview() {
    let values = TempDir::new().unwrap();
    create_values(values.path());
    let config = helm_config(values.path());

    let runner = RecordingRunner::new();
    runner.respond("helm get manifest", ProcessOutput::failed(1, "Error: release: not found"));
    runner.respond(
        "helm template",
        ProcessOutput::ok("---\napiVersion: apiextensions.k8s.io/v1\nkind: CustomResourceDefinition\n"),
    );
    // A rejecting gate proves no confirmation is requested
    let gate = StaticConfirmation::reject();
    let reporter = Arc::new(MemoryReporter::new());

    let outcome = helm_ci::deploy(&config, &runner, &gate, reporter.clone()).unwrap();
    assert!(outcome.is_applied());

    assert!(runner.has_run(
        "helm template shop shop/shop --include-crds --namespace shop-dev --version 1.4.2 --dry-run"
    ));
    let upgrades = upgrade_calls(&runner);
    assert_eq!(upgrades.len(), 1);
    assert!(!upgrades[0].contains("--dry-run"));
    assert_eq!(gate.times_asked(), 0);
    assert!(reporter.mentions("Chart contains CRDs. Skipping diff preview"));
}

#[test]
fn test_first_install_missing_crd_dry_run_proceeds() {
    let values = TempDir::new().unwrap();
    let config = helm_config(values.path());

    let runner = RecordingRunner::new();
    runner.respond("helm get manifest", ProcessOutput::failed(1, "Error: release: not found"));
    runner.respond("helm upgrade", ProcessOutput::failed(1, CRD_ERROR));
    let gate = StaticConfirmation::reject();
    let reporter = Arc::new(MemoryReporter::new());

    let outcome = helm_ci::deploy(&config, &runner, &gate, reporter.clone()).unwrap();

    // The dry run and the real upgrade both fail here; what matters is that
    // the attempt got past the preview without asking
    assert!(matches!(outcome, ReconcileOutcome::Failed(DeployError::Command { .. })));
    assert_eq!(upgrade_calls(&runner).len(), 2);
    assert_eq!(gate.times_asked(), 0);
    assert!(reporter.contains(Level::Warn, "Diff failed due to missing CRDs"));
}

#[test]
fn test_existing_release_missing_crd_dry_run_fails() {
    let values = TempDir::new().unwrap();
    let config = helm_config(values.path());

    let runner = RecordingRunner::new();
    runner.respond("helm get manifest", ProcessOutput::ok("kind: Service\n"));
    runner.respond("helm upgrade", ProcessOutput::failed(1, CRD_ERROR));
    let gate = StaticConfirmation::approve();

    let outcome = helm_ci::deploy(&config, &runner, &gate, Arc::new(MemoryReporter::new())).unwrap();

    assert!(matches!(outcome, ReconcileOutcome::Failed(DeployError::DiffFailed(_))));
    assert_eq!(upgrade_calls(&runner).len(), 1);
    assert_eq!(gate.times_asked(), 0);
}

#[test]
fn test_declined_upgrade_changes_nothing() {
    let values = TempDir::new().unwrap();
    create_values(values.path());
    let config = helm_config(values.path());

    let runner = RecordingRunner::new();
    runner.respond("helm get manifest", ProcessOutput::ok("replicaCount: 1\n"));
    let gate = StaticConfirmation::reject();

    let outcome = helm_ci::deploy(&config, &runner, &gate, Arc::new(MemoryReporter::new())).unwrap();

    assert!(matches!(outcome, ReconcileOutcome::Cancelled));
    let upgrades = upgrade_calls(&runner);
    assert_eq!(upgrades.len(), 1);
    assert!(upgrades[0].ends_with("--dry-run"));
}

#[test]
fn test_unreachable_vault_aborts_before_any_upgrade() {
    let values = TempDir::new().unwrap();
    fs::write(
        values.path().join("common.yaml"),
        "db:\n  password: <<vault.shop/db/password>>\n",
    )
    .unwrap();
    let mut config = helm_config(values.path());
    // Nothing listens on the discard port
    config.vault.url = Some("http://127.0.0.1:9".to_string());
    config.vault.token = Some("s.test".to_string());

    let runner = RecordingRunner::new();
    let gate = StaticConfirmation::approve();

    let err = helm_ci::deploy(&config, &runner, &gate, Arc::new(MemoryReporter::new())).unwrap_err();
    assert!(matches!(err, DeployError::Vault(_)));
    assert!(upgrade_calls(&runner).is_empty());
}

#[test]
fn test_raw_manifests_are_bound_and_applied() {
    let values = TempDir::new().unwrap();
    let dev = values.path().join("dev");
    let common = values.path().join("common");
    fs::create_dir_all(&dev).unwrap();
    fs::create_dir_all(&common).unwrap();
    fs::write(
        dev.join("deployment.yaml"),
        "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: shop\n",
    )
    .unwrap();
    fs::write(
        common.join("service.yaml"),
        "apiVersion: v1\nkind: Service\nmetadata:\n  name: shop\n  namespace: shop-dev\n",
    )
    .unwrap();

    let mut config = helm_config(values.path());
    config.custom = true;

    let runner = RecordingRunner::new();
    runner.respond("kubectl diff", ProcessOutput::failed(1, "").with_stdout("+  namespace: shop-dev\n"));
    let gate = StaticConfirmation::approve();
    let reporter = Arc::new(MemoryReporter::new());

    let outcome = helm_ci::deploy(&config, &runner, &gate, reporter.clone()).unwrap();
    assert!(outcome.is_applied());

    assert!(runner.has_run("kubectl get namespace shop-dev"));
    assert!(!runner.has_run("kubectl create namespace shop-dev"));
    assert_eq!(runner.count_matching("helm"), 0);

    let applied: Vec<String> = runner
        .calls()
        .into_iter()
        .filter(|call| call.args.first().map(String::as_str) == Some("apply"))
        .map(|call| call.args[2].clone())
        .collect();
    assert_eq!(applied.len(), 2);

    // The deployment needed a namespace, so it was applied from a patched copy
    // that no longer exists; the service was applied from its own file
    assert!(
        Path::new(&applied[0])
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("manifest-")
    );
    assert!(!Path::new(&applied[0]).exists());
    assert_eq!(PathBuf::from(&applied[1]), common.join("service.yaml"));
    assert_eq!(
        fs::read_to_string(dev.join("deployment.yaml")).unwrap(),
        "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: shop\n"
    );
}

#[test]
fn test_values_file_resolved_from_vault() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap();
    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = stream.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
        }
        let body = r#"{"data":{"data":{"password":"hunter2"}}}"#;
        write!(
            stream,
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        )
        .unwrap();
        String::from_utf8_lossy(&request).into_owned()
    });

    let values = TempDir::new().unwrap();
    let source = values.path().join("common.yaml");
    fs::write(&source, "db:\n  password: <<vault.shop/db/password>>\n").unwrap();

    let mut config = helm_config(values.path());
    config.vault.url = Some(format!("http://{address}"));
    config.vault.token = Some("s.test".to_string());
    config.vault.base_path = "talos".to_string();

    let reporter = Arc::new(MemoryReporter::new());
    let processor = ValuesProcessor::from_config(&config, reporter.clone()).unwrap();
    let processed = processor.process_file(&source).unwrap();

    let request = server.join().unwrap();
    assert!(request.starts_with("GET /v1/talos/data/shop/db HTTP/1.1"));
    assert_eq!(
        fs::read_to_string(processed.path()).unwrap(),
        "db:\n  password: hunter2\n"
    );
    assert!(!reporter.mentions("hunter2"));
}

#[test]
fn test_missing_helm_binary_fails_before_any_call() {
    let values = TempDir::new().unwrap();
    create_values(values.path());
    let config = helm_config(values.path());

    let runner = RecordingRunner::new();
    runner.without_command("helm");
    let gate = StaticConfirmation::approve();

    let err = helm_ci::deploy(&config, &runner, &gate, Arc::new(MemoryReporter::new())).unwrap_err();
    assert!(matches!(err, DeployError::InvalidConfig(ref m) if m.contains("helm")));
    assert!(runner.calls().is_empty());
    assert_eq!(gate.times_asked(), 0);
}

#[test]
fn test_root_ca_requires_kubectl() {
    let values = TempDir::new().unwrap();
    create_values(values.path());
    let mut config = helm_config(values.path());
    config.root_ca = Some(values.path().join("ca.crt").display().to_string());

    let runner = RecordingRunner::new();
    runner.without_command("kubectl");
    let gate = StaticConfirmation::approve();

    let err = helm_ci::deploy(&config, &runner, &gate, Arc::new(MemoryReporter::new())).unwrap_err();
    assert!(
        matches!(err, DeployError::InvalidConfig(ref m) if m.contains("kubectl") && !m.contains("helm"))
    );
    assert!(runner.calls().is_empty());
}

#[test]
fn test_missing_kubectl_binary_fails_raw_manifest_deploy() {
    let values = TempDir::new().unwrap();
    let dev = values.path().join("dev");
    fs::create_dir_all(&dev).unwrap();
    fs::write(
        dev.join("service.yaml"),
        "apiVersion: v1\nkind: Service\nmetadata:\n  name: shop\n",
    )
    .unwrap();
    let mut config = helm_config(values.path());
    config.custom = true;

    let runner = RecordingRunner::new();
    runner.without_command("kubectl");
    let gate = StaticConfirmation::approve();

    let err = helm_ci::deploy(&config, &runner, &gate, Arc::new(MemoryReporter::new())).unwrap_err();
    assert!(matches!(err, DeployError::InvalidConfig(ref m) if m.contains("kubectl")));
    assert!(runner.calls().is_empty());
}
