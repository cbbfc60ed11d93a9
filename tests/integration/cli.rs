use assert_cmd::Command;
use ctlpkg::test_utils::{intent_stream, provider_stream};
use predicates::prelude::*;
use tempfile::TempDir;

fn ctlpkg() -> Command {
    let mut cmd = Command::cargo_bin("ctlpkg").unwrap();
    cmd.env_remove("RUST_LOG").env_remove("CTLPKG_CONFIG");
    cmd
}

#[test]
fn test_lint_valid_package() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("package.yaml");
    std::fs::write(&file, provider_stream("prov", &[("reg.io/org/dep", ">=1.0.0")])).unwrap();

    ctlpkg()
        .arg("lint")
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("✓"))
        .stdout(predicate::str::contains("is a valid Provider package"));
}

#[test]
fn test_lint_wrong_kind_fails() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("package.yaml");
    std::fs::write(&file, intent_stream("intent", &[])).unwrap();

    ctlpkg()
        .args(["lint", "--kind", "provider"])
        .arg(&file)
        .assert()
        .code(1)
        .stdout(predicate::str::contains("✗"))
        .stderr(predicate::str::contains("is not a valid Provider package"));

    ctlpkg().args(["lint", "--kind", "intent"]).arg(&file).assert().success();
}

#[test]
fn test_lint_json_report() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("package.yaml");
    std::fs::write(&file, provider_stream("prov", &[])).unwrap();

    let output = ctlpkg().args(["lint", "--format", "json"]).arg(&file).output().unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["valid"], true);
    assert_eq!(report["name"], "prov");
    assert_eq!(report["objects"], 1);
}

#[test]
fn test_lint_missing_file() {
    ctlpkg()
        .args(["lint", "/nonexistent/package.yaml"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Failed to read package"));
}

#[test]
fn test_run_rejects_missing_records_directory() {
    ctlpkg()
        .args(["--quiet", "run", "--records", "/nonexistent/records"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("records"));
}

#[test]
fn test_run_rejects_invalid_config() {
    let temp = TempDir::new().unwrap();
    let config = temp.path().join("ctlpkg.toml");
    std::fs::write(&config, "max_concurrent_reconciles = 0\n").unwrap();
    std::fs::create_dir(temp.path().join("records")).unwrap();

    ctlpkg()
        .arg("--config")
        .arg(&config)
        .arg("run")
        .arg("--records")
        .arg(temp.path().join("records"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("max_concurrent_reconciles"));
}
