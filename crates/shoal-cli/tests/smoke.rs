//! Smoke tests for the `shoal` binary.
//!
//! Runs the binary without a remote registry: help output, plan checking,
//! deploys against the in-process registry and config errors.

use std::process::Command;

use serde_json::json;

fn shoal() -> Command {
    Command::new(env!("CARGO_BIN_EXE_shoal"))
}

// ── Help / basic CLI ──────────────────────────────────────────────────────────

#[test]
fn binary_responds_to_help() {
    let output = shoal().arg("--help").output().expect("failed to execute shoal");
    assert!(output.status.success(), "shoal --help should exit 0");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Shoal"));
    assert!(stdout.contains("host"), "help output should list host subcommand");
    assert!(stdout.contains("check-plan"), "help output should list check-plan subcommand");
    assert!(stdout.contains("deploy"), "help output should list deploy subcommand");
}

#[test]
fn unknown_subcommand_exits_nonzero() {
    let output = shoal()
        .arg("nonexistent-subcommand")
        .output()
        .expect("failed to execute shoal");
    assert!(!output.status.success());
}

// ── check-plan ────────────────────────────────────────────────────────────────

fn write_plan(dir: &std::path::Path) -> (std::path::PathBuf, std::path::PathBuf) {
    std::fs::create_dir_all(dir.join("apps/shop")).unwrap();
    let plan = dir.join("plan.json");
    std::fs::write(
        &plan,
        json!({
            "providers": [{ "code": { "name": "local" }, "providerSettings": {} }],
            "applications": [{
                "name": "shop",
                "version": "1.0.0",
                "code": { "locationType": "file", "location": "apps/shop" },
                "init": [{ "service": "cart/seed" }]
            }]
        })
        .to_string(),
    )
    .unwrap();
    let definitions = dir.join("services.json");
    std::fs::write(
        &definitions,
        json!([{
            "application": "shop",
            "services": [
                { "name": "add", "module": "cart", "filepath": "cart.js" },
                { "name": "seed", "module": "cart", "filepath": "cart.js" }
            ]
        }])
        .to_string(),
    )
    .unwrap();
    (plan, definitions)
}

#[test]
fn check_plan_prints_json_summary() {
    let dir = tempfile::tempdir().unwrap();
    let (plan, definitions) = write_plan(dir.path());

    let output = shoal()
        .arg("check-plan")
        .arg(&plan)
        .arg(&definitions)
        .arg("--base-dir")
        .arg(dir.path())
        .arg("--json")
        .output()
        .expect("failed to execute shoal check-plan");
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["providers"], json!(["local"]));
    assert_eq!(summary["applications"][0]["services"], json!(["cart/add", "cart/seed"]));
    assert_eq!(summary["applications"][0]["init_steps"], 1);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(!stderr.contains("warning"), "unexpected warning: {stderr}");
}

#[test]
fn check_plan_warns_about_missing_code() {
    let dir = tempfile::tempdir().unwrap();
    let (plan, definitions) = write_plan(dir.path());
    std::fs::remove_dir_all(dir.path().join("apps/shop")).unwrap();

    let output = shoal()
        .arg("check-plan")
        .arg(&plan)
        .arg(&definitions)
        .arg("--base-dir")
        .arg(dir.path())
        .output()
        .expect("failed to execute shoal check-plan");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("shop 1.0.0"));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("not found"), "should warn about the code dir: {stderr}");
}

#[test]
fn check_plan_rejects_malformed_plan() {
    let dir = tempfile::tempdir().unwrap();
    let (plan, definitions) = write_plan(dir.path());
    std::fs::write(&plan, "{ not json").unwrap();

    let output = shoal()
        .arg("check-plan")
        .arg(&plan)
        .arg(&definitions)
        .output()
        .expect("failed to execute shoal check-plan");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("plan.json"), "error should name the file: {stderr}");
}

// ── Config ────────────────────────────────────────────────────────────────────

#[test]
fn host_fails_cleanly_with_no_config() {
    let dir = tempfile::tempdir().unwrap();
    let output = shoal()
        .arg("host")
        .current_dir(dir.path())
        .env("HOME", dir.path())
        .output()
        .expect("failed to execute shoal host");

    assert!(!output.status.success(), "shoal host should fail without shoal.toml");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("shoal.toml"), "error should mention config: {stderr}");
}

#[test]
fn host_requires_identity() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("shoal.toml"), "[registry]\nurl = \"http://127.0.0.1:9\"\n")
        .unwrap();
    let output = shoal()
        .arg("host")
        .current_dir(dir.path())
        .env("HOME", dir.path())
        .output()
        .expect("failed to execute shoal host");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("account and name"), "unexpected error: {stderr}");
}

#[test]
fn config_prints_effective_settings_without_token() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("custom.toml");
    std::fs::write(
        &path,
        "[registry]\ntoken = \"secret\"\n\n[discovery]\nworkload_threshold = 60\n",
    )
    .unwrap();

    let output = shoal()
        .args(["config", "--config"])
        .arg(&path)
        .env("SHOAL_REGISTRY_TOKEN", "env-secret")
        .output()
        .expect("failed to execute shoal config");
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let config: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(config["discovery"]["workload_threshold"], 60);
    assert_eq!(config["discovery"]["strategy"], "evenWorkload");
    assert!(!stdout.contains("secret"));
}

// ── deploy ────────────────────────────────────────────────────────────────────

/// A host config using the in-process registry, with `sh` running service
/// sources from `dir`.
fn write_deploy_config(dir: &std::path::Path) -> std::path::PathBuf {
    let path = dir.join("shoal.toml");
    std::fs::write(
        &path,
        format!(
            "[registry]\nurl = \"local\"\n\n\
             [host]\naccount = \"acme\"\nname = \"web1\"\nipv4 = \"10.0.0.5\"\n\n\
             [deploy]\nbase_dir = \"{}\"\ninterpreter = \"sh\"\n",
            dir.display()
        ),
    )
    .unwrap();
    path
}

/// `write_plan`, with a public local provider and a seed script that saves
/// its arguments next to itself.
fn write_deployable(dir: &std::path::Path) -> (std::path::PathBuf, std::path::PathBuf) {
    let (plan, definitions) = write_plan(dir);
    std::fs::write(dir.join("apps/shop/cart.js"), "cat > \"$1.args\"\n").unwrap();
    std::fs::write(
        &plan,
        json!({
            "providers": [{
                "code": { "name": "local" },
                "providerSettings": { "public": { "host": "10.0.0.5", "port": 8080 } }
            }],
            "applications": [{
                "name": "shop",
                "version": "1.0.0",
                "code": { "locationType": "file", "location": "apps/shop" },
                "init": [{ "service": "cart/seed", "arguments": [1] }]
            }]
        })
        .to_string(),
    )
    .unwrap();
    (plan, definitions)
}

#[test]
fn deploy_uploads_runtimes_to_local_registry() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_deploy_config(dir.path());
    let (plan, definitions) = write_deployable(dir.path());

    let output = shoal()
        .arg("deploy")
        .arg(&definitions)
        .arg(&plan)
        .arg("--config")
        .arg(&config)
        .output()
        .expect("failed to execute shoal deploy");
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(!report["host_id"].as_str().unwrap().is_empty());
    assert!(report.get("failed").is_none());
    let deployment = &report["deployments"][0];
    assert_eq!(deployment["runtime_ids"].as_array().unwrap().len(), 2);
    let entry = &deployment["result"]["shop"][0]["entries"][0];
    assert_eq!(entry["type"], "dedicated");
    assert_eq!(entry["providerInfo"]["host"], "10.0.0.5");

    let seeded = std::fs::read_to_string(dir.path().join("apps/shop/seed.args")).unwrap();
    assert!(seeded.contains("[1]"), "init arguments: {seeded}");
}

#[test]
fn deploy_reports_failed_pairs_and_exits_nonzero() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_deploy_config(dir.path());
    let (plan, definitions) = write_deployable(dir.path());
    let broken = dir.path().join("broken.json");
    std::fs::write(
        &broken,
        json!([{
            "application": "shop",
            "services": [{ "name": "gone", "module": "cart", "filepath": "missing.js" }]
        }])
        .to_string(),
    )
    .unwrap();

    let output = shoal()
        .arg("deploy")
        .args([&broken, &plan, &definitions, &plan])
        .arg("--config")
        .arg(&config)
        .output()
        .expect("failed to execute shoal deploy");
    assert!(!output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["deployments"].as_array().unwrap().len(), 1);
    let failed = report["failed"].as_array().unwrap();
    assert_eq!(failed.len(), 1);
    assert!(failed[0]["error"].as_str().unwrap().contains("missing.js"));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("1 of 2"), "unexpected error: {stderr}");
}

#[test]
fn deploy_rejects_unpaired_files() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_deploy_config(dir.path());
    let (plan, definitions) = write_deployable(dir.path());

    let output = shoal()
        .arg("deploy")
        .args([&definitions, &plan, &definitions])
        .arg("--config")
        .arg(&config)
        .output()
        .expect("failed to execute shoal deploy");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("pairs"), "unexpected error: {stderr}");
}
