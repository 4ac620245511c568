use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn syncd_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("syncd");
    path
}

/// Nothing listens on port 1, so every request fails fast with a
/// connection error.
const UNREACHABLE_ES: &str = "http://127.0.0.1:1";

fn write_config(root: &Path, es_section: &str, connectors: &str) -> PathBuf {
    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/syncd.sqlite"

[service]
poll_interval_secs = 60
log_level = "warn"

[elasticsearch]
{es_section}

{connectors}
"#,
        root = root.display(),
    );

    let config_path = config_dir.join("syncd.toml");
    fs::write(&config_path, config_content).unwrap();
    config_path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(files_dir.join("alpha.md"), "# Alpha\n\nRust and cargo.").unwrap();
    fs::write(files_dir.join("beta.md"), "# Beta\n\nPython notes.").unwrap();

    let connectors = format!(
        r#"[[connectors]]
id = "docs"
service_type = "filesystem"
index_name = "search-docs"

[connectors.configuration]
root = "{}/files"
include_globs = ["**/*.md"]

[[connectors]]
id = "hello"
service_type = "hello_world"
index_name = "search-hello"
"#,
        root.display()
    );

    let config_path = write_config(
        &root,
        &format!("hosts = [\"{}\"]", UNREACHABLE_ES),
        &connectors,
    );
    (tmp, config_path)
}

fn run_syncd(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = syncd_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run syncd binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_syncd(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/syncd.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_syncd(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_syncd(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_sources_lists_connectors() {
    let (_tmp, config_path) = setup_test_env();

    run_syncd(&config_path, &["init"]);
    let (stdout, stderr, success) = run_syncd(&config_path, &["sources"]);
    assert!(success, "sources failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("CONNECTOR"));
    assert!(stdout.contains("docs"));
    assert!(stdout.contains("filesystem"));
    assert!(stdout.contains("hello_world"));
    assert!(stdout.contains("configured"));
}

#[test]
fn test_check_unknown_service_type_fails() {
    let tmp = TempDir::new().unwrap();
    let config_path = write_config(
        tmp.path(),
        &format!("hosts = [\"{}\"]", UNREACHABLE_ES),
        r#"[[connectors]]
id = "tickets"
service_type = "unknown"
index_name = "search-tickets"
"#,
    );

    let (stdout, stderr, success) = run_syncd(&config_path, &["check"]);
    assert!(!success, "check should fail: stdout={}", stdout);
    assert!(
        stderr.contains("service type 'unknown' is not a supported connector"),
        "stderr: {}",
        stderr
    );
    assert!(stderr.contains("tickets"));
}

#[test]
fn test_conflicting_endpoints_rejected() {
    let tmp = TempDir::new().unwrap();
    let config_path = write_config(
        tmp.path(),
        "hosts = [\"http://localhost:9200\"]\ncloud_id = \"dep:ZXhhbXBsZS5jb20kYWJjJGRlZg==\"",
        r#"[[connectors]]
id = "hello"
service_type = "hello_world"
index_name = "search-hello"
"#,
    );

    let (_, stderr, success) = run_syncd(&config_path, &["init"]);
    assert!(!success);
    assert!(stderr.contains("mutually exclusive"), "stderr: {}", stderr);
}

#[test]
fn test_missing_endpoint_rejected() {
    let tmp = TempDir::new().unwrap();
    let config_path = write_config(
        tmp.path(),
        "api_key = \"secret\"",
        r#"[[connectors]]
id = "hello"
service_type = "hello_world"
index_name = "search-hello"
"#,
    );

    let (_, stderr, success) = run_syncd(&config_path, &["sources"]);
    assert!(!success);
    assert!(stderr.contains("must be configured"), "stderr: {}", stderr);
}

#[test]
fn test_sync_unreachable_engine_fails_preflight() {
    let (_tmp, config_path) = setup_test_env();

    run_syncd(&config_path, &["init"]);
    let (stdout, stderr, success) = run_syncd(&config_path, &["sync", "hello"]);
    assert!(!success, "sync should fail: stdout={}", stdout);
    assert!(
        stderr.contains("pre-flight check failed for connector 'hello'"),
        "stderr: {}",
        stderr
    );
}

#[test]
fn test_sync_unknown_connector() {
    let (_tmp, config_path) = setup_test_env();

    run_syncd(&config_path, &["init"]);
    let (_, stderr, success) = run_syncd(&config_path, &["sync", "nope"]);
    assert!(!success);
    assert!(stderr.contains("connector 'nope' is not configured"), "stderr: {}", stderr);
}

#[test]
fn test_missing_config_file() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_syncd(&tmp.path().join("missing.toml"), &["sources"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"), "stderr: {}", stderr);
}
