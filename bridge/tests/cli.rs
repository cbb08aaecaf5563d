//! CLI tests for `bridge check`, `bridge files`, and `bridge exec`.
//!
//! Spawns the binary with a scrubbed environment and a temporary home so no
//! real workspace configuration is ever read. None of these reach the network.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use bridge::exit_codes;
use bridge::io::fingerprint::CACHE_FILE_NAME;

fn bridge(project: &Path, home: &Path, env: &[(&str, &str)], args: &[&str]) -> Output {
    let mut command = Command::new(env!("CARGO_BIN_EXE_bridge"));
    command
        .env_clear()
        .env("HOME", home)
        .current_dir(project)
        .args(args);
    for (key, value) in env {
        command.env(key, value);
    }
    command.output().expect("run bridge")
}

#[test]
fn check_without_cluster_fails() {
    let project = tempfile::tempdir().expect("tempdir");
    let home = tempfile::tempdir().expect("home");

    let output = bridge(project.path(), home.path(), &[], &["check"]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Cluster ID is not configured"), "{stderr}");
}

#[test]
fn check_passes_with_profile_file() {
    let project = tempfile::tempdir().expect("tempdir");
    let home = tempfile::tempdir().expect("home");
    fs::write(
        home.path().join(".databrickscfg"),
        "[DEFAULT]\nhost = https://example.cloud\ntoken = dapi-test\ncluster_id = 0101-abc\n",
    )
    .expect("write profile");

    let output = bridge(project.path(), home.path(), &[], &["check"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("cluster 0101-abc"), "{stdout}");
}

#[test]
fn check_reports_invalid_project_limits() {
    let project = tempfile::tempdir().expect("tempdir");
    let home = tempfile::tempdir().expect("home");
    fs::write(
        project.path().join("pyproject.toml"),
        "[tool.bridge.sync]\nmax_size_mb = 0.0\n",
    )
    .expect("write pyproject");

    let output = bridge(
        project.path(),
        home.path(),
        &[
            ("DATABRICKS_CLUSTER_ID", "c"),
            ("DATABRICKS_HOST", "example.cloud"),
            ("DATABRICKS_TOKEN", "t"),
        ],
        &["check"],
    );
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("max_size_mb"), "{stderr}");
}

#[test]
fn files_lists_synced_files_without_remote_access() {
    let project = tempfile::tempdir().expect("tempdir");
    let home = tempfile::tempdir().expect("home");
    fs::write(project.path().join("main.py"), "print(1)\n").expect("write");
    fs::create_dir(project.path().join("__pycache__")).expect("mkdir");
    fs::write(project.path().join("__pycache__/main.pyc"), "x").expect("write");

    let output = bridge(project.path(), home.path(), &[], &["files"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("main.py"), "{stdout}");
    assert!(!stdout.contains("__pycache__"), "{stdout}");
    assert!(stdout.contains("1 files, 1 changed"), "{stdout}");
    assert!(!project.path().join(CACHE_FILE_NAME).exists());
}

#[test]
fn exec_with_invalid_configuration_does_not_run() {
    let project = tempfile::tempdir().expect("tempdir");
    let home = tempfile::tempdir().expect("home");

    let output = bridge(project.path(), home.path(), &[], &["exec", "print(1)"]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Configuration error"), "{stderr}");
}

#[test]
fn exec_without_code_is_rejected() {
    let project = tempfile::tempdir().expect("tempdir");
    let home = tempfile::tempdir().expect("home");

    let output = bridge(project.path(), home.path(), &[], &["exec"]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("nothing to execute"), "{stderr}");
}
