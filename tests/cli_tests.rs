//! End-to-end tests of the startrace binary
//!
//! Runs use `--no-trace --no-window-wait` with a config that disables sudo and
//! the cache drop, so they need neither root nor a display.

use predicates::prelude::*;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

fn unprivileged_config(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("startrace.toml");
    fs::write(&path, "sudo = false\ndrop_caches = false\n").unwrap();
    path
}

fn startrace(config: &PathBuf) -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("startrace");
    cmd.arg("--config").arg(config);
    cmd
}

#[test]
fn test_help_lists_run_options() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("startrace");
    cmd.arg("run").arg("--help");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("--no-trace"))
        .stdout(predicate::str::contains("--discard-snap-ns"))
        .stdout(predicate::str::contains("--prepare-script-args"));
}

#[test]
fn test_missing_command_is_usage_error() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("startrace");
    cmd.arg("run").arg("--no-trace");

    cmd.assert().failure().code(2);
}

#[test]
fn test_discard_without_snap_run_is_rejected() {
    let dir = TempDir::new().unwrap();
    let config = unprivileged_config(&dir);

    let mut cmd = startrace(&config);
    cmd.args(["run", "-d", "--no-trace", "--no-window-wait", "true"]);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains(
            "cannot use --discard-snap-ns without --use-snap-run",
        ));
}

#[test]
fn test_json_output_has_one_run_per_trial() {
    let dir = TempDir::new().unwrap();
    let config = unprivileged_config(&dir);

    let mut cmd = startrace(&config);
    cmd.args(["-n", "2", "run", "-j", "--no-trace", "--no-window-wait", "true"]);

    let output = cmd.output().unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let parsed: serde_json::Value = serde_json::from_str(stdout.trim()).unwrap();
    let runs = parsed["Runs"].as_array().unwrap();
    assert_eq!(runs.len(), 3);
    for run in runs {
        assert!(run["ExecveTiming"].is_null());
        assert_eq!(run["TimeToRun"], run["TimeToDisplay"]);
        assert_eq!(run["Errors"].as_array().unwrap().len(), 0);
    }
}

#[test]
fn test_output_file_is_truncated_and_written() {
    let dir = TempDir::new().unwrap();
    let config = unprivileged_config(&dir);
    let out = dir.path().join("results.json");
    fs::write(&out, "stale content that must disappear\n").unwrap();

    let mut cmd = startrace(&config);
    cmd.args(["run", "-j", "--no-trace", "--no-window-wait", "-o"])
        .arg(&out)
        .arg("true");

    cmd.assert().success().stdout(predicate::str::is_empty());

    let written = fs::read_to_string(&out).unwrap();
    assert!(!written.contains("stale"));
    let parsed: serde_json::Value = serde_json::from_str(written.trim()).unwrap();
    assert_eq!(parsed["Runs"].as_array().unwrap().len(), 1);
}

#[test]
fn test_table_output_reports_startup_time() {
    let dir = TempDir::new().unwrap();
    let config = unprivileged_config(&dir);

    let mut cmd = startrace(&config);
    cmd.args(["run", "--no-trace", "--no-window-wait", "true"]);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Total startup time:"))
        .stdout(predicate::str::contains("Runs").not());
}

#[test]
fn test_command_flags_are_passed_through() {
    let dir = TempDir::new().unwrap();
    let config = unprivileged_config(&dir);
    let log = dir.path().join("cmd.log");

    let mut cmd = startrace(&config);
    cmd.args(["run", "--no-trace", "--no-window-wait", "--cmd-stdout"])
        .arg(&log)
        .args(["--", "echo", "-n", "passed-through"]);

    cmd.assert().success();
    assert_eq!(fs::read_to_string(&log).unwrap(), "passed-through");
}

#[test]
fn test_unknown_config_key_is_rejected() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("bad.toml");
    fs::write(&config, "sudo = false\nwindow_timeout = 5\n").unwrap();

    let mut cmd = startrace(&config);
    cmd.args(["run", "--no-trace", "--no-window-wait", "true"]);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("window_timeout"));
}

#[test]
fn test_missing_program_fails_run() {
    let dir = TempDir::new().unwrap();
    let config = unprivileged_config(&dir);

    let mut cmd = startrace(&config);
    cmd.args([
        "run",
        "--no-trace",
        "--no-window-wait",
        "/nonexistent/startrace-sample-app",
    ]);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("startrace-sample-app"));
}
