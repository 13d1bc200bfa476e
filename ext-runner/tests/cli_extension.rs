//! CLI tests for `ext-runner extension`, `validate` and `list`.
//!
//! Spawns the binary in a scratch directory holding an `ext-runner.toml`
//! and checks exit codes and the files left behind.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use ext_runner::exit_codes;
use ext_runner::io::config::CONFIG_FILE_NAME;

fn workspace() -> tempfile::TempDir {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(
        temp.path().join(CONFIG_FILE_NAME),
        "test_root_path = \"int_tests\"\n\
         frozen_root_path = \"frozen\"\n\
         exec_root_path = \"exec\"\n",
    )
    .expect("write config");
    temp
}

fn ext_runner(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_ext-runner"))
        .current_dir(dir)
        .env_remove("RUST_LOG")
        .args(args)
        .output()
        .expect("ext-runner")
}

#[test]
fn list_prints_registered_modules() {
    let temp = workspace();
    let output = ext_runner(temp.path(), &["list"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.lines().any(|line| line == "builtin.greeting"));
    assert!(stdout.lines().any(|line| line == "builtin.strict"));
}

#[test]
fn successful_test_run_exits_ok() {
    let temp = workspace();
    let output = ext_runner(temp.path(), &["extension", "builtin.greeting", "test"]);

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("No frozen data was found at"));
    assert!(stdout.contains("WARNING: builtin.greeting ran with 0 error(s), 1 warning(s)"));
    let log = fs::read_to_string(temp.path().join("int_tests/greeting/1001/run-test/extensions.log"))
        .expect("run log");
    assert!(log.contains("Hello from process 1001 on 2016-12-12"));
}

#[test]
fn usage_errors_exit_with_errors() {
    let temp = workspace();
    let output = ext_runner(temp.path(), &["extension", "builtin.strict", "test-fresh"]);
    assert_eq!(output.status.code(), Some(exit_codes::HAS_ERRORS));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Volume below minimum"));
}

#[test]
fn unknown_mode_is_rejected() {
    let temp = workspace();
    let output = ext_runner(temp.path(), &["extension", "builtin.greeting", "replay"]);
    assert_eq!(output.status.code(), Some(exit_codes::HAS_ERRORS));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Mode 'replay'"));
}

#[test]
fn frozen_runs_validate_cleanly() {
    let temp = workspace();
    for mode in ["test", "freeze"] {
        let output = ext_runner(temp.path(), &["extension", "builtin.greeting", mode]);
        assert_eq!(output.status.code(), Some(exit_codes::OK), "mode {mode}");
    }
    assert!(temp.path().join("frozen/greeting/1001/run-freeze").is_dir());

    let output = ext_runner(temp.path(), &["validate", "greeting"]);
    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("All integration tests ran successfully"));
}
