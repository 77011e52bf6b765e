// CLI integration tests for selftest, stress, and config commands.
use std::io::Write;
use std::process::Command;

use serde_json::Value;

fn cmd() -> Command {
    let exe = env!("CARGO_BIN_EXE_cryptoshare");
    let mut command = Command::new(exe);
    command
        .env_remove("CRYPTOSHARE_LOCK_SLOTS")
        .env_remove("CRYPTOSHARE_REGISTRY_CAPACITY")
        .env_remove("CRYPTOSHARE_VERSION_APP");
    command
}

fn parse_json(output: &[u8]) -> Value {
    serde_json::from_slice(output).expect("valid json")
}

#[test]
fn selftest_reports_sweep_of_leftover_caller() {
    let output = cmd().arg("selftest").output().expect("selftest");
    assert!(output.status.success());
    let value = parse_json(&output.stdout);
    assert_eq!(value["ok"], true);
    assert_eq!(value["swept"], 1);
    assert_eq!(value["registry_empty"], true);
    let steps = value["steps"].as_array().expect("steps");
    assert_eq!(steps.first().expect("first")["step"], "load");
    assert_eq!(steps.last().expect("last")["step"], "unload");
}

#[test]
fn stress_sweeps_leaked_callers() {
    let output = cmd()
        .args([
            "stress",
            "--callers",
            "6",
            "--iterations",
            "200",
            "--leak",
            "2",
        ])
        .output()
        .expect("stress");
    assert!(output.status.success());
    let value = parse_json(&output.stdout);
    let results = &value["results"];
    assert_eq!(results["ops"], 1200);
    assert_eq!(results["acquisitions"], 1200);
    assert_eq!(results["detached"], 4);
    assert_eq!(results["swept"], 2);
    assert_eq!(results["released_slots"], 0);
    assert_eq!(results["teardown_clean"], true);
    assert_eq!(value["params"]["lock_slots"], 41);
}

#[test]
fn config_merges_file_and_env() {
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    write!(file, r#"{{"lock_slots": 12, "version_app": 4}}"#).expect("write");

    let output = cmd()
        .args(["--config", file.path().to_str().unwrap(), "config"])
        .env("CRYPTOSHARE_VERSION_APP", "6")
        .output()
        .expect("config");
    assert!(output.status.success());
    let value = parse_json(&output.stdout);
    assert_eq!(value["lock_slots"], 12);
    assert_eq!(value["version_app"], 6);
    assert_eq!(value["registry_capacity"], 7);
}

#[test]
fn invalid_config_exits_with_usage_code() {
    let output = cmd()
        .arg("config")
        .env("CRYPTOSHARE_LOCK_SLOTS", "0")
        .output()
        .expect("config");
    assert_eq!(output.status.code(), Some(2));
    let text = String::from_utf8_lossy(&output.stderr);
    let line = text
        .lines()
        .find(|line| line.starts_with('{'))
        .expect("json error line");
    let value: Value = serde_json::from_str(line).expect("json");
    assert_eq!(value["error"]["kind"], "Usage");
}

#[test]
fn stress_rejects_more_leaks_than_callers() {
    let output = cmd()
        .args(["stress", "--callers", "2", "--leak", "3"])
        .output()
        .expect("stress");
    assert_eq!(output.status.code(), Some(2));
}
