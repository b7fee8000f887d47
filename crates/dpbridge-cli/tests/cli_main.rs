//! CLI tests for the dpbridge binary.

use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn data_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../data")
}

/// Binary pointed at the shipped catalogs, isolated from the caller's env.
fn dpbridge() -> Command {
    let mut cmd = Command::cargo_bin("dpbridge").unwrap();
    cmd.env_remove("RUST_LOG")
        .env_remove("DPBRIDGE_FINGERPRINTS")
        .env_remove("DPBRIDGE_PROFILES")
        .env_remove("DPBRIDGE_STRICT")
        .arg("--fingerprints")
        .arg(data_dir().join("fingerprints.json"))
        .arg("--profiles")
        .arg(data_dir().join("profiles.json"));
    cmd
}

#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("dpbridge").unwrap();
    cmd.arg("--help");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("validate"))
        .stdout(predicate::str::contains("lookup"))
        .stdout(predicate::str::contains("decode"))
        .stdout(predicate::str::contains("replay"))
        .stdout(predicate::str::contains("discover"));
}

#[test]
fn test_no_subcommand_shows_error() {
    let mut cmd = Command::cargo_bin("dpbridge").unwrap();
    cmd.assert().failure().code(2);
}

#[test]
fn test_validate_shipped_catalog() {
    dpbridge()
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("9 fingerprints, 8 profiles: 0 errors, 0 warnings"));
}

#[test]
fn test_validate_reports_missing_trait() {
    let dir = TempDir::new().unwrap();
    let fingerprints = dir.path().join("fingerprints.json");
    let profiles = dir.path().join("profiles.json");
    fs::write(
        &fingerprints,
        r#"[{"manufacturerName": "Acme", "modelId": "Fan-1", "profile": "fan"}]"#,
    )
    .unwrap();
    fs::write(
        &profiles,
        r#"{"fan": {"capabilities": ["fan_speed"], "dpMap": {"fan_speed": 3}}}"#,
    )
    .unwrap();

    let mut cmd = Command::cargo_bin("dpbridge").unwrap();
    cmd.arg("validate")
        .arg("--fingerprints")
        .arg(&fingerprints)
        .arg("--profiles")
        .arg(&profiles)
        .arg("--json");

    cmd.assert()
        .failure()
        .stdout(predicate::str::contains("fan_speed"))
        .stderr(predicate::str::contains("catalog validation failed"));
}

#[test]
fn test_lookup_known_device() {
    dpbridge()
        .args(["lookup", "_TZE200_abcdefgh", "TS0601"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"profileId\": \"climate_basic\""))
        .stdout(predicate::str::contains("Climate sensor"));
}

#[test]
fn test_lookup_unknown_device() {
    dpbridge()
        .args(["lookup", "Acme", "Model-X"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No profile registered for Acme/Model-X"));
}

#[test]
fn test_decode_payload() {
    dpbridge()
        .args(["decode", "000101020004000000d7"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"seq\": 1"))
        .stdout(predicate::str::contains("\"value\": 215"));
}

#[test]
fn test_decode_rejects_bad_hex() {
    dpbridge()
        .args(["decode", "zz"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid hex payload"));
}

#[test]
fn test_replay_translates_temperature() {
    dpbridge()
        .args([
            "replay",
            "_TZE200_abcdefgh",
            "TS0601",
            "000101020004000000d7",
            "0002630200040000000a",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            r#"{"capability":"measure_temperature","value":21.5}"#,
        ))
        .stdout(predicate::str::contains(r#""unmapped":[99]"#));
}

#[test]
fn test_discover_nodes() {
    let dir = TempDir::new().unwrap();
    let nodes = dir.path().join("nodes.json");
    fs::write(
        &nodes,
        r#"[
            {"manufacturerName": "_TZ9999_unknown00", "modelId": "TS9999", "networkAddress": "0x1000"},
            {"manufacturerName": "_TZE200_abcdefgh", "modelId": "TS0601", "networkAddress": "0x1001"},
            {"manufacturerName": "_TZ3000_plug0001", "modelId": "TS011F", "networkAddress": "0x1002", "endpoints": [1, 2]}
        ]"#,
    )
    .unwrap();

    dpbridge()
        .arg("discover")
        .arg(&nodes)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"networkAddress\": \"0x1001\""))
        .stdout(predicate::str::contains("\"profileId\": \"smart_plug\""))
        .stdout(predicate::str::contains("0x1000").not());
}
