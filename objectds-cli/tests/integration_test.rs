//! End-to-end integration tests for the objectds CLI
//!
//! These tests run the built `objectds` binary against upstreams that are
//! either unreachable or never contacted, so they need no network.

use std::fs;
use std::process::{Command, Output};

/// Nothing listens on the discard port of a test host
const UNREACHABLE: &str = "http://127.0.0.1:9";

fn objectds(args: &[&str]) -> Output {
    let output = Command::new(env!("CARGO_BIN_EXE_objectds"))
        .args(args)
        .env_remove("OBJECTDS_SETTINGS")
        .env_remove("OBJECTDS_API_TOKEN")
        .env("OBJECTDS_URL", UNREACHABLE)
        .env("OBJECTDS_TIMEOUT_SECS", "2")
        .output()
        .expect("Failed to run objectds");

    // Print output for debugging
    println!("stdout: {}", String::from_utf8_lossy(&output.stdout));
    println!("stderr: {}", String::from_utf8_lossy(&output.stderr));
    output
}

/// Test CLI help output
#[test]
fn test_cli_help() {
    let output = objectds(&["--help"]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("query"), "Missing query command");
    assert!(stdout.contains("health"), "Missing health command");
    assert!(stdout.contains("serve"), "Missing serve command");
}

/// Test `objectds health` against an upstream that does not answer
#[test]
fn test_health_unreachable() {
    let output = objectds(&["health"]);
    assert!(!output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("127.0.0.1:9/api/ds/query"), "Missing upstream URL");
    assert!(stdout.contains("❌"), "Missing failure marker");
}

/// Malformed queries are answered locally without contacting the upstream
#[test]
fn test_query_malformed_only() {
    let path = std::env::temp_dir().join("objectds_test_malformed.json");
    fs::write(
        &path,
        r#"{ "queries": [ { "refId": "A", "name": "broken", "config": 42 } ] }"#,
    )
    .expect("Failed to write query file");

    let output = objectds(&["query", "-f", path.to_str().unwrap(), "--last-minutes", "5", "--json"]);
    let _ = fs::remove_file(&path);

    assert!(!output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let json_start = stdout.find('{').expect("No JSON found");
    let response: serde_json::Value =
        serde_json::from_str(stdout[json_start..].trim()).expect("Invalid JSON in query output");

    assert_eq!(response["results"]["A"]["error"]["kind"], "MalformedQuery");
    assert!(String::from_utf8_lossy(&output.stderr).contains("1 of 1 queries failed"));
}

/// Unreachable upstream fails every query with the same error
#[test]
fn test_query_unreachable() {
    let path = std::env::temp_dir().join("objectds_test_unreachable.json");
    let query = r#"{ "name": "cpu", "config": { "uid": "prom", "query": { "expr": "up" } } }"#;
    fs::write(
        &path,
        format!(
            r#"{{ "from": "2024-01-01T00:00:00Z", "to": "2024-01-01T01:00:00Z",
                 "queries": [ {a}, {b} ] }}"#,
            a = query.replacen('{', r#"{ "refId": "A","#, 1),
            b = query.replacen('{', r#"{ "refId": "B","#, 1),
        ),
    )
    .expect("Failed to write query file");

    let output = objectds(&["query", "-f", path.to_str().unwrap()]);
    let _ = fs::remove_file(&path);

    assert!(!output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Range:    2024-01-01T00:00:00+00:00"), "Missing range");
    assert!(stdout.contains("[A] ❌ transport failure"), "Missing A failure");
    assert!(stdout.contains("[B] ❌ transport failure"), "Missing B failure");
}

/// Missing file is reported as an error
#[test]
fn test_query_missing_file() {
    let output = objectds(&["query", "-f", "/nonexistent/objectds.json"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("failed to read"));
}
