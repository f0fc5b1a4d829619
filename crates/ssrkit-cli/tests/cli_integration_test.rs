//! CLI Integration Tests
//!
//! Runs the built `ssrkit` binary against temporary bundles and source trees.

use std::path::PathBuf;
use std::process::Command;

fn ssrkit_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_ssrkit"))
}

#[test]
fn test_render_prints_markup() {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("Home.js"),
        "function Render() { return '<p>' + INITIAL_PROPS.id + ' ' + LANG + ' ' + location.pathname + '</p>'; }",
    )
    .unwrap();

    let output = Command::new(ssrkit_bin())
        .args(["render", "Home.js", "-p", r#"{"id": 4}"#, "--lang", "fr", "--url", "http://127.0.0.1/shop"])
        .arg("-d")
        .arg(dir.path())
        .output()
        .unwrap();

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "<p>4 fr /shop</p>");
}

#[test]
fn test_render_missing_fragment_fails() {
    let dir = tempfile::TempDir::new().unwrap();
    let output = Command::new(ssrkit_bin())
        .args(["render", "Missing.js", "-d"])
        .arg(dir.path())
        .output()
        .unwrap();

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Missing.js"));
}

#[test]
fn test_render_rejects_invalid_props() {
    let output = Command::new(ssrkit_bin())
        .args(["render", "Home.js", "-p", "{not json"])
        .output()
        .unwrap();

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Invalid JSON"));
}

#[test]
fn test_digest_is_stable() {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(dir.path().join("App.tsx"), "export {}").unwrap();

    let run = || {
        let output = Command::new(ssrkit_bin())
            .arg("digest")
            .arg(dir.path())
            .output()
            .unwrap();
        assert!(output.status.success());
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    };

    let first = run();
    assert_eq!(first.len(), 64);
    assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(first, run());
}

#[test]
fn test_stats_requires_http_prefix() {
    let output = Command::new(ssrkit_bin())
        .args(["stats", "127.0.0.1:3000"])
        .output()
        .unwrap();

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("must start with http://"));
}
