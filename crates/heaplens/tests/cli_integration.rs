//! Integration tests for the `heaplens` CLI binary.
//!
//! These tests invoke the compiled binary directly via `std::process::Command`.
//! Run with: `cargo test -p heaplens --test cli_integration`

use std::io::Write;
use std::process::Command;

fn heaplens_bin() -> &'static str {
    env!("CARGO_BIN_EXE_heaplens")
}

fn write_dump() -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    let lines = [
        r#"{"type":"CLASS","address":"0x100","name":"Widget"}"#,
        r#"{"type":"OBJ","address":"0x200","class":"0x100","memsize":32}"#,
        r#"{"type":"OBJ","address":"0x210","class":"0x100","memsize":16}"#,
        r#"{"type":"FOO","address":"0x300"}"#,
        r#"{"type":"ROOT","root":"vm","references":["0x200"]}"#,
    ];
    for line in lines {
        writeln!(file, "{}", line).expect("write dump");
    }
    file.flush().expect("flush dump");
    file
}

#[test]
fn info_json_reports_counts() {
    let dump = write_dump();
    let out = Command::new(heaplens_bin())
        .args(["info", dump.path().to_str().unwrap(), "--json"])
        .output()
        .expect("failed to run heaplens");
    assert!(out.status.success(), "exit code: {}", out.status);
    let stdout = String::from_utf8_lossy(&out.stdout);
    let json: serde_json::Value = serde_json::from_str(&stdout).expect("stdout is not valid JSON");
    assert_eq!(json.get("type").and_then(|t| t.as_str()), Some("info"));
    // 4 records + unknown class-of-class + Type-FOO synthetic.
    assert_eq!(json.get("objects").and_then(|o| o.as_u64()), Some(6));
    assert_eq!(json.get("gc_roots").and_then(|r| r.as_u64()), Some(1));
}

#[test]
fn histogram_json_lists_classes() {
    let dump = write_dump();
    let out = Command::new(heaplens_bin())
        .args(["histogram", dump.path().to_str().unwrap(), "--json"])
        .output()
        .expect("failed to run heaplens");
    assert!(out.status.success(), "exit code: {}", out.status);
    let json: serde_json::Value =
        serde_json::from_slice(&out.stdout).expect("stdout is not valid JSON");
    let rows = json.get("rows").and_then(|r| r.as_array()).expect("rows array");
    assert!(!rows.is_empty());
    let widget = rows
        .iter()
        .find(|row| row.get("class").and_then(|c| c.as_str()) == Some("Widget"))
        .expect("Widget row present");
    assert_eq!(widget.get("objects").and_then(|o| o.as_i64()), Some(2));
    assert_eq!(widget.get("shallow_size").and_then(|s| s.as_i64()), Some(48));
}

#[test]
fn index_writes_artifacts() {
    let dump = write_dump();
    let dir = tempfile::tempdir().expect("tempdir");
    let prefix = dir.path().join("snap");
    let out = Command::new(heaplens_bin())
        .args([
            "index",
            dump.path().to_str().unwrap(),
            "--out",
            prefix.to_str().unwrap(),
            "--json",
        ])
        .output()
        .expect("failed to run heaplens");
    assert!(out.status.success(), "exit code: {}", out.status);
    for ext in ["idents", "o2class", "o2pos", "o2size", "outbound", "classes", "roots"] {
        let path = dir.path().join(format!("snap.{}", ext));
        assert!(path.exists(), "missing artifact {}", path.display());
    }
}
