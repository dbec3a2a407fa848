// CapProbe - Capability Boundary Diagnostic Harness
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use std::path::PathBuf;
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let nonce = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("capprobe-{}-{}", prefix, nonce));
    std::fs::create_dir_all(&dir).expect("Failed to create temp dir");
    dir
}

fn capprobe() -> Command {
    Command::new(env!("CARGO_BIN_EXE_capprobe"))
}

#[test]
fn test_run_debug_writes_trace_and_summary() {
    let dir = temp_dir("debug");
    let trace = dir.join("uart.log");
    let summary = dir.join("summary.json");

    let output = capprobe()
        .args(["run", "--program", "debug", "-n", "2", "--no-delay", "--no-uart-stdout"])
        .arg("--output")
        .arg(&trace)
        .arg("--summary")
        .arg(&summary)
        .output()
        .expect("Failed to execute command");
    assert_eq!(output.status.code(), Some(0));

    let text = std::fs::read_to_string(&trace).unwrap();
    assert!(text.starts_with("=== seL4 Memory Access Debug Session ===\n"));
    assert!(text.contains("Iteration 2: DEBUG: String addr=0x"));

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&summary).unwrap()).unwrap();
    assert_eq!(json["program"], "debug-session");
    assert_eq!(json["outcome"]["status"], "completed");
    assert_eq!(json["iterations_completed"], 2);
    assert_eq!(json["trace_bytes"].as_u64().unwrap(), text.len() as u64);

    std::fs::remove_dir_all(dir).ok();
}

#[test]
fn test_trap_window_exits_with_trapped_code() {
    let dir = temp_dir("trap");
    let plan = dir.join("plan.yaml");
    std::fs::write(
        &plan,
        r#"
schema_version: "1.0"
name: "split-frame"
uart:
  settle_iterations: 0
guest:
  traps:
    - base: 0x40001000
      size: "4KiB"
"#,
    )
    .unwrap();
    let summary = dir.join("summary.json");

    let output = capprobe()
        .args(["run", "--program", "boundaries", "--no-delay", "--no-uart-stdout"])
        .arg("--plan")
        .arg(&plan)
        .arg("--summary")
        .arg(&summary)
        .output()
        .expect("Failed to execute command");
    assert_eq!(output.status.code(), Some(1));

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&summary).unwrap()).unwrap();
    assert_eq!(json["plan"], "split-frame");
    assert_eq!(json["outcome"]["status"], "trapped");
    assert_eq!(json["outcome"]["addr"], 0x4000_1000u64);
    assert_eq!(json["scenario_completed"], false);

    std::fs::remove_dir_all(dir).ok();
}

#[test]
fn test_invalid_plan_is_config_error() {
    let dir = temp_dir("invalid");
    let plan = dir.join("plan.yaml");
    std::fs::write(&plan, "schema_version: \"2.0\"\n").unwrap();

    let output = capprobe()
        .args(["run", "--no-uart-stdout"])
        .arg("--plan")
        .arg(&plan)
        .output()
        .expect("Failed to execute command");
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Unsupported schema_version"), "stderr: {}", stderr);

    std::fs::remove_dir_all(dir).ok();
}

#[test]
fn test_plan_subcommand_prints_default_yaml() {
    let output = capprobe()
        .arg("plan")
        .output()
        .expect("Failed to execute command");
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("schema_version: '1.0'") || stdout.contains("schema_version: \"1.0\""));
    assert!(stdout.contains("name: qemu-virt"));
    assert!(stdout.contains("stride: 4KiB"));
}
