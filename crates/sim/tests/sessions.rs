// CapProbe - Capability Boundary Diagnostic Harness
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use capprobe_config::{ProbePlan, Program, TrapWindow};
use capprobe_sim::{capture_uart, run, GuestImage, Outcome, RunOptions, RunReport};
use std::sync::{Arc, Mutex};

fn quiet_plan() -> ProbePlan {
    let mut plan = ProbePlan::default();
    plan.uart.settle_iterations = 0;
    plan
}

fn run_capture(plan: &ProbePlan, program: Program, iterations: u32) -> (String, RunReport) {
    let image = GuestImage::from_plan(plan).unwrap();
    let sink = Arc::new(Mutex::new(Vec::new()));
    let uart = capture_uart(sink.clone(), false, None, plan.uart.settle_iterations);
    let opts = RunOptions {
        program,
        iterations,
        skip_period_delay: true,
    };
    let report = run(plan, &image, uart, &opts).unwrap();
    let text = String::from_utf8_lossy(&sink.lock().unwrap()).into_owned();
    (text, report)
}

#[test]
fn test_debug_session_three_iterations() {
    let (text, report) = run_capture(&quiet_plan(), Program::Debug, 3);

    assert_eq!(report.outcome, Outcome::Completed);
    assert!(report.scenario_completed);
    assert_eq!(report.iterations_completed, 3);
    assert_eq!(report.uart_data_register, 0x0900_0000);

    let periodic: Vec<&str> = text
        .lines()
        .filter(|l| l.starts_with("Iteration "))
        .collect();
    assert_eq!(periodic.len(), 3);
    for (i, line) in periodic.iter().enumerate() {
        assert!(line.starts_with(&format!("Iteration {}: DEBUG: String addr=0x", i + 1)));
        assert!(line.ends_with("content=[Hell|o fr|om s|eL4!|]"));
    }
    assert!(text.contains("Before: Hello World Debug Test! :After\n"));
    assert!(text.contains("Hello <- Individual chars\n"));
}

#[test]
fn test_boundary_test_clean_run() {
    let (text, report) = run_capture(&quiet_plan(), Program::Boundaries, 2);

    assert_eq!(report.outcome, Outcome::Completed);
    assert!(text.contains("Short string addr: 0x40000FC0 = \"Hi\"\n"));
    assert!(text.contains("Long string addr: 0x40000FDB = \"This is a very long"));
    // Guest RAM is zero-filled, so every probed nibble renders as 0.
    assert!(text.contains("Memory probe test:\nOffset 00: 0 \nOffset 04: 0 "));
    assert!(text.ends_with("\nIteration 1: OK\nIteration 2: OK"));
}

#[test]
fn test_trap_at_frame_edge_truncates_long_string() {
    let mut plan = quiet_plan();
    plan.guest.traps.push(TrapWindow {
        base: 0x4000_1000,
        size: "4KiB".to_string(),
    });

    let (text, report) = run_capture(&plan, Program::Boundaries, 5);

    assert_eq!(report.outcome, Outcome::Trapped { addr: 0x4000_1000 });
    assert!(!report.scenario_completed);
    assert_eq!(report.iterations_completed, 0);

    // 0x40001000 - 0x40000FDB = 37 bytes of the long string made it out.
    let expected_tail = "Long string addr: 0x40000FDB = \"This is a very long string that defin";
    assert!(text.ends_with(expected_tail), "trace tail: {:?}", text);
}

#[test]
fn test_absolute_anchor_marks_real_frame_edge_in_walk() {
    let mut plan = quiet_plan();
    plan.scan.anchor = capprobe_config::BoundaryAnchor::Absolute;

    let (text, _) = run_capture(&plan, Program::Boundaries, 0);

    // Byte 36 of the long string is the last one before 0x40001000.
    assert!(text.contains("\nOffset 032: defin|4KB|itely shoul\n"));
}

#[test]
fn test_corruption_is_rendered_verbatim() {
    let mut plan = quiet_plan();
    plan.guest.corruptions.push(capprobe_config::CorruptionWindow {
        base: 0x4000_0FC0,
        size: "2B".to_string(),
        mask: 0x20,
    });

    let (text, report) = run_capture(&plan, Program::Boundaries, 0);

    assert_eq!(report.outcome, Outcome::Completed);
    assert!(text.contains("Short string addr: 0x40000FC0 = \"hI\"\n"));
}
