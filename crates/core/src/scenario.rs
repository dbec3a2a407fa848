// CapProbe - Capability Boundary Diagnostic Harness
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Fixed scenario lists and the periodic observation loop.

use core::convert::Infallible;
use core::num::NonZeroU32;

use crate::format::{
    emit_iteration_label, emit_prefixed_address, emit_str, emit_terminated, IterationLabel,
};
use crate::memory::{Memory, MemoryRegion, FRAME_STRIDE};
use crate::probe::{dump_bounded, walk, Anchor, Cell, Step, WalkLayout};
use crate::uart::{Delay, Transmit};

/// Probe targets. Every string is NUL-terminated; the terminator is what
/// the scans stop on.
pub mod strings {
    pub const DEBUG_STATIC: &[u8] = b"Hello World Debug Test!\0";
    pub const STACK: [u8; 12] = *b"Hello Stack\0";
    pub const PERIODIC: &[u8] = b"Hello from seL4!\0";
    pub const SHORT: &[u8] = b"Hi\0";
    pub const MEDIUM: &[u8] = b"Hello World Test String\0";
    pub const LONG: &[u8] = b"This is a very long string that definitely should cross 4KB frame boundaries in the seL4 capability system and cause memory access failures when FreeRTOS tries to read consecutive bytes across capability boundaries\0";
}

/// Guest RAM base on QEMU `virt`.
pub const GUEST_RAM_BASE: u32 = 0x4000_0000;

/// Busy-wait turns between debug-session iterations.
pub const DEBUG_PERIOD_ITERATIONS: u32 = 100_000_000;
/// Busy-wait turns between boundary-test iterations.
pub const BOUNDARY_PERIOD_ITERATIONS: u32 = 5_000_000;

/// Number of leading bytes sent one by one in the control case.
const INDIVIDUAL_READS: u32 = 5;

/// Scan bounds shared by both programs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Safety cap of a bounded string dump.
    pub dump_cap: u32,
    /// Safety cap of the byte-by-byte walk.
    pub walk_cap: u32,
    /// Bytes covered by the frame pattern probe.
    pub frame_span: u32,
    /// Pitch of the frame pattern probe.
    pub frame_pitch: u32,
    pub stride: NonZeroU32,
    pub anchor: Anchor,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            dump_cap: 32,
            walk_cap: 100,
            frame_span: 32,
            frame_pitch: 4,
            stride: FRAME_STRIDE,
            anchor: Anchor::Relative,
        }
    }
}

/// One diagnostic program: a single scenario pass plus a periodic tick.
pub trait Program {
    fn run_once<T, M>(&self, tx: &mut T, mem: &M) -> Result<(), M::Fault>
    where
        T: Transmit + ?Sized,
        M: Memory + ?Sized;

    /// Emits the trace block for `iteration` (1-based).
    fn tick<T, M>(&self, tx: &mut T, mem: &M, iteration: u32) -> Result<(), M::Fault>
    where
        T: Transmit + ?Sized,
        M: Memory + ?Sized;
}

/// Addresses probed by the debug session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugTargets {
    pub static_string: u32,
    pub stack_string: u32,
    pub periodic: u32,
}

/// Static string, direct scan, stack array and single-character control
/// case, then a bounded dump every iteration.
#[derive(Debug, Clone, Copy)]
pub struct DebugSession {
    pub targets: DebugTargets,
    pub limits: Limits,
    pub label: IterationLabel,
}

impl DebugSession {
    pub fn new(targets: DebugTargets) -> Self {
        Self {
            targets,
            limits: Limits::default(),
            label: IterationLabel::Clamp,
        }
    }
}

impl Program for DebugSession {
    fn run_once<T, M>(&self, tx: &mut T, mem: &M) -> Result<(), M::Fault>
    where
        T: Transmit + ?Sized,
        M: Memory + ?Sized,
    {
        let t = &self.targets;
        let cap = self.limits.dump_cap;

        emit_str(tx, "=== seL4 Memory Access Debug Session ===\n");
        emit_str(tx, "Testing capability boundary crossing...\n\n");

        emit_str(tx, "=== Test 1: Static String ===\n");
        dump_bounded(tx, mem, t.static_string, cap)?;

        emit_str(tx, "=== Test 2: Direct uart_puts ===\n");
        emit_str(tx, "Before: ");
        emit_terminated(tx, mem, t.static_string)?;
        emit_str(tx, " :After\n");

        emit_str(tx, "=== Test 3: Stack Array ===\n");
        dump_bounded(tx, mem, t.stack_string, cap)?;

        // Control case: no scan loop, each byte read and sent on its own.
        emit_str(tx, "=== Test 4: Individual Access ===\n");
        for i in 0..INDIVIDUAL_READS {
            let b = mem.read_u8(t.static_string.wrapping_add(i))?;
            tx.transmit(b);
        }
        emit_str(tx, " <- Individual chars\n");

        emit_str(tx, "\n=== Starting periodic tests ===\n");
        Ok(())
    }

    fn tick<T, M>(&self, tx: &mut T, mem: &M, iteration: u32) -> Result<(), M::Fault>
    where
        T: Transmit + ?Sized,
        M: Memory + ?Sized,
    {
        emit_str(tx, "Iteration ");
        emit_iteration_label(tx, iteration, self.label);
        emit_str(tx, ": ");
        dump_bounded(tx, mem, self.targets.periodic, self.limits.dump_cap)?;
        Ok(())
    }
}

/// Addresses probed by the boundary test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundaryTargets {
    pub short: u32,
    pub medium: u32,
    pub long: u32,
    pub guest_ram: u32,
}

/// String placement survey, byte-by-byte walk of the long string and the
/// frame pattern probe, then a heartbeat every iteration.
#[derive(Debug, Clone, Copy)]
pub struct BoundarySession {
    pub targets: BoundaryTargets,
    pub limits: Limits,
    pub label: IterationLabel,
}

impl BoundarySession {
    pub fn new(targets: BoundaryTargets) -> Self {
        Self {
            targets,
            limits: Limits::default(),
            label: IterationLabel::Wrap,
        }
    }

    fn string_walk_layout(&self) -> WalkLayout {
        WalkLayout {
            anchor: self.limits.anchor,
            ..WalkLayout::bytes("|4KB|")
        }
    }

    fn frame_probe_layout(&self) -> WalkLayout {
        WalkLayout {
            step: Step::Sampled(self.limits.frame_pitch),
            stop_at_nul: false,
            per_line: 1,
            label_width: 2,
            cell: Cell::Nibble,
            cell_suffix: " ",
            marker: "| 4KB boundary |",
            anchor: self.limits.anchor,
        }
    }

    fn crossing_test<T, M>(&self, tx: &mut T, mem: &M) -> Result<(), M::Fault>
    where
        T: Transmit + ?Sized,
        M: Memory + ?Sized,
    {
        let t = &self.targets;
        emit_str(tx, "=== Testing 4KB Boundary Crossing ===\n");

        for (name, addr) in [("Short", t.short), ("Medium", t.medium), ("Long", t.long)] {
            emit_str(tx, name);
            emit_str(tx, " string addr: ");
            emit_prefixed_address(tx, addr);
            emit_str(tx, " = \"");
            emit_terminated(tx, mem, addr)?;
            emit_str(tx, "\"\n");
        }

        emit_str(tx, "\n=== Byte-by-byte Analysis ===\n");
        emit_str(tx, "Long string bytes: [");
        let region = MemoryRegion::new(t.long, self.limits.walk_cap, self.limits.stride);
        walk(tx, mem, region, &self.string_walk_layout())?;
        emit_str(tx, "]\n");
        Ok(())
    }

    fn frame_pattern<T, M>(&self, tx: &mut T, mem: &M) -> Result<(), M::Fault>
    where
        T: Transmit + ?Sized,
        M: Memory + ?Sized,
    {
        emit_str(tx, "\n=== Testing CapDL Frame Pattern ===\n");
        emit_str(tx, "Based on vm_minimal.cdl analysis:\n");
        emit_str(tx, "- First 8 frames: 4KB each (32768->40960 offset)\n");
        emit_str(tx, "- Later frames: 64KB each\n");
        emit_str(tx, "- String likely in early 4KB frames\n\n");

        emit_str(tx, "Memory probe test:");
        let region = MemoryRegion::new(
            self.targets.guest_ram,
            self.limits.frame_span,
            self.limits.stride,
        );
        walk(tx, mem, region, &self.frame_probe_layout())?;
        emit_str(tx, "\n");
        Ok(())
    }
}

impl Program for BoundarySession {
    fn run_once<T, M>(&self, tx: &mut T, mem: &M) -> Result<(), M::Fault>
    where
        T: Transmit + ?Sized,
        M: Memory + ?Sized,
    {
        emit_str(tx, "=== seL4 Capability Boundary Test ===\n");
        emit_str(tx, "Testing memory fragmentation hypothesis\n");
        emit_str(tx, "Based on CapDL spec: vm_minimal.cdl\n\n");

        self.crossing_test(tx, mem)?;
        self.frame_pattern(tx, mem)?;

        emit_str(tx, "\n=== Test Complete ===\n");
        emit_str(tx, "If string access fails mid-way, confirms\n");
        emit_str(tx, "capability boundary crossing issue.\n");
        Ok(())
    }

    fn tick<T, M>(&self, tx: &mut T, _mem: &M, iteration: u32) -> Result<(), M::Fault>
    where
        T: Transmit + ?Sized,
        M: Memory + ?Sized,
    {
        emit_str(tx, "\nIteration ");
        emit_iteration_label(tx, iteration, self.label);
        emit_str(tx, ": ");
        emit_str(tx, "OK");
        Ok(())
    }
}

/// Runs a [`Program`] once, then ticks it forever with a busy-wait period.
#[derive(Debug)]
pub struct Driver<P, T, M, D> {
    program: P,
    tx: T,
    mem: M,
    period: D,
    iteration: u32,
}

impl<P, T, M, D> Driver<P, T, M, D>
where
    P: Program,
    T: Transmit,
    M: Memory,
    D: Delay,
{
    pub fn new(program: P, tx: T, mem: M, period: D) -> Self {
        Self {
            program,
            tx,
            mem,
            period,
            iteration: 0,
        }
    }

    /// Completed periodic iterations.
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn run_once(&mut self) -> Result<(), M::Fault> {
        self.program.run_once(&mut self.tx, &self.mem)
    }

    /// One periodic block followed by the period delay.
    pub fn tick(&mut self) -> Result<(), M::Fault> {
        let next = self.iteration.wrapping_add(1);
        self.program.tick(&mut self.tx, &self.mem, next)?;
        self.iteration = next;
        self.period.pause();
        Ok(())
    }

    pub fn run_iterations(&mut self, count: u32) -> Result<(), M::Fault> {
        for _ in 0..count {
            self.tick()?;
        }
        Ok(())
    }

    /// Scenario pass, then the periodic loop. Only a fault ends it.
    pub fn run_forever(mut self) -> Result<Infallible, M::Fault> {
        self.run_once()?;
        loop {
            self.tick()?;
        }
    }

    pub fn into_parts(self) -> (P, T, M, D) {
        (self.program, self.tx, self.mem, self.period)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FlatMemory, Recorder, Unmapped};
    use crate::uart::NoDelay;

    /// Lays strings out back to back from `base`, returning their addresses.
    fn pack(base: u32, items: &[&[u8]]) -> (FlatMemory, Vec<u32>) {
        let mut data = Vec::new();
        let mut addrs = Vec::new();
        for item in items {
            addrs.push(base + data.len() as u32);
            data.extend_from_slice(item);
        }
        (FlatMemory::new(base, &data), addrs)
    }

    fn debug_fixture() -> (FlatMemory, DebugSession) {
        let (mem, a) = pack(
            0x4000_1000,
            &[strings::DEBUG_STATIC, &strings::STACK, strings::PERIODIC],
        );
        let session = DebugSession::new(DebugTargets {
            static_string: a[0],
            stack_string: a[1],
            periodic: a[2],
        });
        (mem, session)
    }

    #[test]
    fn test_debug_session_scenario_pass() {
        let (mem, session) = debug_fixture();
        let mut rec = Recorder::default();
        session.run_once(&mut rec, &mem).unwrap();

        let expected = "\
=== seL4 Memory Access Debug Session ===
Testing capability boundary crossing...

=== Test 1: Static String ===
DEBUG: String addr=0x40001000 content=[Hell|o Wo|rld |Debu|g Te|st!]
=== Test 2: Direct uart_puts ===
Before: Hello World Debug Test! :After
=== Test 3: Stack Array ===
DEBUG: String addr=0x40001018 content=[Hell|o St|ack]
=== Test 4: Individual Access ===
Hello <- Individual chars

=== Starting periodic tests ===
";
        assert_eq!(rec.text(), expected);
    }

    #[test]
    fn test_three_iterations_emit_three_labelled_blocks() {
        let (mem, session) = debug_fixture();
        let mut driver = Driver::new(session, Recorder::default(), mem, NoDelay);
        driver.run_iterations(3).unwrap();
        assert_eq!(driver.iteration(), 3);

        let (_, rec, _, _) = driver.into_parts();
        let text = rec.text();
        let blocks: Vec<&str> = text.lines().collect();
        assert_eq!(blocks.len(), 3);
        for (i, line) in blocks.iter().enumerate() {
            let expected = format!(
                "Iteration {}: DEBUG: String addr=0x40001024 content=[Hell|o fr|om s|eL4!|]",
                i + 1
            );
            assert_eq!(*line, expected);
        }
    }

    #[test]
    fn test_iteration_labels_keep_each_program_convention() {
        let (mem, session) = debug_fixture();
        let mut driver = Driver::new(session, Recorder::default(), mem, NoDelay);
        driver.run_iterations(11).unwrap();
        let (_, rec, _, _) = driver.into_parts();
        let labels: String = rec
            .text()
            .lines()
            .map(|l| l.chars().nth("Iteration ".len()).unwrap())
            .collect();
        assert_eq!(labels, "123456789XX");

        let boundary = BoundarySession::new(BoundaryTargets {
            short: 0,
            medium: 0,
            long: 0,
            guest_ram: 0,
        });
        let mut rec = Recorder::default();
        let empty = FlatMemory::new(0, &[]);
        for i in 9..=11 {
            boundary.tick(&mut rec, &empty, i).unwrap();
        }
        assert_eq!(rec.text(), "\nIteration 9: OK\nIteration 0: OK\nIteration 1: OK");
    }

    #[test]
    fn test_boundary_session_scenario_pass() {
        let (strings_mem, a) = pack(
            0x4000_0000,
            &[strings::SHORT, strings::MEDIUM, strings::LONG],
        );
        let mut data = strings_mem.data.clone();
        // Frame probe sees the first 32 bytes of guest RAM, which hold the strings.
        data.resize(0x100, 0);
        let mem = FlatMemory::new(0x4000_0000, &data);

        let session = BoundarySession::new(BoundaryTargets {
            short: a[0],
            medium: a[1],
            long: a[2],
            guest_ram: GUEST_RAM_BASE,
        });
        let mut rec = Recorder::default();
        session.run_once(&mut rec, &mem).unwrap();
        let text = rec.text();

        assert!(text.contains("Short string addr: 0x40000000 = \"Hi\"\n"));
        assert!(text.contains("Medium string addr: 0x40000003 = \"Hello World Test String\"\n"));
        assert!(text.contains("Long string addr: 0x4000001B = \"This is a very long"));
        assert!(text.contains(
            "Long string bytes: [\nOffset 000: This is a very l\nOffset 016: ong string that \n"
        ));
        // 100-byte cap: the last line holds offsets 96..99.
        assert!(text.contains("\nOffset 096: ity ]\n"));
        assert!(!text.contains("|4KB|"));

        // Bytes at 0x40000000 + 0, 4, 8 .. 28 of "Hi\0Hello World Test String\0This"
        assert!(text.contains(
            "Memory probe test:\nOffset 00: 8 \nOffset 04: 5 \nOffset 08: 0 \nOffset 12: < \n"
        ));
        assert!(text.ends_with(
            "\n=== Test Complete ===\nIf string access fails mid-way, confirms\ncapability boundary crossing issue.\n"
        ));
    }

    #[test]
    fn test_fault_in_scenario_pass_truncates_trace() {
        // Only the first 10 bytes of the static string are mapped.
        let mem = FlatMemory::new(0x1000, &strings::DEBUG_STATIC[..10]);
        let session = DebugSession::new(DebugTargets {
            static_string: 0x1000,
            stack_string: 0x2000,
            periodic: 0x3000,
        });
        let mut rec = Recorder::default();
        let err = session.run_once(&mut rec, &mem).unwrap_err();

        assert_eq!(err, Unmapped(0x100A));
        assert!(rec.text().ends_with("content=[Hell|o Wo|rl"));
    }

    #[test]
    fn test_run_forever_returns_only_on_fault() {
        let (mem, session) = debug_fixture();
        // Drop the periodic string so the first tick faults.
        let mut session = session;
        session.targets.periodic = 0x9000_0000;
        let driver = Driver::new(session, Recorder::default(), mem, NoDelay);
        match driver.run_forever() {
            Err(fault) => assert_eq!(fault, Unmapped(0x9000_0000)),
            Ok(never) => match never {},
        }
    }
}
