// CapProbe - Capability Boundary Diagnostic Harness
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Guest image construction and bounded program runs.

use anyhow::{Context, Result};
use capprobe_config::{parse_size, ProbePlan, Program};
use capprobe_core::memory::MemoryRegion;
use capprobe_core::scenario::{
    self, strings, BoundarySession, BoundaryTargets, DebugSession, DebugTargets, Driver,
};
use capprobe_core::uart::{BusyWait, Delay, NoDelay, Transmit};
use serde::Serialize;

use crate::memory::{SimMemory, Trap};

/// Where one probe target landed in the simulated guest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Placement {
    pub name: &'static str,
    pub addr: u32,
    pub len: u32,
    /// Stride boundaries strictly inside the string, terminator included.
    pub boundaries: u32,
}

/// Simulated guest memory with every probe target loaded.
#[derive(Debug)]
pub struct GuestImage {
    pub memory: SimMemory,
    /// Address the UART data register is decoded at.
    pub uart_data_register: u32,
    pub debug: DebugTargets,
    pub boundaries: BoundaryTargets,
    pub placements: Vec<Placement>,
}

impl GuestImage {
    /// Lays the static strings out back to back from the plan's rodata
    /// address, the way a linker would, and the character array at the
    /// stack address.
    pub fn from_plan(plan: &ProbePlan) -> Result<Self> {
        let stride = plan.stride()?;
        let uart_data_register = guest_addr(plan.uart.data_register)?;
        let mut memory = SimMemory::new();

        for region in &plan.guest.regions {
            let size = parse_size(&region.size)?;
            memory
                .add_region(&region.name, guest_addr(region.base)?, size as usize, region.fill)
                .with_context(|| format!("Failed to map region '{}'", region.name))?;
        }

        let rodata: [(&'static str, &[u8]); 5] = [
            ("short", strings::SHORT),
            ("medium", strings::MEDIUM),
            ("long", strings::LONG),
            ("debug_static", strings::DEBUG_STATIC),
            ("periodic", strings::PERIODIC),
        ];
        let mut placements = Vec::with_capacity(rodata.len() + 1);
        let mut cursor = guest_addr(plan.guest.rodata)?;
        for (name, bytes) in rodata {
            placements.push(place(&mut memory, name, cursor, bytes, stride)?);
            cursor = cursor.wrapping_add(bytes.len() as u32);
        }
        placements.push(place(
            &mut memory,
            "stack",
            guest_addr(plan.guest.stack)?,
            &strings::STACK,
            stride,
        )?);

        if let Some(region) = memory
            .regions()
            .iter()
            .find(|r| r.read_u8(uart_data_register).is_some())
        {
            anyhow::bail!(
                "UART data register {:#010x} is shadowed by region '{}'",
                uart_data_register,
                region.name
            );
        }
        tracing::info!("UART data register at {:#010x}", uart_data_register);

        // Windows go in after loading so the strings themselves can sit
        // underneath them.
        for window in &plan.guest.traps {
            memory.add_trap(guest_addr(window.base)?, parse_size(&window.size)?);
        }
        for window in &plan.guest.corruptions {
            memory.add_corruption(
                guest_addr(window.base)?,
                parse_size(&window.size)?,
                window.mask,
            );
        }

        let addr_of = |name: &str| {
            placements
                .iter()
                .find(|p| p.name == name)
                .map(|p| p.addr)
                .unwrap_or_default()
        };
        let debug = DebugTargets {
            static_string: addr_of("debug_static"),
            stack_string: addr_of("stack"),
            periodic: addr_of("periodic"),
        };
        let boundaries = BoundaryTargets {
            short: addr_of("short"),
            medium: addr_of("medium"),
            long: addr_of("long"),
            guest_ram: guest_addr(plan.guest.guest_ram)?,
        };

        Ok(Self {
            memory,
            uart_data_register,
            debug,
            boundaries,
            placements,
        })
    }
}

fn guest_addr(addr: u64) -> Result<u32> {
    u32::try_from(addr).with_context(|| format!("Address {:#x} does not fit the 32-bit guest", addr))
}

fn place(
    memory: &mut SimMemory,
    name: &'static str,
    addr: u32,
    bytes: &[u8],
    stride: std::num::NonZeroU32,
) -> Result<Placement> {
    memory
        .load(addr, bytes)
        .with_context(|| format!("Failed to place '{}' string", name))?;
    let len = bytes.len() as u32;
    let boundaries = MemoryRegion::new(addr, len, stride).interior_boundaries();
    tracing::info!(
        "Placed {} ({} bytes) at {:#010x}, {} stride boundaries inside",
        name,
        len,
        addr,
        boundaries
    );
    Ok(Placement {
        name,
        addr,
        len,
        boundaries,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// The scenario pass and every requested iteration finished.
    Completed,
    /// A read trapped; the trace stops where the guest would have hung.
    Trapped { addr: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub program: &'static str,
    pub uart_data_register: u32,
    pub outcome: Outcome,
    pub scenario_completed: bool,
    pub iterations_completed: u32,
    pub reads: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub program: Program,
    pub iterations: u32,
    /// Skip the busy-wait between periodic iterations.
    pub skip_period_delay: bool,
}

/// Runs the program's scenario pass, then `iterations` periodic ticks.
///
/// A trap ends the run early and is reported in the [`RunReport`]; it is not
/// an error of the runner.
pub fn run<T: Transmit>(
    plan: &ProbePlan,
    image: &GuestImage,
    tx: T,
    opts: &RunOptions,
) -> Result<RunReport> {
    let limits = plan.limits()?;
    let label = plan.label(opts.program);
    let period = plan.period_iterations(opts.program);

    let report = match opts.program {
        Program::Debug => {
            let session = DebugSession {
                targets: image.debug,
                limits,
                label,
            };
            if opts.skip_period_delay {
                drive(session, tx, image, NoDelay, opts)
            } else {
                drive(session, tx, image, BusyWait::new(period), opts)
            }
        }
        Program::Boundaries => {
            let session = BoundarySession {
                targets: image.boundaries,
                limits,
                label,
            };
            if opts.skip_period_delay {
                drive(session, tx, image, NoDelay, opts)
            } else {
                drive(session, tx, image, BusyWait::new(period), opts)
            }
        }
    };

    match report.outcome {
        Outcome::Completed => tracing::info!(
            "{} completed scenario pass and {} iterations ({} reads)",
            report.program,
            report.iterations_completed,
            report.reads
        ),
        Outcome::Trapped { addr } => tracing::warn!(
            "{} trapped at {:#010x} after {} iterations",
            report.program,
            addr,
            report.iterations_completed
        ),
    }
    Ok(report)
}

fn drive<P, T, D>(
    program: P,
    tx: T,
    image: &GuestImage,
    period: D,
    opts: &RunOptions,
) -> RunReport
where
    P: scenario::Program,
    T: Transmit,
    D: Delay,
{
    let mut driver = Driver::new(program, tx, &image.memory, period);
    let mut scenario_completed = false;

    let result: Result<(), Trap> = driver.run_once().and_then(|()| {
        scenario_completed = true;
        driver.run_iterations(opts.iterations)
    });

    let outcome = match result {
        Ok(()) => Outcome::Completed,
        Err(trap) => Outcome::Trapped { addr: trap.addr },
    };

    RunReport {
        program: program_name(opts.program),
        uart_data_register: image.uart_data_register,
        outcome,
        scenario_completed,
        iterations_completed: driver.iteration(),
        reads: image.memory.read_count(),
    }
}

pub fn program_name(program: Program) -> &'static str {
    match program {
        Program::Debug => "debug-session",
        Program::Boundaries => "boundary-test",
    }
}
