// CapProbe - Capability Boundary Diagnostic Harness
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Boundary test guest: string placement survey, byte walk across 4KB frames
//! and a raw guest RAM probe, then a heartbeat on every period.
#![no_std]
#![no_main]

use capprobe_core::memory::RawMemory;
use capprobe_core::scenario::{
    strings, BoundarySession, BoundaryTargets, Driver, BOUNDARY_PERIOD_ITERATIONS,
    GUEST_RAM_BASE,
};
use capprobe_core::uart::{BusyWait, MmioRegisters, Uart};
use panic_halt as _;

#[no_mangle]
pub extern "C" fn main() -> ! {
    let targets = BoundaryTargets {
        short: RawMemory::addr_of(strings::SHORT),
        medium: RawMemory::addr_of(strings::MEDIUM),
        long: RawMemory::addr_of(strings::LONG),
        guest_ram: GUEST_RAM_BASE,
    };

    // Safety: the PL011 is mapped by the platform. Guest RAM reads may trap,
    // which halts the core where the trace stops.
    let (uart, mem) = unsafe {
        (
            Uart::new(MmioRegisters::pl011_virt(), BusyWait::default()),
            RawMemory::new(),
        )
    };

    let driver = Driver::new(
        BoundarySession::new(targets),
        uart,
        mem,
        BusyWait::new(BOUNDARY_PERIOD_ITERATIONS),
    );
    match capprobe_core::infallible(driver.run_forever()) {}
}
