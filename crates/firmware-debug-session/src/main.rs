// CapProbe - Capability Boundary Diagnostic Harness
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Debug session guest: static, direct, stack and single-character probes,
//! then a bounded dump of a fixed string on every period.
#![no_std]
#![no_main]

use capprobe_core::memory::RawMemory;
use capprobe_core::scenario::{
    strings, DebugSession, DebugTargets, Driver, DEBUG_PERIOD_ITERATIONS,
};
use capprobe_core::uart::{BusyWait, MmioRegisters, Uart};
use panic_halt as _;

#[no_mangle]
pub extern "C" fn main() -> ! {
    // Must live in this frame, not in rodata.
    let stack = core::hint::black_box(strings::STACK);

    let targets = DebugTargets {
        static_string: RawMemory::addr_of(strings::DEBUG_STATIC),
        stack_string: RawMemory::addr_of(&stack),
        periodic: RawMemory::addr_of(strings::PERIODIC),
    };

    // Safety: the platform maps the PL011 and our own image before jumping
    // here; anything else we read is exactly what the probe is for.
    let (uart, mem) = unsafe {
        (
            Uart::new(MmioRegisters::pl011_virt(), BusyWait::default()),
            RawMemory::new(),
        )
    };

    let driver = Driver::new(
        DebugSession::new(targets),
        uart,
        mem,
        BusyWait::new(DEBUG_PERIOD_ITERATIONS),
    );
    match capprobe_core::infallible(driver.run_forever()) {}
}
