// CapProbe - Capability Boundary Diagnostic Harness
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Bare-metal diagnostic harness for capability-boundary faults.
//!
//! Everything in this crate runs on the guest without an allocator. Hardware
//! is reached only through the [`uart::Transmit`] and [`memory::Memory`]
//! capabilities, so the same scenarios run unchanged against MMIO on the
//! target and against a simulated guest on the host.
#![cfg_attr(not(test), no_std)]

pub mod format;
pub mod memory;
pub mod probe;
pub mod scenario;
pub mod uart;

pub use memory::{Memory, MemoryRegion};
pub use uart::{Delay, Transmit};

/// Unwraps a result whose fault type cannot be constructed.
///
/// On the target a faulting read never returns; it traps outside the
/// program's control. The raw memory capability therefore uses
/// [`core::convert::Infallible`] and callers strip the `Result` here.
#[inline]
pub fn infallible<T>(result: Result<T, core::convert::Infallible>) -> T {
    match result {
        Ok(value) => value,
        Err(never) => match never {},
    }
}
