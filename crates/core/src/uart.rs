// CapProbe - Capability Boundary Diagnostic Harness
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Polled UART transmitter.
//!
//! The driver writes the data register and then waits a fixed number of
//! busy-wait iterations. The flags register is part of the register map but
//! is never polled; output can be dropped if the settle delay is shorter
//! than the real drain time.

/// QEMU `virt` PL011 data register.
pub const PL011_DR: usize = 0x0900_0000;
/// QEMU `virt` PL011 flags register (declared, not polled).
pub const PL011_FR: usize = 0x0900_0018;

/// Busy-wait iterations after each transmitted byte.
pub const DEFAULT_SETTLE_ITERATIONS: u32 = 10_000;

/// Byte-level "transmit with settle time" capability.
///
/// Implementations cannot fail. A hardware problem shows up as missing or
/// garbled characters on the wire, never as an error value.
pub trait Transmit {
    fn transmit(&mut self, byte: u8);
}

impl<T: Transmit + ?Sized> Transmit for &mut T {
    fn transmit(&mut self, byte: u8) {
        (**self).transmit(byte)
    }
}

/// Blocking pause with no wall-clock calibration.
pub trait Delay {
    fn pause(&mut self);
}

impl<D: Delay + ?Sized> Delay for &mut D {
    fn pause(&mut self) {
        (**self).pause()
    }
}

/// Spins for a fixed iteration count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusyWait {
    pub iterations: u32,
}

impl BusyWait {
    pub const fn new(iterations: u32) -> Self {
        Self { iterations }
    }
}

impl Default for BusyWait {
    fn default() -> Self {
        Self::new(DEFAULT_SETTLE_ITERATIONS)
    }
}

impl Delay for BusyWait {
    fn pause(&mut self) {
        spin(self.iterations);
    }
}

/// Zero-length delay for hosts and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoDelay;

impl Delay for NoDelay {
    fn pause(&mut self) {}
}

/// Executes `iterations` loop turns that the optimiser cannot remove.
#[inline(never)]
pub fn spin(iterations: u32) {
    let mut i = 0u32;
    while core::hint::black_box(i) < iterations {
        core::hint::spin_loop();
        i += 1;
    }
}

/// Write side of a UART data register.
pub trait DataRegister {
    fn write(&mut self, value: u32);
}

/// Memory-mapped register pair of a polled UART.
#[derive(Debug)]
pub struct MmioRegisters {
    data: *mut u32,
    #[allow(dead_code)]
    flags: *const u32,
}

impl MmioRegisters {
    /// # Safety
    ///
    /// `data` must be the address of a writable UART data register that stays
    /// mapped for the lifetime of the returned value.
    pub const unsafe fn new(data: usize, flags: usize) -> Self {
        Self {
            data: data as *mut u32,
            flags: flags as *const u32,
        }
    }

    /// # Safety
    ///
    /// The QEMU `virt` PL011 must be mapped at its physical address.
    pub const unsafe fn pl011_virt() -> Self {
        Self::new(PL011_DR, PL011_FR)
    }
}

impl DataRegister for MmioRegisters {
    fn write(&mut self, value: u32) {
        // Safety: the constructor's contract guarantees the register is mapped.
        unsafe { core::ptr::write_volatile(self.data, value) }
    }
}

/// Polled transmitter: register write followed by a settle delay.
#[derive(Debug)]
pub struct Uart<R, D> {
    regs: R,
    settle: D,
}

impl<R: DataRegister, D: Delay> Uart<R, D> {
    pub fn new(regs: R, settle: D) -> Self {
        Self { regs, settle }
    }

    pub fn into_parts(self) -> (R, D) {
        (self.regs, self.settle)
    }
}

impl<R: DataRegister, D: Delay> Transmit for Uart<R, D> {
    fn transmit(&mut self, byte: u8) {
        self.regs.write(byte as u32);
        self.settle.pause();
    }
}
