// CapProbe - Capability Boundary Diagnostic Harness
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use core::convert::Infallible;
use core::num::NonZeroU32;

/// Default boundary stride: one 4KB frame.
pub const FRAME_STRIDE: NonZeroU32 = match NonZeroU32::new(4096) {
    Some(stride) => stride,
    None => panic!("stride must be non-zero"),
};

/// Read access to guest memory.
///
/// A read that traps is reported through `Fault`. The probe engine never
/// inspects or recovers from a fault; it only propagates it.
pub trait Memory {
    type Fault;

    fn read_u8(&self, addr: u32) -> Result<u8, Self::Fault>;

    /// Little endian word read. Implementations backed by real hardware
    /// should issue a single 32-bit access instead of four byte reads.
    fn read_u32(&self, addr: u32) -> Result<u32, Self::Fault> {
        let b0 = self.read_u8(addr)? as u32;
        let b1 = self.read_u8(addr.wrapping_add(1))? as u32;
        let b2 = self.read_u8(addr.wrapping_add(2))? as u32;
        let b3 = self.read_u8(addr.wrapping_add(3))? as u32;
        Ok(b0 | (b1 << 8) | (b2 << 16) | (b3 << 24))
    }
}

impl<M: Memory + ?Sized> Memory for &M {
    type Fault = M::Fault;

    fn read_u8(&self, addr: u32) -> Result<u8, Self::Fault> {
        (**self).read_u8(addr)
    }

    fn read_u32(&self, addr: u32) -> Result<u32, Self::Fault> {
        (**self).read_u32(addr)
    }
}

/// Direct volatile access to the guest address space.
///
/// A read that the platform refuses traps in hardware and never returns, so
/// the fault type is uninhabited.
#[derive(Debug, Clone, Copy)]
pub struct RawMemory {
    _private: (),
}

impl RawMemory {
    /// # Safety
    ///
    /// Every address later passed to [`Memory::read_u8`] or
    /// [`Memory::read_u32`] is dereferenced as-is. The caller accepts that a
    /// read of unmapped or capability-protected memory halts the core.
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }

    /// Address of a byte slice as seen by the probe.
    pub fn addr_of(bytes: &[u8]) -> u32 {
        bytes.as_ptr() as usize as u32
    }
}

impl Memory for RawMemory {
    type Fault = Infallible;

    fn read_u8(&self, addr: u32) -> Result<u8, Infallible> {
        // Safety: see `RawMemory::new`.
        Ok(unsafe { core::ptr::read_volatile(addr as usize as *const u8) })
    }

    fn read_u32(&self, addr: u32) -> Result<u32, Infallible> {
        // Safety: see `RawMemory::new`. Unaligned words are the caller's problem.
        Ok(unsafe { core::ptr::read_volatile(addr as usize as *const u32) })
    }
}

/// A span of guest memory partitioned into `stride`-sized frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    pub base: u32,
    pub length: u32,
    pub stride: NonZeroU32,
}

impl MemoryRegion {
    pub const fn new(base: u32, length: u32, stride: NonZeroU32) -> Self {
        Self {
            base,
            length,
            stride,
        }
    }

    /// Region starting at `base` with the default 4KB stride.
    pub const fn framed(base: u32, length: u32) -> Self {
        Self::new(base, length, FRAME_STRIDE)
    }

    pub fn end(&self) -> u64 {
        self.base as u64 + self.length as u64
    }

    pub fn addr(&self, offset: u32) -> u32 {
        self.base.wrapping_add(offset)
    }

    /// Number of stride-aligned addresses strictly inside the region.
    pub fn interior_boundaries(&self) -> u32 {
        let stride = self.stride.get() as u64;
        let first = (self.base as u64 / stride + 1) * stride;
        if first >= self.end() {
            return 0;
        }
        ((self.end() - 1 - first) / stride + 1) as u32
    }
}
