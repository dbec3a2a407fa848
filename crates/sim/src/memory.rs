// CapProbe - Capability Boundary Diagnostic Harness
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use capprobe_core::Memory;
use std::cell::Cell;
use std::ops::Range;

/// A read the guest could not complete. On hardware this halts the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("guest trapped reading {addr:#010x}")]
pub struct Trap {
    pub addr: u32,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LayoutError {
    #[error("region '{0}' overlaps an existing region")]
    Overlap(String),
    #[error("{len} bytes at {addr:#010x} do not fit inside a single region")]
    OutOfRegion { addr: u32, len: usize },
}

/// A simple flat memory storage
#[derive(Debug)]
pub struct LinearMemory {
    pub name: String,
    pub data: Vec<u8>,
    pub base_addr: u32,
}

impl LinearMemory {
    pub fn new(name: &str, size: usize, base_addr: u32, fill: u8) -> Self {
        Self {
            name: name.to_string(),
            data: vec![fill; size],
            base_addr,
        }
    }

    fn span(&self) -> Range<u64> {
        self.base_addr as u64..self.base_addr as u64 + self.data.len() as u64
    }

    pub fn read_u8(&self, addr: u32) -> Option<u8> {
        if self.span().contains(&(addr as u64)) {
            Some(self.data[(addr - self.base_addr) as usize])
        } else {
            None
        }
    }

    pub fn load(&mut self, addr: u32, bytes: &[u8]) -> bool {
        let end = addr as u64 + bytes.len() as u64;
        if addr < self.base_addr || end > self.span().end {
            return false;
        }
        let offset = (addr - self.base_addr) as usize;
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        true
    }
}

/// Guest address space with trap and corruption windows.
///
/// Reads outside every region, or inside a trap window, fault. Reads inside
/// a corruption window succeed but return the stored byte XOR a mask.
#[derive(Debug, Default)]
pub struct SimMemory {
    regions: Vec<LinearMemory>,
    traps: Vec<Range<u64>>,
    corruptions: Vec<(Range<u64>, u8)>,
    reads: Cell<u64>,
}

impl SimMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_region(
        &mut self,
        name: &str,
        base: u32,
        size: usize,
        fill: u8,
    ) -> Result<(), LayoutError> {
        let region = LinearMemory::new(name, size, base, fill);
        let span = region.span();
        if self
            .regions
            .iter()
            .any(|r| r.span().start < span.end && span.start < r.span().end)
        {
            return Err(LayoutError::Overlap(name.to_string()));
        }
        self.regions.push(region);
        Ok(())
    }

    /// Copies `bytes` into the region that contains all of them.
    pub fn load(&mut self, addr: u32, bytes: &[u8]) -> Result<(), LayoutError> {
        for region in &mut self.regions {
            if region.load(addr, bytes) {
                return Ok(());
            }
        }
        Err(LayoutError::OutOfRegion {
            addr,
            len: bytes.len(),
        })
    }

    pub fn add_trap(&mut self, base: u32, size: u64) {
        self.traps.push(span(base, size));
    }

    pub fn add_corruption(&mut self, base: u32, size: u64, mask: u8) {
        self.corruptions.push((span(base, size), mask));
    }

    /// Successful and faulting reads issued so far.
    pub fn read_count(&self) -> u64 {
        self.reads.get()
    }

    pub fn regions(&self) -> &[LinearMemory] {
        &self.regions
    }
}

/// Window span clipped to the 32-bit guest.
fn span(base: u32, size: u64) -> Range<u64> {
    let start = base as u64;
    start..start.saturating_add(size).min(1 << 32)
}

impl Memory for SimMemory {
    type Fault = Trap;

    fn read_u8(&self, addr: u32) -> Result<u8, Trap> {
        self.reads.set(self.reads.get() + 1);
        let at = addr as u64;

        if self.traps.iter().any(|t| t.contains(&at)) {
            tracing::warn!("Capability fault at {:#010x}", addr);
            return Err(Trap { addr });
        }

        let Some(value) = self.regions.iter().find_map(|r| r.read_u8(addr)) else {
            tracing::warn!("Unmapped read at {:#010x}", addr);
            return Err(Trap { addr });
        };

        match self.corruptions.iter().find(|(span, _)| span.contains(&at)) {
            Some((_, mask)) => {
                tracing::debug!("Corrupted read at {:#010x}", addr);
                Ok(value ^ mask)
            }
            None => Ok(value),
        }
    }
}
