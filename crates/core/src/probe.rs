// CapProbe - Capability Boundary Diagnostic Harness
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Boundary probe engine.
//!
//! [`Scan`] is the lazily evaluated probe result: each call to `next` performs
//! exactly one read, so the value for offset `i` is only fetched after offset
//! `i - 1` has been handed to the renderer. A read fault ends the scan and is
//! passed through untouched. Values are never validated; garbage is rendered
//! as-is.

use crate::format::{emit_decimal, emit_hex_address, emit_hex_byte, emit_str};
use crate::memory::{Memory, MemoryRegion, FRAME_STRIDE};
use crate::uart::Transmit;

/// Bytes between `|` separators in a bounded string dump.
pub const DUMP_GRANULE: u32 = 4;

/// Access width and pitch of a walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Byte,
    Word,
    /// One byte read every `n` bytes. `0` behaves like `1`.
    Sampled(u32),
}

impl Step {
    pub const fn size(self) -> u32 {
        match self {
            Step::Byte => 1,
            Step::Word => 4,
            Step::Sampled(0) => 1,
            Step::Sampled(n) => n,
        }
    }

    /// Bytes actually read per step. Sampled walks read one byte per pitch.
    pub const fn width(self) -> u32 {
        match self {
            Step::Word => 4,
            Step::Byte | Step::Sampled(_) => 1,
        }
    }
}

/// Where stride boundaries are measured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Anchor {
    /// Offsets from the region start, assuming the region itself is
    /// stride-aligned. Nothing guarantees that it is.
    #[default]
    Relative,
    /// Absolute guest addresses.
    Absolute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopReason {
    /// A NUL value was read.
    Terminator,
    /// The region length or safety cap was exhausted.
    #[default]
    Cap,
}

/// One step of a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub offset: u32,
    pub value: u32,
    /// The step ends on a stride boundary.
    pub crossed_boundary: bool,
}

/// Lazy, strictly ordered walk over a [`MemoryRegion`].
#[derive(Debug)]
pub struct Scan<'m, M: ?Sized> {
    mem: &'m M,
    region: MemoryRegion,
    step: Step,
    anchor: Anchor,
    stop_at_nul: bool,
    offset: u32,
    stop: Option<StopReason>,
    faulted: bool,
}

impl<'m, M: Memory + ?Sized> Scan<'m, M> {
    pub fn new(mem: &'m M, region: MemoryRegion, step: Step) -> Self {
        Self {
            mem,
            region,
            step,
            anchor: Anchor::Relative,
            stop_at_nul: false,
            offset: 0,
            stop: None,
            faulted: false,
        }
    }

    /// End the scan at the first zero value instead of yielding it.
    pub fn stop_at_nul(mut self) -> Self {
        self.stop_at_nul = true;
        self
    }

    pub fn anchored(mut self, anchor: Anchor) -> Self {
        self.anchor = anchor;
        self
    }

    /// Why the scan ended. `None` while running or after a fault.
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop
    }

    fn ends_on_boundary(&self, offset: u32) -> bool {
        let stride = self.region.stride.get() as u64;
        let next = offset as u64 + self.step.size() as u64;
        match self.anchor {
            Anchor::Relative => next % stride == 0,
            Anchor::Absolute => (self.region.base as u64 + next) % stride == 0,
        }
    }
}

impl<M: Memory + ?Sized> Iterator for Scan<'_, M> {
    type Item = Result<Observation, M::Fault>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.stop.is_some() || self.faulted {
            return None;
        }

        let offset = self.offset;
        if offset as u64 + self.step.width() as u64 > self.region.length as u64 {
            self.stop = Some(StopReason::Cap);
            return None;
        }

        let addr = self.region.addr(offset);
        let read = match self.step {
            Step::Byte | Step::Sampled(_) => self.mem.read_u8(addr).map(u32::from),
            Step::Word => self.mem.read_u32(addr),
        };
        let value = match read {
            Ok(value) => value,
            Err(fault) => {
                self.faulted = true;
                return Some(Err(fault));
            }
        };

        if self.stop_at_nul && value == 0 {
            self.stop = Some(StopReason::Terminator);
            return None;
        }

        // Past the end of a u32 region the next bound check stops the scan.
        self.offset = offset.saturating_add(self.step.size());
        Some(Ok(Observation {
            offset,
            value,
            crossed_boundary: self.ends_on_boundary(offset),
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DumpSummary {
    pub emitted: u32,
    pub separators: u32,
    pub stop: StopReason,
}

/// Bounded string dump.
///
/// Prints the string address, then up to `cap` bytes or until NUL inside
/// `[`..`]`, with a `|` after every fourth byte as a coarse stand-in for
/// capability granules.
pub fn dump_bounded<T, M>(
    tx: &mut T,
    mem: &M,
    addr: u32,
    cap: u32,
) -> Result<DumpSummary, M::Fault>
where
    T: Transmit + ?Sized,
    M: Memory + ?Sized,
{
    emit_str(tx, "DEBUG: String addr=0x");
    emit_hex_address(tx, addr);
    emit_str(tx, " content=[");

    let mut summary = DumpSummary::default();
    let mut scan = Scan::new(mem, MemoryRegion::new(addr, cap, FRAME_STRIDE), Step::Byte)
        .stop_at_nul();
    for obs in scan.by_ref() {
        let obs = obs?;
        tx.transmit(obs.value as u8);
        summary.emitted += 1;
        if summary.emitted % DUMP_GRANULE == 0 {
            emit_str(tx, "|");
            summary.separators += 1;
        }
    }
    summary.stop = scan.stop_reason().unwrap_or_default();

    emit_str(tx, "]\n");
    tracing::debug!(
        addr,
        emitted = summary.emitted,
        separators = summary.separators,
        stop = ?summary.stop,
        "bounded dump done"
    );
    Ok(summary)
}

/// How a walk value is printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cell {
    /// The raw byte(s), least significant first.
    Raw,
    /// A single digit `'0' + (value & 0xF)`; values above 9 spill into
    /// the ASCII punctuation after `9`.
    Nibble,
    /// Two hex digits per byte step, eight per word step.
    Hex,
}

/// Rendering conventions of a stride-boundary walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkLayout {
    pub step: Step,
    pub stop_at_nul: bool,
    /// Steps per output line. Each line opens with an offset label.
    pub per_line: u32,
    pub label_width: usize,
    pub cell: Cell,
    pub cell_suffix: &'static str,
    pub marker: &'static str,
    pub anchor: Anchor,
}

impl WalkLayout {
    /// Byte-by-byte text walk, 16 bytes per line.
    pub const fn bytes(marker: &'static str) -> Self {
        Self {
            step: Step::Byte,
            stop_at_nul: true,
            per_line: 16,
            label_width: 3,
            cell: Cell::Raw,
            cell_suffix: "",
            marker,
            anchor: Anchor::Relative,
        }
    }

    /// Hex word dump, four words per line.
    pub const fn words(marker: &'static str) -> Self {
        Self {
            step: Step::Word,
            stop_at_nul: false,
            per_line: 4,
            label_width: 3,
            cell: Cell::Hex,
            cell_suffix: " ",
            marker,
            anchor: Anchor::Relative,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WalkSummary {
    pub steps: u32,
    pub boundaries: u32,
    pub stop: StopReason,
}

/// Stride-boundary walk.
///
/// Emits one cell per step and the layout's marker right after every step
/// that ends on a stride boundary.
pub fn walk<T, M>(
    tx: &mut T,
    mem: &M,
    region: MemoryRegion,
    layout: &WalkLayout,
) -> Result<WalkSummary, M::Fault>
where
    T: Transmit + ?Sized,
    M: Memory + ?Sized,
{
    let mut summary = WalkSummary::default();
    let mut scan = Scan::new(mem, region, layout.step).anchored(layout.anchor);
    if layout.stop_at_nul {
        scan = scan.stop_at_nul();
    }

    for obs in scan.by_ref() {
        let obs = obs?;
        if summary.steps % layout.per_line.max(1) == 0 {
            emit_str(tx, "\nOffset ");
            emit_decimal(tx, obs.offset, layout.label_width);
            emit_str(tx, ": ");
        }
        emit_cell(tx, layout, obs.value);
        emit_str(tx, layout.cell_suffix);
        summary.steps += 1;

        if obs.crossed_boundary {
            tracing::trace!(
                addr = region.addr(obs.offset),
                offset = obs.offset,
                "stride boundary"
            );
            emit_str(tx, layout.marker);
            summary.boundaries += 1;
        }
    }
    summary.stop = scan.stop_reason().unwrap_or_default();

    tracing::debug!(
        base = region.base,
        steps = summary.steps,
        boundaries = summary.boundaries,
        stop = ?summary.stop,
        "stride walk done"
    );
    Ok(summary)
}

fn emit_cell<T: Transmit + ?Sized>(tx: &mut T, layout: &WalkLayout, value: u32) {
    match (layout.cell, layout.step) {
        (Cell::Raw, Step::Word) => {
            for b in value.to_le_bytes() {
                tx.transmit(b);
            }
        }
        (Cell::Raw, _) => tx.transmit(value as u8),
        (Cell::Nibble, _) => tx.transmit(b'0' + (value & 0xF) as u8),
        (Cell::Hex, Step::Word) => emit_hex_address(tx, value),
        (Cell::Hex, _) => emit_hex_byte(tx, value as u8),
    }
}
