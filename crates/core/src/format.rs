// CapProbe - Capability Boundary Diagnostic Harness
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! ASCII rendering on top of a [`Transmit`] channel.
//!
//! Nothing here buffers. Each digit goes to the UART as soon as it is known,
//! so a trace cut short by a fault still shows every character produced
//! before it.

use crate::memory::Memory;
use crate::uart::Transmit;

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

/// Widest decimal `u32` rendering.
const MAX_DECIMAL_DIGITS: usize = 10;

/// How a single-character iteration label renders counts of ten or more.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IterationLabel {
    /// `1`..`9`, then `X` for everything above.
    #[default]
    Clamp,
    /// Last decimal digit, so `10` renders as `0`.
    Wrap,
}

impl IterationLabel {
    pub fn glyph(self, iteration: u32) -> u8 {
        match self {
            IterationLabel::Clamp if iteration < 10 => b'0' + iteration as u8,
            IterationLabel::Clamp => b'X',
            IterationLabel::Wrap => b'0' + (iteration % 10) as u8,
        }
    }
}

pub fn emit_str<T: Transmit + ?Sized>(tx: &mut T, s: &str) {
    emit_bytes(tx, s.as_bytes());
}

pub fn emit_bytes<T: Transmit + ?Sized>(tx: &mut T, bytes: &[u8]) {
    for &b in bytes {
        tx.transmit(b);
    }
}

/// Streams a NUL-terminated string straight out of guest memory.
///
/// There is no length bound. If the terminator is missing the scan keeps
/// reading adjacent memory until something stops it. Returns the number of
/// bytes transmitted.
pub fn emit_terminated<T, M>(tx: &mut T, mem: &M, addr: u32) -> Result<u32, M::Fault>
where
    T: Transmit + ?Sized,
    M: Memory + ?Sized,
{
    let mut offset = 0u32;
    loop {
        let b = mem.read_u8(addr.wrapping_add(offset))?;
        if b == 0 {
            return Ok(offset);
        }
        tx.transmit(b);
        offset = offset.wrapping_add(1);
    }
}

pub fn hex_digit(nibble: u8) -> u8 {
    HEX_DIGITS[(nibble & 0xF) as usize]
}

/// Eight uppercase hex digits, most significant nibble first, no prefix.
pub fn emit_hex_address<T: Transmit + ?Sized>(tx: &mut T, addr: u32) {
    for shift in (0..8).rev() {
        tx.transmit(hex_digit((addr >> (shift * 4)) as u8));
    }
}

pub fn emit_prefixed_address<T: Transmit + ?Sized>(tx: &mut T, addr: u32) {
    emit_str(tx, "0x");
    emit_hex_address(tx, addr);
}

pub fn emit_hex_byte<T: Transmit + ?Sized>(tx: &mut T, value: u8) {
    tx.transmit(hex_digit(value >> 4));
    tx.transmit(hex_digit(value));
}

/// Zero-padded decimal at least `width` digits wide. Wider values print in
/// full.
pub fn emit_decimal<T: Transmit + ?Sized>(tx: &mut T, value: u32, width: usize) {
    let mut digits = [0u8; MAX_DECIMAL_DIGITS];
    let mut len = 0;
    let mut rest = value;
    loop {
        digits[len] = b'0' + (rest % 10) as u8;
        len += 1;
        rest /= 10;
        if rest == 0 {
            break;
        }
    }
    for _ in len..width.min(MAX_DECIMAL_DIGITS) {
        tx.transmit(b'0');
    }
    for &d in digits[..len].iter().rev() {
        tx.transmit(d);
    }
}

/// Three-digit trace offset: `5` renders as `005`.
pub fn emit_decimal_offset<T: Transmit + ?Sized>(tx: &mut T, offset: u32) {
    emit_decimal(tx, offset, 3);
}

pub fn emit_iteration_label<T: Transmit + ?Sized>(
    tx: &mut T,
    iteration: u32,
    style: IterationLabel,
) {
    tx.transmit(style.glyph(iteration));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FlatMemory, Recorder, Unmapped};

    fn render(f: impl FnOnce(&mut Recorder)) -> String {
        let mut rec = Recorder::default();
        f(&mut rec);
        rec.text()
    }

    #[test]
    fn test_hex_address_is_eight_uppercase_digits() {
        assert_eq!(render(|tx| emit_hex_address(tx, 0xDEAD_BEEF)), "DEADBEEF");
        assert_eq!(render(|tx| emit_hex_address(tx, 0x0900_0000)), "09000000");
        assert_eq!(render(|tx| emit_hex_address(tx, 0)), "00000000");
        assert_eq!(
            render(|tx| emit_prefixed_address(tx, 0x4000_0FF0)),
            "0x40000FF0"
        );
    }

    #[test]
    fn test_decimal_offset_is_zero_padded() {
        assert_eq!(render(|tx| emit_decimal_offset(tx, 5)), "005");
        assert_eq!(render(|tx| emit_decimal_offset(tx, 42)), "042");
        assert_eq!(render(|tx| emit_decimal_offset(tx, 128)), "128");
        assert_eq!(render(|tx| emit_decimal_offset(tx, 0)), "000");
    }

    #[test]
    fn test_decimal_does_not_truncate_wide_values() {
        assert_eq!(render(|tx| emit_decimal(tx, 4096, 3)), "4096");
        assert_eq!(render(|tx| emit_decimal(tx, 8, 2)), "08");
        assert_eq!(render(|tx| emit_decimal(tx, u32::MAX, 0)), "4294967295");
    }

    #[test]
    fn test_hex_byte() {
        assert_eq!(render(|tx| emit_hex_byte(tx, 0x0A)), "0A");
        assert_eq!(render(|tx| emit_hex_byte(tx, 0xF0)), "F0");
    }

    #[test]
    fn test_iteration_label_conventions() {
        let clamp: Vec<u8> = [1, 9, 10, 23].map(|n| IterationLabel::Clamp.glyph(n)).to_vec();
        assert_eq!(clamp, b"19XX");
        let wrap: Vec<u8> = [1, 9, 10, 23].map(|n| IterationLabel::Wrap.glyph(n)).to_vec();
        assert_eq!(wrap, b"1903");
    }

    #[test]
    fn test_terminated_stops_at_nul() {
        let mem = FlatMemory::new(0x100, b"Hi\0junk");
        let mut rec = Recorder::default();
        assert_eq!(emit_terminated(&mut rec, &mem, 0x100), Ok(2));
        assert_eq!(rec.text(), "Hi");
    }

    #[test]
    fn test_terminated_keeps_bytes_sent_before_fault() {
        // No terminator: the scan runs off the end of mapped memory.
        let mem = FlatMemory::new(0x100, b"abc");
        let mut rec = Recorder::default();
        assert_eq!(emit_terminated(&mut rec, &mem, 0x100), Err(Unmapped(0x103)));
        assert_eq!(rec.text(), "abc");
    }
}
