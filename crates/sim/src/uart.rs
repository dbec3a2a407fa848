// CapProbe - Capability Boundary Diagnostic Harness
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use capprobe_core::uart::{BusyWait, DataRegister, Uart};
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

/// Core UART driver wired to a capturing data register.
pub type SimUart = Uart<CaptureRegister, BusyWait>;

/// Data register mock that records every transmitted byte.
///
/// Once `max_bytes` have been captured further bytes are silently dropped,
/// so a runaway scan cannot grow the trace without bound.
#[derive(Debug, Default)]
pub struct CaptureRegister {
    sink: Option<Arc<Mutex<Vec<u8>>>>,
    echo_stdout: bool,
    max_bytes: Option<u64>,
    bytes_written: u64,
    limit_exceeded: bool,
}

impl CaptureRegister {
    pub fn new() -> Self {
        Self {
            sink: None,
            echo_stdout: true,
            max_bytes: None,
            bytes_written: 0,
            limit_exceeded: false,
        }
    }

    pub fn set_sink(&mut self, sink: Option<Arc<Mutex<Vec<u8>>>>, echo_stdout: bool) {
        self.sink = sink;
        self.echo_stdout = echo_stdout;
    }

    pub fn set_limit(&mut self, max_bytes: Option<u64>) {
        self.max_bytes = max_bytes;
    }

    /// Returns the number of bytes captured so far
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Returns true if the size limit has been exceeded
    pub fn limit_exceeded(&self) -> bool {
        self.limit_exceeded
    }

    fn push_tx(&mut self, value: u8) {
        if self.limit_exceeded {
            return;
        }
        if self.max_bytes.is_some_and(|max| self.bytes_written >= max) {
            tracing::warn!(
                "UART capture limit of {} bytes reached; dropping further output",
                self.bytes_written
            );
            self.limit_exceeded = true;
            return;
        }

        if let Some(sink) = &self.sink {
            match sink.lock() {
                Ok(mut guard) => guard.push(value),
                Err(_) => {
                    tracing::warn!("UART capture sink is poisoned; dropping byte");
                    return;
                }
            }
        }
        self.bytes_written += 1;

        if self.echo_stdout {
            #[allow(unused_must_use)]
            {
                let mut out = io::stdout().lock();
                out.write_all(&[value]);
                if value == b'\n' {
                    out.flush();
                }
            }
        }
    }
}

impl DataRegister for CaptureRegister {
    fn write(&mut self, value: u32) {
        // Only the low byte reaches the wire.
        self.push_tx(value as u8);
    }
}

/// Builds a UART that captures into `sink` and settles for
/// `settle_iterations` after each byte.
pub fn capture_uart(
    sink: Arc<Mutex<Vec<u8>>>,
    echo_stdout: bool,
    max_bytes: Option<u64>,
    settle_iterations: u32,
) -> SimUart {
    let mut reg = CaptureRegister::new();
    reg.set_sink(Some(sink), echo_stdout);
    reg.set_limit(max_bytes);
    Uart::new(reg, BusyWait::new(settle_iterations))
}

#[cfg(test)]
mod tests {
    use super::*;
    use capprobe_core::format::emit_str;

    #[test]
    fn test_capture_records_low_byte() {
        let sink = Arc::new(Mutex::new(Vec::new()));
        let mut reg = CaptureRegister::new();
        reg.set_sink(Some(sink.clone()), false);

        reg.write(b'A' as u32);
        reg.write(0x1234_5642); // 'B' in the low byte

        assert_eq!(*sink.lock().unwrap(), b"AB".to_vec());
        assert_eq!(reg.bytes_written(), 2);
    }

    #[test]
    fn test_capture_limit_drops_excess() {
        let sink = Arc::new(Mutex::new(Vec::new()));
        let mut uart = capture_uart(sink.clone(), false, Some(5), 0);
        emit_str(&mut uart, "Hello from seL4!");

        assert_eq!(*sink.lock().unwrap(), b"Hello".to_vec());
        let (reg, _) = uart.into_parts();
        assert!(reg.limit_exceeded());
        assert_eq!(reg.bytes_written(), 5);
    }

    #[test]
    fn test_poisoned_sink_does_not_count_dropped_bytes() {
        let sink = Arc::new(Mutex::new(Vec::new()));
        let poison = sink.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poison.lock().unwrap();
            panic!("poison the sink");
        })
        .join();
        assert!(sink.is_poisoned());

        let mut reg = CaptureRegister::new();
        reg.set_sink(Some(sink.clone()), false);
        reg.write(b'A' as u32);

        assert_eq!(reg.bytes_written(), 0);
    }

    #[test]
    fn test_capture_without_limit() {
        let sink = Arc::new(Mutex::new(Vec::new()));
        let mut uart = capture_uart(sink.clone(), false, None, 0);
        emit_str(&mut uart, "OK\n");

        assert_eq!(*sink.lock().unwrap(), b"OK\n".to_vec());
        assert!(!uart.into_parts().0.limit_exceeded());
    }
}
