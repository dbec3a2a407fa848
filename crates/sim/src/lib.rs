// CapProbe - Capability Boundary Diagnostic Harness
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Host-side guest model for CapProbe programs.

pub mod memory;
pub mod session;
pub mod uart;

pub use memory::{LayoutError, SimMemory, Trap};
pub use session::{run, GuestImage, Outcome, Placement, RunOptions, RunReport};
pub use uart::{capture_uart, CaptureRegister, SimUart};
