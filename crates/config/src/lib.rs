// CapProbe - Capability Boundary Diagnostic Harness
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use anyhow::{Context, Result};
use capprobe_core::format::IterationLabel;
use capprobe_core::probe::Anchor;
use capprobe_core::scenario::{self, Limits};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::path::Path;

/// Default schema version for YAML plans
fn default_schema_version() -> String {
    "1.0".to_string()
}

fn default_plan_name() -> String {
    "qemu-virt".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Program {
    #[serde(alias = "debug-session", alias = "debug_session")]
    Debug,
    #[serde(alias = "boundary-test", alias = "boundary_test", alias = "boundary")]
    Boundaries,
}

impl std::str::FromStr for Program {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "debug" | "debug-session" | "debug_session" => Ok(Self::Debug),
            "boundaries" | "boundary" | "boundary-test" | "boundary_test" => Ok(Self::Boundaries),
            _ => Err(format!(
                "unsupported program '{}'; supported: debug, boundaries",
                value
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LabelStyle {
    #[default]
    Clamp,
    Wrap,
}

impl From<LabelStyle> for IterationLabel {
    fn from(style: LabelStyle) -> Self {
        match style {
            LabelStyle::Clamp => IterationLabel::Clamp,
            LabelStyle::Wrap => IterationLabel::Wrap,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryAnchor {
    #[default]
    Relative,
    Absolute,
}

impl From<BoundaryAnchor> for Anchor {
    fn from(anchor: BoundaryAnchor) -> Self {
        match anchor {
            BoundaryAnchor::Relative => Anchor::Relative,
            BoundaryAnchor::Absolute => Anchor::Absolute,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct UartConfig {
    pub data_register: u64,
    /// Declared for completeness; the driver never polls it.
    pub flags_register: u64,
    pub settle_iterations: u32,
}

impl Default for UartConfig {
    fn default() -> Self {
        Self {
            data_register: capprobe_core::uart::PL011_DR as u64,
            flags_register: capprobe_core::uart::PL011_FR as u64,
            settle_iterations: capprobe_core::uart::DEFAULT_SETTLE_ITERATIONS,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ScanConfig {
    pub dump_cap: u32,
    pub walk_cap: u32,
    pub frame_span: u32,
    pub frame_pitch: u32,
    pub stride: String, // e.g. "4KiB"
    pub anchor: BoundaryAnchor,
}

impl Default for ScanConfig {
    fn default() -> Self {
        let limits = Limits::default();
        Self {
            dump_cap: limits.dump_cap,
            walk_cap: limits.walk_cap,
            frame_span: limits.frame_span,
            frame_pitch: limits.frame_pitch,
            stride: "4KiB".to_string(),
            anchor: BoundaryAnchor::Relative,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct PeriodicConfig {
    pub debug_label: LabelStyle,
    pub boundaries_label: LabelStyle,
    pub debug_delay_iterations: u32,
    pub boundaries_delay_iterations: u32,
}

impl Default for PeriodicConfig {
    fn default() -> Self {
        Self {
            debug_label: LabelStyle::Clamp,
            boundaries_label: LabelStyle::Wrap,
            debug_delay_iterations: scenario::DEBUG_PERIOD_ITERATIONS,
            boundaries_delay_iterations: scenario::BOUNDARY_PERIOD_ITERATIONS,
        }
    }
}

/// Mapped guest memory.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RegionConfig {
    pub name: String,
    pub base: u64,
    pub size: String, // e.g. "64KiB"
    #[serde(default)]
    pub fill: u8,
}

/// Span whose reads trap, standing in for a missing capability.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct TrapWindow {
    pub base: u64,
    pub size: String,
}

fn default_corruption_mask() -> u8 {
    0xFF
}

/// Span whose reads return data XORed with `mask`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct CorruptionWindow {
    pub base: u64,
    pub size: String,
    #[serde(default = "default_corruption_mask")]
    pub mask: u8,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct GuestLayout {
    pub regions: Vec<RegionConfig>,
    /// Where the static strings are laid out back to back.
    pub rodata: u64,
    /// Where the stack character array lives.
    pub stack: u64,
    /// Base address of the frame pattern probe.
    pub guest_ram: u64,
    pub traps: Vec<TrapWindow>,
    pub corruptions: Vec<CorruptionWindow>,
}

impl Default for GuestLayout {
    fn default() -> Self {
        Self {
            regions: vec![RegionConfig {
                name: "ram".to_string(),
                base: scenario::GUEST_RAM_BASE as u64,
                size: "128KiB".to_string(),
                fill: 0,
            }],
            // Close enough to the first 4KB frame edge that the long string
            // straddles it.
            rodata: 0x4000_0FC0,
            stack: 0x4001_FF00,
            guest_ram: scenario::GUEST_RAM_BASE as u64,
            traps: Vec::new(),
            corruptions: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ProbePlan {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    #[serde(default = "default_plan_name")]
    pub name: String,
    #[serde(default)]
    pub uart: UartConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub periodic: PeriodicConfig,
    #[serde(default)]
    pub guest: GuestLayout,
}

impl Default for ProbePlan {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            name: default_plan_name(),
            uart: UartConfig::default(),
            scan: ScanConfig::default(),
            periodic: PeriodicConfig::default(),
            guest: GuestLayout::default(),
        }
    }
}

impl ProbePlan {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read probe plan at {:?}", path))?;
        let plan = Self::from_yaml(&contents)
            .with_context(|| format!("Invalid probe plan {:?}", path))?;
        tracing::debug!(name = %plan.name, path = ?path, "loaded probe plan");
        Ok(plan)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let plan: Self = serde_yaml::from_str(yaml).context("Failed to parse Probe Plan YAML")?;
        plan.validate()?;
        Ok(plan)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize Probe Plan")
    }

    pub fn validate(&self) -> Result<()> {
        if self.schema_version != "1.0" {
            anyhow::bail!(
                "Unsupported schema_version '{}'. Supported versions: '1.0'",
                self.schema_version
            );
        }

        self.stride()?;

        if self.scan.dump_cap == 0 {
            anyhow::bail!("Scan 'dump_cap' must be greater than zero");
        }
        if self.scan.frame_pitch == 0 {
            anyhow::bail!("Scan 'frame_pitch' must be greater than zero");
        }
        if self.guest.regions.is_empty() {
            anyhow::bail!("Guest layout needs at least one region");
        }

        for addr in [
            self.uart.data_register,
            self.uart.flags_register,
            self.guest.rodata,
            self.guest.stack,
            self.guest.guest_ram,
        ] {
            check_u32(addr)?;
        }

        let mut spans = Vec::with_capacity(self.guest.regions.len());
        for region in &self.guest.regions {
            let size = parse_size(&region.size)
                .with_context(|| format!("Region '{}' has an invalid size", region.name))?;
            let end = check_span(region.base, size)
                .with_context(|| format!("Region '{}' is out of range", region.name))?;
            spans.push((region.base, end, region.name.as_str()));
        }
        spans.sort();
        for pair in spans.windows(2) {
            if pair[1].0 < pair[0].1 {
                anyhow::bail!("Regions '{}' and '{}' overlap", pair[0].2, pair[1].2);
            }
        }

        for window in &self.guest.traps {
            let size = parse_size(&window.size)
                .with_context(|| format!("Trap window at {:#x} has an invalid size", window.base))?;
            check_span(window.base, size)
                .with_context(|| format!("Trap window at {:#x} is out of range", window.base))?;
        }
        for window in &self.guest.corruptions {
            let size = parse_size(&window.size).with_context(|| {
                format!(
                    "Corruption window at {:#x} has an invalid size",
                    window.base
                )
            })?;
            check_span(window.base, size).with_context(|| {
                format!("Corruption window at {:#x} is out of range", window.base)
            })?;
        }

        Ok(())
    }

    pub fn stride(&self) -> Result<NonZeroU32> {
        let bytes = parse_size(&self.scan.stride).context("Scan 'stride' is invalid")?;
        u32::try_from(bytes)
            .ok()
            .and_then(NonZeroU32::new)
            .ok_or_else(|| anyhow::anyhow!("Scan 'stride' must be between 1 byte and 4GB"))
    }

    /// Scan bounds for the scenario driver.
    pub fn limits(&self) -> Result<Limits> {
        Ok(Limits {
            dump_cap: self.scan.dump_cap,
            walk_cap: self.scan.walk_cap,
            frame_span: self.scan.frame_span,
            frame_pitch: self.scan.frame_pitch,
            stride: self.stride()?,
            anchor: self.scan.anchor.into(),
        })
    }

    pub fn label(&self, program: Program) -> IterationLabel {
        match program {
            Program::Debug => self.periodic.debug_label.into(),
            Program::Boundaries => self.periodic.boundaries_label.into(),
        }
    }

    pub fn period_iterations(&self, program: Program) -> u32 {
        match program {
            Program::Debug => self.periodic.debug_delay_iterations,
            Program::Boundaries => self.periodic.boundaries_delay_iterations,
        }
    }
}

fn check_u32(addr: u64) -> Result<()> {
    if addr > u32::MAX as u64 {
        anyhow::bail!("Address {:#x} does not fit the 32-bit guest", addr);
    }
    Ok(())
}

/// End of `[base, base + size)`, which must lie inside the 32-bit guest.
fn check_span(base: u64, size: u64) -> Result<u64> {
    check_u32(base)?;
    match base.checked_add(size) {
        Some(end) if end <= 1 << 32 => Ok(end),
        _ => anyhow::bail!(
            "{} bytes at {:#x} run past the 32-bit address space",
            size,
            base
        ),
    }
}

pub fn parse_size(size_str: &str) -> Result<u64> {
    use human_size::{Byte, Size, SpecificSize};
    let s: Size = size_str
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid size format: {}", e))?;
    let bytes: SpecificSize<Byte> = s.into();
    Ok(bytes.value() as u64)
}
