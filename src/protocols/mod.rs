// SPDX-License-Identifier: GPL-3.0-only
//! Brightness control protocols
//!
//! Two independent ways of reaching a backlight. [`DirectControl`] talks to
//! each physical monitor behind a display handle (DDC/CI). [`ManagementQuery`]
//! goes through a system management interface (the kernel backlight class)
//! and is only used when direct control is unavailable.
//!
//! Both traits are blocking. The dimming engine always calls them from
//! `spawn_blocking` so a hung bus never stalls the tick loop.

pub mod backlight;
pub mod ddc_ci;

use anyhow::Result;

use crate::monitor::NativeHandle;

/// Which protocol a dimming session is bound to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProtocolKind {
    DirectControl,
    ManagementQuery,
}

impl std::fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolKind::DirectControl => f.write_str("DDC/CI"),
            ProtocolKind::ManagementQuery => f.write_str("backlight"),
        }
    }
}

/// Opaque reference to a physical monitor acquired from a [`DirectControl`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PhysicalHandle(pub u64);

/// Raw brightness range as reported by the hardware
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BrightnessRange {
    pub min: u32,
    pub current: u32,
    pub max: u32,
}

/// Per-physical-monitor brightness control
pub trait DirectControl: Send + Sync {
    /// Number of physical monitors behind a display handle
    fn probe(&self, handle: &NativeHandle) -> Result<usize>;

    /// Open every physical monitor behind a display handle
    fn acquire(&self, handle: &NativeHandle) -> Result<Vec<PhysicalHandle>>;

    fn get_range(&self, physical: PhysicalHandle) -> Result<BrightnessRange>;

    fn set_level(&self, physical: PhysicalHandle, value: u32) -> Result<()>;

    /// Close physical monitors; unknown handles are ignored
    fn release(&self, physicals: &[PhysicalHandle]);
}

/// System-wide brightness property
pub trait ManagementQuery: Send + Sync {
    /// Whether this interface drives the given display at all
    fn covers(&self, _handle: &NativeHandle) -> bool {
        true
    }

    /// Current and maximum raw brightness
    fn get_brightness(&self) -> Result<(u32, u32)>;

    fn set_brightness(&self, value: u32) -> Result<()>;
}

#[cfg(test)]
pub(crate) mod fake;
