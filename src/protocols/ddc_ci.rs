// SPDX-License-Identifier: GPL-3.0-only
//! DDC/CI (Display Data Channel Command Interface) protocol implementation
//!
//! DDC/CI is a standard protocol for controlling monitors over I2C bus.
//! It's supported by most modern external monitors via the video cable.
//! Displays found by `ddc-hi` are correlated with a [`NativeHandle`] through
//! the EDID blob both sides report.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Result, anyhow};
use ddc_hi::{Ddc, Display};
use parking_lot::Mutex;

use super::{BrightnessRange, DirectControl, PhysicalHandle};
use crate::monitor::NativeHandle;

/// VCP (Virtual Control Panel) code for brightness
const BRIGHTNESS_CODE: u8 = 0x10;

/// Base EDID block length; extension blocks are not compared
const EDID_BLOCK_LEN: usize = 128;

/// DDC/CI bus with a table of opened physical monitors
pub struct DdcCiBus {
    next_handle: AtomicU64,
    opened: Mutex<HashMap<PhysicalHandle, Arc<Mutex<Display>>>>,
}

impl DdcCiBus {
    pub fn new() -> Self {
        Self {
            next_handle: AtomicU64::new(1),
            opened: Mutex::new(HashMap::new()),
        }
    }

    /// Number of physical monitors currently held open
    pub fn open_count(&self) -> usize {
        self.opened.lock().len()
    }

    fn matching(handle: &NativeHandle) -> Vec<Display> {
        let Some(edid) = handle.edid.as_deref() else {
            debug!("{} has no EDID, cannot correlate with DDC/CI", handle.connector);
            return Vec::new();
        };

        Display::enumerate()
            .into_iter()
            .filter(|display| {
                display
                    .info
                    .edid_data
                    .as_deref()
                    .is_some_and(|ddc_edid| same_edid(ddc_edid, edid))
            })
            .collect()
    }

    fn display(&self, physical: PhysicalHandle) -> Result<Arc<Mutex<Display>>> {
        self.opened
            .lock()
            .get(&physical)
            .cloned()
            .ok_or_else(|| anyhow!("unknown physical monitor {:?}", physical))
    }
}

impl Default for DdcCiBus {
    fn default() -> Self {
        Self::new()
    }
}

fn same_edid(a: &[u8], b: &[u8]) -> bool {
    let n = EDID_BLOCK_LEN.min(a.len()).min(b.len());
    n > 0 && a[..n] == b[..n]
}

impl DirectControl for DdcCiBus {
    fn probe(&self, handle: &NativeHandle) -> Result<usize> {
        Ok(Self::matching(handle).len())
    }

    fn acquire(&self, handle: &NativeHandle) -> Result<Vec<PhysicalHandle>> {
        let displays = Self::matching(handle);
        if displays.is_empty() {
            return Err(anyhow!("no DDC/CI display behind {}", handle.connector));
        }

        let mut opened = self.opened.lock();
        Ok(displays
            .into_iter()
            .map(|ddc_display| {
                let physical = PhysicalHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
                debug!(
                    "Opened DDC/CI display {} ({}) as {:?}",
                    ddc_display.info.id,
                    ddc_display.info.model_name.as_deref().unwrap_or_default(),
                    physical
                );
                opened.insert(physical, Arc::new(Mutex::new(ddc_display)));
                physical
            })
            .collect())
    }

    fn get_range(&self, physical: PhysicalHandle) -> Result<BrightnessRange> {
        let display = self.display(physical)?;
        let value = display.lock().handle.get_vcp_feature(BRIGHTNESS_CODE)?;
        Ok(BrightnessRange {
            min: 0,
            current: u32::from(value.value()),
            max: u32::from(value.maximum()),
        })
    }

    fn set_level(&self, physical: PhysicalHandle, value: u32) -> Result<()> {
        let display = self.display(physical)?;
        let value = u16::try_from(value).map_err(|_| anyhow!("brightness {} out of VCP range", value))?;
        display.lock().handle.set_vcp_feature(BRIGHTNESS_CODE, value)?;
        Ok(())
    }

    fn release(&self, physicals: &[PhysicalHandle]) {
        let mut opened = self.opened.lock();
        for physical in physicals {
            if opened.remove(physical).is_some() {
                debug!("Released DDC/CI display {:?}", physical);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edid_compares_base_block_only() {
        let mut a = vec![0u8; 256];
        let mut b = vec![0u8; 128];
        a[10] = 7;
        b[10] = 7;
        a[200] = 1;
        assert!(same_edid(&a, &b));

        b[10] = 8;
        assert!(!same_edid(&a, &b));
        assert!(!same_edid(&[], &b));
    }

    #[test]
    fn test_missing_edid_matches_nothing() {
        let bus = DdcCiBus::new();
        let handle = NativeHandle::new("DP-1", None);
        assert_eq!(bus.probe(&handle).unwrap(), 0);
        assert!(bus.acquire(&handle).is_err());
        assert_eq!(bus.open_count(), 0);
    }

    #[test]
    fn test_release_unknown_is_noop() {
        let bus = DdcCiBus::new();
        bus.release(&[PhysicalHandle(99)]);
        assert_eq!(bus.open_count(), 0);
        assert!(bus.get_range(PhysicalHandle(99)).is_err());
    }
}
