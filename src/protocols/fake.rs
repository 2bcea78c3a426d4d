// SPDX-License-Identifier: GPL-3.0-only
//! Scriptable protocol doubles for engine tests

use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use parking_lot::Mutex;

use super::{BrightnessRange, DirectControl, ManagementQuery, PhysicalHandle};
use crate::monitor::NativeHandle;

#[derive(Default)]
pub struct FakeDirect {
    /// Physical monitors reported per display handle
    pub count: usize,
    pub fail_probe: bool,
    pub fail_acquire: bool,
    pub fail_range: bool,
    pub panic_range: bool,
    pub fail_set: bool,
    pub set_delay: Option<Duration>,
    pub range: Option<BrightnessRange>,
    /// Writes of this raw value sleep for the given time and then fail
    pub slow_failing_value: Option<(u32, Duration)>,
    /// Writes of this raw value sleep for the given time and then succeed
    pub slow_value: Option<(u32, Duration)>,

    pub next: AtomicU64,
    /// acquired minus released
    pub outstanding: AtomicI64,
    pub acquire_calls: AtomicUsize,
    pub release_calls: AtomicUsize,
    pub set_calls: AtomicUsize,
    pub level: Mutex<Option<u32>>,
}

impl FakeDirect {
    pub fn supported(min: u32, current: u32, max: u32) -> Self {
        Self {
            count: 1,
            range: Some(BrightnessRange { min, current, max }),
            ..Self::default()
        }
    }

    pub fn absent() -> Self {
        Self::default()
    }

    pub fn outstanding(&self) -> i64 {
        self.outstanding.load(Ordering::SeqCst)
    }

    pub fn level(&self) -> Option<u32> {
        *self.level.lock()
    }
}

impl DirectControl for FakeDirect {
    fn probe(&self, _handle: &NativeHandle) -> Result<usize> {
        if self.fail_probe {
            bail!("probe failed");
        }
        Ok(self.count)
    }

    fn acquire(&self, _handle: &NativeHandle) -> Result<Vec<PhysicalHandle>> {
        self.acquire_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_acquire {
            bail!("acquire failed");
        }
        let handles: Vec<_> = (0..self.count)
            .map(|_| PhysicalHandle(self.next.fetch_add(1, Ordering::SeqCst)))
            .collect();
        self.outstanding.fetch_add(handles.len() as i64, Ordering::SeqCst);
        Ok(handles)
    }

    fn get_range(&self, _physical: PhysicalHandle) -> Result<BrightnessRange> {
        if self.panic_range {
            panic!("driver fault");
        }
        if self.fail_range {
            bail!("get brightness failed");
        }
        let range = self.range.ok_or_else(|| anyhow!("no range"))?;
        self.level.lock().get_or_insert(range.current);
        Ok(range)
    }

    fn set_level(&self, _physical: PhysicalHandle, value: u32) -> Result<()> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.set_delay {
            std::thread::sleep(delay);
        }
        if let Some((slow, delay)) = self.slow_failing_value
            && slow == value
        {
            std::thread::sleep(delay);
            bail!("bus timeout on {}", value);
        }
        if let Some((slow, delay)) = self.slow_value
            && slow == value
        {
            std::thread::sleep(delay);
        }
        if self.fail_set {
            bail!("bus NAK");
        }
        *self.level.lock() = Some(value);
        Ok(())
    }

    fn release(&self, physicals: &[PhysicalHandle]) {
        self.release_calls.fetch_add(1, Ordering::SeqCst);
        self.outstanding.fetch_sub(physicals.len() as i64, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeManagement {
    pub available: bool,
    pub current: u32,
    pub max: u32,
    pub fail_set: bool,
    pub set_calls: AtomicUsize,
    pub level: Mutex<Option<u32>>,
}

impl FakeManagement {
    pub fn available(current: u32, max: u32) -> Self {
        Self {
            available: true,
            current,
            max,
            ..Self::default()
        }
    }

    pub fn absent() -> Self {
        Self::default()
    }

    pub fn level(&self) -> Option<u32> {
        *self.level.lock()
    }
}

impl ManagementQuery for FakeManagement {
    fn get_brightness(&self) -> Result<(u32, u32)> {
        if !self.available {
            bail!("no backlight");
        }
        Ok((self.current, self.max))
    }

    fn set_brightness(&self, value: u32) -> Result<()> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_set {
            bail!("write rejected");
        }
        *self.level.lock() = Some(value);
        Ok(())
    }
}
