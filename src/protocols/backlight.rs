// SPDX-License-Identifier: GPL-3.0-only
//! Kernel backlight class as the management-query protocol
//!
//! - Discovers a backlight device in `/sys/class/backlight`
//! - Writes through systemd-logind `SetBrightness` when the feature is enabled
//! - Falls back to direct sysfs writes otherwise

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use super::ManagementQuery;
use crate::monitor::NativeHandle;

/// Path to the backlight class on Linux.
pub const BACKLIGHT_PATH: &str = "/sys/class/backlight";

#[cfg(feature = "logind-backlight")]
const LOGIND_BUS_NAME: &str = "org.freedesktop.login1";
#[cfg(feature = "logind-backlight")]
const LOGIND_SESSION_PATH: &str = "/org/freedesktop/login1/session/auto";
#[cfg(feature = "logind-backlight")]
const LOGIND_SESSION_INTERFACE: &str = "org.freedesktop.login1.Session";

#[derive(Debug, Clone)]
struct BacklightDevice {
    /// Directory name under /sys/class/backlight
    name: String,
    brightness_path: PathBuf,
    max_brightness_path: PathBuf,
}

pub struct Backlight {
    device: Option<BacklightDevice>,
    #[cfg(feature = "logind-backlight")]
    logind: once_cell::sync::OnceCell<Option<zbus::blocking::Connection>>,
}

impl Backlight {
    /// Pick the preferred device under the default sysfs root
    pub fn discover() -> Self {
        Self::discover_in(Path::new(BACKLIGHT_PATH))
    }

    pub fn discover_in(root: &Path) -> Self {
        let device = find_device(root);
        match &device {
            Some(d) => info!("Backlight device: {}", d.name),
            None => debug!("No usable backlight device under {}", root.display()),
        }
        Self {
            device,
            #[cfg(feature = "logind-backlight")]
            logind: once_cell::sync::OnceCell::new(),
        }
    }

    pub fn device_name(&self) -> Option<&str> {
        self.device.as_ref().map(|d| d.name.as_str())
    }

    fn device(&self) -> Result<&BacklightDevice> {
        self.device.as_ref().ok_or_else(|| anyhow!("no backlight device"))
    }

    #[cfg(feature = "logind-backlight")]
    fn set_via_logind(&self, device: &BacklightDevice, value: u32) -> Option<Result<()>> {
        let conn = self
            .logind
            .get_or_init(|| match zbus::blocking::Connection::system() {
                Ok(conn) => Some(conn),
                Err(err) => {
                    warn!("Failed to connect to system bus: {}; falling back to sysfs writes", err);
                    None
                }
            })
            .as_ref()?;

        let res = conn
            .call_method(
                Some(LOGIND_BUS_NAME),
                LOGIND_SESSION_PATH,
                Some(LOGIND_SESSION_INTERFACE),
                "SetBrightness",
                &("backlight", device.name.as_str(), value),
            )
            .map(|_| ())
            .with_context(|| format!("logind SetBrightness failed for {}", device.name));
        Some(res)
    }

    #[cfg(not(feature = "logind-backlight"))]
    fn set_via_logind(&self, _device: &BacklightDevice, _value: u32) -> Option<Result<()>> {
        None
    }
}

fn find_device(root: &Path) -> Option<BacklightDevice> {
    let entries = fs::read_dir(root).ok()?;
    let mut devices: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();

    // Firmware interfaces last; raw GPU drivers reflect the panel best
    devices.sort_by_key(|p| {
        let name = p
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_lowercase();
        let rank = if name.contains("intel") {
            0
        } else if name.contains("amd") {
            1
        } else if name.contains("acpi") {
            3
        } else {
            2
        };
        (rank, name)
    });

    devices.into_iter().find_map(|path| {
        let brightness_path = path.join("brightness");
        let max_brightness_path = path.join("max_brightness");
        match read_u32(&max_brightness_path) {
            Ok(max) if max > 0 && brightness_path.exists() => Some(BacklightDevice {
                name: path.file_name()?.to_str()?.to_string(),
                brightness_path,
                max_brightness_path,
            }),
            _ => None,
        }
    })
}

fn read_u32(path: &Path) -> Result<u32> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    raw.trim()
        .parse()
        .with_context(|| format!("parsing {}", path.display()))
}

impl ManagementQuery for Backlight {
    fn covers(&self, handle: &NativeHandle) -> bool {
        self.device.is_some() && handle.is_internal_panel()
    }

    fn get_brightness(&self) -> Result<(u32, u32)> {
        let device = self.device()?;
        let current = read_u32(&device.brightness_path)?;
        let max = read_u32(&device.max_brightness_path)?;
        Ok((current.min(max), max))
    }

    fn set_brightness(&self, value: u32) -> Result<()> {
        let device = self.device()?;
        match self.set_via_logind(device, value) {
            Some(Ok(())) => Ok(()),
            Some(Err(err)) => {
                debug!("{:#}; trying sysfs", err);
                fs::write(&device.brightness_path, value.to_string())
                    .with_context(|| format!("writing {}", device.brightness_path.display()))
            }
            None => fs::write(&device.brightness_path, value.to_string())
                .with_context(|| format!("writing {}", device.brightness_path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_class(tag: &str, devices: &[(&str, &str, &str)]) -> PathBuf {
        let root = std::env::temp_dir().join(format!("monitors-focus-bl-{}-{}", tag, std::process::id()));
        let _ = fs::remove_dir_all(&root);
        for (name, current, max) in devices {
            let dir = root.join(name);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("brightness"), current).unwrap();
            fs::write(dir.join("max_brightness"), max).unwrap();
        }
        root
    }

    #[test]
    fn test_prefers_gpu_driver_over_acpi() {
        let root = fake_class("prio", &[("acpi_video0", "5\n", "10\n"), ("intel_backlight", "400\n", "1000\n")]);
        let backlight = Backlight::discover_in(&root);

        assert_eq!(backlight.device_name(), Some("intel_backlight"));
        assert_eq!(backlight.get_brightness().unwrap(), (400, 1000));
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn test_skips_zero_max() {
        let root = fake_class("zero", &[("intel_backlight", "0", "0")]);
        let backlight = Backlight::discover_in(&root);

        assert!(backlight.device_name().is_none());
        assert!(backlight.get_brightness().is_err());
        assert!(!backlight.covers(&NativeHandle::new("eDP-1", None)));
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn test_covers_internal_panels_only() {
        let root = fake_class("covers", &[("amdgpu_bl0", "10", "255")]);
        let backlight = Backlight::discover_in(&root);

        assert!(backlight.covers(&NativeHandle::new("eDP-1", None)));
        assert!(!backlight.covers(&NativeHandle::new("HDMI-1", None)));
        let _ = fs::remove_dir_all(&root);
    }
}
