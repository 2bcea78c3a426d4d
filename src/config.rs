// SPDX-License-Identifier: GPL-3.0-only
//! Persisted settings and the dimming policy derived from them

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DimmingError, Result};
use crate::monitor::MonitorId;

pub const APP_DIR: &str = "monitors-focus";
pub const SETTINGS_FILE: &str = "settings.json";

pub const MAX_DELAY_SECONDS: u32 = 600;
pub const DEFAULT_HARDWARE_TIMEOUT_MS: u64 = 800;
const MIN_HARDWARE_TIMEOUT_MS: u64 = 50;
const MAX_HARDWARE_TIMEOUT_MS: u64 = 10_000;

/// How the hardware and overlay channels are combined
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DimmingMode {
    #[default]
    AutoPreferHardware,
    OverlayOnly,
    HardwareOnly,
}

impl std::fmt::Display for DimmingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DimmingMode::AutoPreferHardware => "auto-prefer-hardware",
            DimmingMode::OverlayOnly => "overlay-only",
            DimmingMode::HardwareOnly => "hardware-only",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for DimmingMode {
    type Err = DimmingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "auto" | "auto-prefer-hardware" => Ok(DimmingMode::AutoPreferHardware),
            "overlay" | "overlay-only" => Ok(DimmingMode::OverlayOnly),
            "hardware" | "hardware-only" => Ok(DimmingMode::HardwareOnly),
            other => Err(DimmingError::Config(format!("unknown dimming mode '{other}'"))),
        }
    }
}

/// The inputs the core consumes on every tick and refresh
#[derive(Clone, Debug, PartialEq)]
pub struct DimmingPolicy {
    pub delay_seconds: u32,
    pub overlay_opacity_percent: u8,
    pub hardware_dim_level_percent: u8,
    pub dimming_mode: DimmingMode,
    /// Master switch for the hardware channel
    pub hardware_dimming_enabled: bool,
    pub hardware_disabled_monitor_ids: HashSet<MonitorId>,
    /// Empty means every non-primary monitor
    pub controlled_monitor_ids: HashSet<MonitorId>,
    pub hardware_timeout: Duration,
}

impl DimmingPolicy {
    /// Whether masking should reach for the hardware channel at all
    pub fn allows_hardware(&self) -> bool {
        self.hardware_dimming_enabled && self.dimming_mode != DimmingMode::OverlayOnly
    }

    pub fn delay(&self) -> Duration {
        Duration::from_secs(u64::from(self.delay_seconds))
    }
}

impl Default for DimmingPolicy {
    fn default() -> Self {
        Settings::default().policy()
    }
}

/// Per-run values that take precedence over the settings file
#[derive(Clone, Debug, Default)]
pub struct Overrides {
    pub delay_seconds: Option<u32>,
    pub overlay_opacity: Option<u8>,
    pub dimming_mode: Option<DimmingMode>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct Settings {
    pub delay_seconds: u32,
    pub overlay_opacity: u8,
    pub hardware_dim_level: u8,
    pub dimming_mode: DimmingMode,
    pub enable_hardware_dimming: bool,
    pub controlled_monitor_ids: Vec<MonitorId>,
    pub hardware_disabled_monitor_ids: Vec<MonitorId>,
    pub hardware_timeout_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            delay_seconds: 180,
            overlay_opacity: 100,
            hardware_dim_level: 30,
            dimming_mode: DimmingMode::default(),
            enable_hardware_dimming: false,
            controlled_monitor_ids: Vec::new(),
            hardware_disabled_monitor_ids: Vec::new(),
            hardware_timeout_ms: DEFAULT_HARDWARE_TIMEOUT_MS,
        }
    }
}

impl Settings {
    /// Default location, `~/.config/monitors-focus/settings.json`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join(SETTINGS_FILE)
    }

    /// Load settings, falling back to defaults when the file is missing or broken
    pub fn load(path: &Path) -> Self {
        let mut settings = match std::fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str::<Settings>(&raw) {
                Ok(settings) => settings,
                Err(err) => {
                    warn!("can't parse settings {}: {}, using defaults", path.display(), err);
                    Settings::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!("no settings at {}, using defaults", path.display());
                Settings::default()
            }
            Err(err) => {
                error!("can't read settings {}: {}", path.display(), err);
                Settings::default()
            }
        };
        settings.normalize();
        settings
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let raw = serde_json::to_string_pretty(self)
            .map_err(|e| DimmingError::Config(e.to_string()))?;
        std::fs::write(path, raw)?;
        Ok(())
    }

    pub fn normalize(&mut self) {
        self.delay_seconds = self.delay_seconds.min(MAX_DELAY_SECONDS);
        self.overlay_opacity = self.overlay_opacity.min(100);
        self.hardware_dim_level = self.hardware_dim_level.min(100);
        self.hardware_timeout_ms = self
            .hardware_timeout_ms
            .clamp(MIN_HARDWARE_TIMEOUT_MS, MAX_HARDWARE_TIMEOUT_MS);
        self.controlled_monitor_ids.sort();
        self.controlled_monitor_ids.dedup();
        self.hardware_disabled_monitor_ids.sort();
        self.hardware_disabled_monitor_ids.dedup();
    }

    /// Apply command-line overrides on top of the stored values
    pub fn apply(&mut self, overrides: &Overrides) {
        if let Some(delay) = overrides.delay_seconds {
            self.delay_seconds = delay;
        }
        if let Some(opacity) = overrides.overlay_opacity {
            self.overlay_opacity = opacity;
        }
        if let Some(mode) = overrides.dimming_mode {
            self.dimming_mode = mode;
        }
        self.normalize();
    }

    pub fn policy(&self) -> DimmingPolicy {
        DimmingPolicy {
            delay_seconds: self.delay_seconds,
            overlay_opacity_percent: self.overlay_opacity,
            hardware_dim_level_percent: self.hardware_dim_level,
            dimming_mode: self.dimming_mode,
            hardware_dimming_enabled: self.enable_hardware_dimming,
            hardware_disabled_monitor_ids: self.hardware_disabled_monitor_ids.iter().cloned().collect(),
            controlled_monitor_ids: self.controlled_monitor_ids.iter().cloned().collect(),
            hardware_timeout: Duration::from_millis(self.hardware_timeout_ms),
        }
    }
}
