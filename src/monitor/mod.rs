// SPDX-License-Identifier: GPL-3.0-only
//! Display descriptors and the collaborators that produce them
//!
//! A fresh `Vec<MonitorDescriptor>` is produced on every enumeration; nothing
//! in the core mutates a descriptor after creation.

pub mod x11;

pub type MonitorId = String;

/// Screen-space rectangle of a display
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Bounds {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Bounds {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn contains(&self, px: i32, py: i32) -> bool {
        let (px, py) = (i64::from(px), i64::from(py));
        let (x, y) = (i64::from(self.x), i64::from(self.y));
        px >= x && px < x + i64::from(self.width) && py >= y && py < y + i64::from(self.height)
    }

    /// Squared distance from a point to the nearest edge (0 when inside)
    fn distance_sq(&self, px: i32, py: i32) -> i64 {
        let clamp = |v: i64, lo: i64, hi: i64| v.max(lo).min(hi);
        let (px, py) = (i64::from(px), i64::from(py));
        let right = i64::from(self.x) + i64::from(self.width).max(1) - 1;
        let bottom = i64::from(self.y) + i64::from(self.height).max(1) - 1;
        let dx = px - clamp(px, i64::from(self.x), right);
        let dy = py - clamp(py, i64::from(self.y), bottom);
        dx * dx + dy * dy
    }
}

/// Platform handle used by the brightness protocols to find a display
///
/// On X11 this is the RandR output name plus the raw EDID blob, which is what
/// DDC/CI enumeration is correlated against.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NativeHandle {
    pub connector: String,
    pub edid: Option<Vec<u8>>,
}

impl NativeHandle {
    pub fn new(connector: impl Into<String>, edid: Option<Vec<u8>>) -> Self {
        Self { connector: connector.into(), edid }
    }

    /// Laptop-style panels driven by the kernel backlight class
    pub fn is_internal_panel(&self) -> bool {
        let connector = self.connector.to_ascii_uppercase();
        ["EDP", "LVDS", "DSI"].iter().any(|p| connector.starts_with(p))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MonitorDescriptor {
    pub id: MonitorId,
    pub bounds: Bounds,
    pub is_primary: bool,
    pub native_handle: Option<NativeHandle>,
}

/// Enumerates the displays currently attached
pub trait MonitorSource {
    fn list(&self) -> anyhow::Result<Vec<MonitorDescriptor>>;

    /// True once after the output layout changed since the last call
    fn layout_changed(&self) -> bool {
        false
    }
}

/// Samples the global pointer position
pub trait PointerSource {
    fn position(&self) -> anyhow::Result<(i32, i32)>;
}

/// Monitors the masking engine should manage
///
/// An empty `controlled_ids` selects every non-primary monitor.
pub fn controlled_monitors<'a>(
    monitors: &'a [MonitorDescriptor],
    controlled_ids: &std::collections::HashSet<MonitorId>,
) -> Vec<&'a MonitorDescriptor> {
    if controlled_ids.is_empty() {
        monitors.iter().filter(|m| !m.is_primary).collect()
    } else {
        monitors.iter().filter(|m| controlled_ids.contains(&m.id)).collect()
    }
}

/// The monitor under the pointer, or the nearest one if the point falls in a gap
pub fn monitor_at(monitors: &[MonitorDescriptor], x: i32, y: i32) -> Option<&MonitorDescriptor> {
    monitors
        .iter()
        .find(|m| m.bounds.contains(x, y))
        .or_else(|| monitors.iter().min_by_key(|m| m.bounds.distance_sq(x, y)))
}

#[cfg(test)]
pub(crate) fn test_monitor(id: &str, x: i32, primary: bool) -> MonitorDescriptor {
    MonitorDescriptor {
        id: id.to_string(),
        bounds: Bounds::new(x, 0, 1920, 1080),
        is_primary: primary,
        native_handle: Some(NativeHandle::new(id, None)),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_bounds_contains_edges() {
        let b = Bounds::new(1920, 0, 1920, 1080);
        assert!(b.contains(1920, 0));
        assert!(b.contains(3839, 1079));
        assert!(!b.contains(3840, 0));
        assert!(!b.contains(1919, 500));
    }

    #[test]
    fn test_controlled_defaults_to_non_primary() {
        let monitors = vec![test_monitor("A", 0, true), test_monitor("B", 1920, false)];
        let ids: Vec<_> = controlled_monitors(&monitors, &HashSet::new())
            .into_iter()
            .map(|m| m.id.as_str())
            .collect();
        assert_eq!(ids, vec!["B"]);

        let explicit: HashSet<_> = ["A".to_string()].into_iter().collect();
        let ids: Vec<_> = controlled_monitors(&monitors, &explicit)
            .into_iter()
            .map(|m| m.id.as_str())
            .collect();
        assert_eq!(ids, vec!["A"]);
    }

    #[test]
    fn test_monitor_at_falls_back_to_nearest() {
        let monitors = vec![test_monitor("A", 0, true), test_monitor("B", 2000, false)];
        assert_eq!(monitor_at(&monitors, 10, 10).map(|m| m.id.as_str()), Some("A"));
        assert_eq!(monitor_at(&monitors, 2500, 10).map(|m| m.id.as_str()), Some("B"));
        // gap between 1920 and 2000
        assert_eq!(monitor_at(&monitors, 1990, 10).map(|m| m.id.as_str()), Some("B"));
        assert!(monitor_at(&[], 0, 0).is_none());
    }

    #[test]
    fn test_internal_panel_detection() {
        assert!(NativeHandle::new("eDP-1", None).is_internal_panel());
        assert!(NativeHandle::new("LVDS1", None).is_internal_panel());
        assert!(!NativeHandle::new("DP-2", None).is_internal_panel());
    }
}
