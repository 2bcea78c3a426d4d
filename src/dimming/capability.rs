// SPDX-License-Identifier: GPL-3.0-only
//! Per-monitor hardware capability reporting
//!
//! The map is the only state written from background mutation tasks. Writers
//! publish a whole new table under the write lock; readers clone the current
//! `Arc` and never observe a half-applied update.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::monitor::MonitorId;

pub const MSG_NOT_SUPPORTED: &str = "Not supported";
pub const MSG_DISABLED_BY_SETTINGS: &str = "Disabled by settings";

/// The engine's belief about a monitor's hardware brightness control
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CapabilityStatus {
    Supported,
    Unsupported(String),
    Failed(String),
    DisabledBySettings,
}

impl CapabilityStatus {
    pub fn label(&self) -> &'static str {
        match self {
            CapabilityStatus::Supported => "Supported",
            CapabilityStatus::Unsupported(_) => "Unsupported",
            CapabilityStatus::Failed(_) => "Failed",
            CapabilityStatus::DisabledBySettings => "DisabledBySettings",
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            CapabilityStatus::Supported => None,
            CapabilityStatus::Unsupported(msg) | CapabilityStatus::Failed(msg) => Some(msg),
            CapabilityStatus::DisabledBySettings => Some(MSG_DISABLED_BY_SETTINGS),
        }
    }
}

impl std::fmt::Display for CapabilityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.message() {
            Some(msg) => write!(f, "{} ({})", self.label(), msg),
            None => f.write_str(self.label()),
        }
    }
}

#[derive(Clone, Debug, Default)]
struct Table {
    generation: u64,
    entries: BTreeMap<MonitorId, CapabilityStatus>,
}

#[derive(Debug, Default)]
pub struct CapabilityMap {
    current: RwLock<Arc<Table>>,
}

impl CapabilityMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> CapabilitySnapshot {
        CapabilitySnapshot(Arc::clone(&self.current.read()))
    }

    /// Replace the whole table; used by refresh
    pub(crate) fn publish(&self, generation: u64, entries: BTreeMap<MonitorId, CapabilityStatus>) {
        *self.current.write() = Arc::new(Table { generation, entries });
    }

    /// Update one entry if the writer still belongs to the current generation
    ///
    /// Returns false when the write is stale and was dropped.
    pub(crate) fn update(&self, generation: u64, id: &str, status: CapabilityStatus) -> bool {
        let mut current = self.current.write();
        if current.generation != generation || !current.entries.contains_key(id) {
            return false;
        }
        let mut next = Table::clone(&current);
        next.entries.insert(id.to_string(), status);
        *current = Arc::new(next);
        true
    }
}

/// One row of the operator-facing status view
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusRow {
    pub id: MonitorId,
    pub status: &'static str,
    pub message: Option<String>,
    /// False when hardware dimming was switched off for this monitor
    pub enabled: bool,
}

/// Immutable view of the capability table at one point in time
#[derive(Clone, Debug)]
pub struct CapabilitySnapshot(Arc<Table>);

impl CapabilitySnapshot {
    pub fn get(&self, id: &str) -> Option<&CapabilityStatus> {
        self.0.entries.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MonitorId, &CapabilityStatus)> {
        self.0.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.0.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.entries.is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.0.generation
    }

    pub fn rows(&self) -> Vec<StatusRow> {
        self.iter()
            .map(|(id, status)| StatusRow {
                id: id.clone(),
                status: status.label(),
                message: status.message().map(str::to_string),
                enabled: *status != CapabilityStatus::DisabledBySettings,
            })
            .collect()
    }
}

impl PartialEq for CapabilitySnapshot {
    fn eq(&self, other: &Self) -> bool {
        self.0.entries == other.0.entries
    }
}
