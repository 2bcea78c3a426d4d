// SPDX-License-Identifier: GPL-3.0-only
//! Dimming sessions and protocol probing
//!
//! A session is the live bundle of hardware state the engine keeps for one
//! monitor between probing and teardown. Probing walks [`PROBE_ORDER`] and
//! stops at the first protocol that answers.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::anyhow;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::DimmingError;
use crate::monitor::{MonitorDescriptor, MonitorId, NativeHandle};
use crate::protocols::{DirectControl, ManagementQuery, PhysicalHandle, ProtocolKind};

use super::capability::MSG_NOT_SUPPORTED;

/// Candidate protocols, most precise first
pub const PROBE_ORDER: [ProtocolKind; 2] = [ProtocolKind::DirectControl, ProtocolKind::ManagementQuery];

/// Both protocol adapters, shared with background mutation tasks
#[derive(Clone)]
pub struct Protocols {
    pub direct: Arc<dyn DirectControl>,
    pub management: Arc<dyn ManagementQuery>,
}

/// State a session shares with its in-flight mutations
///
/// Writes form a queue: each one holds the receiving end of its
/// predecessor's completion signal and only touches the bus once that fires.
#[derive(Debug, Default)]
pub(crate) struct SessionHealth {
    /// Set once on the first failure or timeout; never cleared
    failure: OnceCell<String>,
    /// Writes issued whose native call has not returned yet
    in_flight: AtomicUsize,
    /// Completion signal of the most recently queued write
    tail: Mutex<Option<oneshot::Receiver<()>>>,
}

impl SessionHealth {
    pub(crate) fn is_disabled(&self) -> bool {
        self.failure.get().is_some()
    }

    pub(crate) fn failure(&self) -> Option<&str> {
        self.failure.get().map(String::as_str)
    }

    /// Record a failure; returns false if an earlier one already won
    pub(crate) fn fail(&self, message: String) -> bool {
        self.failure.set(message).is_ok()
    }

    /// Mark a mutation as started and return how many were already running
    pub(crate) fn begin(&self) -> usize {
        self.in_flight.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) fn finish(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Take a place at the end of the write queue
    ///
    /// Returns the signal of the write queued before this one, if any, and
    /// the sender to drop once this write is over.
    pub(crate) fn enqueue(&self) -> (Option<oneshot::Receiver<()>>, oneshot::Sender<()>) {
        let (done, signal) = oneshot::channel();
        let earlier = self.tail.lock().replace(signal);
        (earlier, done)
    }

    /// Wait for every write queued so far; false if one is still running
    pub(crate) async fn settle(&self, timeout: Duration) -> bool {
        let (earlier, done) = self.enqueue();
        let Some(mut earlier) = earlier else {
            return true;
        };
        if tokio::time::timeout(timeout, &mut earlier).await.is_ok() {
            return true;
        }
        tokio::spawn(async move {
            let _ = earlier.await;
            drop(done);
        });
        false
    }
}

#[derive(Debug)]
pub struct DimmingSession {
    pub monitor_id: MonitorId,
    pub protocol: ProtocolKind,
    pub min_level: u32,
    pub max_level: u32,
    pub original_level: u32,
    pub supported: bool,
    physical: Vec<PhysicalHandle>,
    pub(crate) health: Arc<SessionHealth>,
}

impl DimmingSession {
    fn new(monitor_id: &str, protocol: ProtocolKind, physical: Vec<PhysicalHandle>, min: u32, current: u32, max: u32) -> Self {
        Self {
            monitor_id: monitor_id.to_string(),
            protocol,
            min_level: min,
            max_level: max,
            original_level: current.clamp(min, max),
            supported: true,
            physical,
            health: Arc::new(SessionHealth::default()),
        }
    }

    pub fn disabled_this_session(&self) -> bool {
        self.health.is_disabled()
    }

    pub fn failure_message(&self) -> Option<&str> {
        self.health.failure()
    }

    pub fn physical_handles(&self) -> &[PhysicalHandle] {
        &self.physical
    }

    /// Raw level for a percentage of this session's range
    pub fn level_for_percent(&self, percent: u8) -> u32 {
        level_for_percent(self.min_level, self.max_level, percent)
    }

    pub(crate) fn target(&self, protocols: &Protocols) -> WriteTarget {
        match self.protocol {
            ProtocolKind::DirectControl => WriteTarget::Direct {
                direct: Arc::clone(&protocols.direct),
                physical: self.physical[0],
            },
            ProtocolKind::ManagementQuery => WriteTarget::Management(Arc::clone(&protocols.management)),
        }
    }

    /// Close native resources; safe to call more than once
    pub(crate) fn release(&mut self, protocols: &Protocols) {
        if !self.physical.is_empty() {
            protocols.direct.release(&self.physical);
            self.physical.clear();
        }
    }
}

/// `min + round((max - min) * percent / 100)`, clamped to `[min, max]`
pub fn level_for_percent(min: u32, max: u32, percent: u8) -> u32 {
    if max <= min {
        return min;
    }
    let percent = u64::from(percent.min(100));
    let range = u64::from(max - min);
    let offset = (range * percent + 50) / 100;
    (u64::from(min) + offset).clamp(u64::from(min), u64::from(max)) as u32
}

/// Everything a background task needs to perform one write
pub(crate) enum WriteTarget {
    Direct {
        direct: Arc<dyn DirectControl>,
        physical: PhysicalHandle,
    },
    Management(Arc<dyn ManagementQuery>),
}

impl WriteTarget {
    pub(crate) fn write(&self, value: u32) -> anyhow::Result<()> {
        match self {
            WriteTarget::Direct { direct, physical } => direct.set_level(*physical, value),
            WriteTarget::Management(management) => management.set_brightness(value),
        }
    }
}

pub enum ProbeOutcome {
    Session(DimmingSession),
    Unsupported(String),
}

/// Find a working protocol for one monitor
///
/// Never panics and never leaves physical handles acquired on a failed path.
pub fn probe(monitor: &MonitorDescriptor, protocols: &Protocols) -> ProbeOutcome {
    let Some(handle) = monitor.native_handle.as_ref() else {
        info!(monitor = %monitor.id, "no native handle, hardware dimming unsupported");
        return ProbeOutcome::Unsupported(MSG_NOT_SUPPORTED.to_string());
    };

    for protocol in PROBE_ORDER {
        let attempt = catch_unwind(AssertUnwindSafe(|| match protocol {
            ProtocolKind::DirectControl => probe_direct(&monitor.id, handle, protocols.direct.as_ref()),
            ProtocolKind::ManagementQuery => probe_management(&monitor.id, handle, protocols.management.as_ref()),
        }))
        .unwrap_or_else(|_| {
            Err(DimmingError::Probe {
                id: monitor.id.clone(),
                protocol,
                reason: "adapter panicked".to_string(),
            })
        });

        match attempt {
            Ok(session) => {
                info!(
                    monitor = %monitor.id,
                    "{}: supported, range {}-{} current {}",
                    protocol,
                    session.min_level,
                    session.max_level,
                    session.original_level
                );
                return ProbeOutcome::Session(session);
            }
            Err(err) => info!(monitor = %monitor.id, "{}, trying next protocol", err),
        }
    }

    info!(monitor = %monitor.id, "no brightness protocol available");
    ProbeOutcome::Unsupported(MSG_NOT_SUPPORTED.to_string())
}

fn probe_direct(id: &str, handle: &NativeHandle, direct: &dyn DirectControl) -> Result<DimmingSession, DimmingError> {
    let fail = |reason: String| DimmingError::Probe {
        id: id.to_string(),
        protocol: ProtocolKind::DirectControl,
        reason,
    };

    let count = direct.probe(handle).map_err(|e| fail(format!("{:#}", e)))?;
    if count == 0 {
        return Err(fail("no physical monitors".to_string()));
    }

    let physical = direct.acquire(handle).map_err(|e| fail(format!("cannot get physical monitors: {:#}", e)))?;
    let Some(&first) = physical.first() else {
        return Err(fail("no physical monitors acquired".to_string()));
    };

    let range = catch_unwind(AssertUnwindSafe(|| direct.get_range(first)))
        .unwrap_or_else(|_| Err(anyhow!("adapter panicked")))
        .and_then(|range| {
            if range.min > range.max {
                Err(anyhow!("invalid range {}-{}", range.min, range.max))
            } else {
                Ok(range)
            }
        });

    match range {
        Ok(range) => Ok(DimmingSession::new(
            id,
            ProtocolKind::DirectControl,
            physical,
            range.min,
            range.current,
            range.max,
        )),
        Err(err) => {
            direct.release(&physical);
            Err(fail(format!("cannot get brightness: {:#}", err)))
        }
    }
}

fn probe_management(id: &str, handle: &NativeHandle, management: &dyn ManagementQuery) -> Result<DimmingSession, DimmingError> {
    let fail = |reason: String| DimmingError::Probe {
        id: id.to_string(),
        protocol: ProtocolKind::ManagementQuery,
        reason,
    };

    if !management.covers(handle) {
        return Err(fail(format!("{} is not driven by the backlight interface", handle.connector)));
    }

    let (current, max) = management.get_brightness().map_err(|e| fail(format!("{:#}", e)))?;
    Ok(DimmingSession::new(id, ProtocolKind::ManagementQuery, Vec::new(), 0, current, max))
}
