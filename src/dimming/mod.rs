// SPDX-License-Identifier: GPL-3.0-only
//! Hardware dimming engine
//!
//! Owns one [`DimmingSession`] per probed monitor and the shared
//! [`CapabilityMap`]. Session bookkeeping lives on the tick loop; brightness
//! writes run on the blocking pool behind a deadline.
//!
//! # Timeouts
//!
//! Every write is a bounded wait: the protocol call is submitted with
//! `spawn_blocking` and awaited for at most the caller's timeout. If the
//! deadline passes first the session is marked failed with "Timed out". The
//! native call is left to finish on its own and whatever it returns is
//! logged and dropped. A session's failure cell is set-once, so the first
//! outcome recorded is the one that sticks.
//!
//! # Generations
//!
//! Each [`HardwareDimmer::refresh`] starts a new generation. Results from
//! tasks spawned under an older generation are discarded instead of
//! overwriting the fresh capability table.
//!
//! # Ordering
//!
//! Writes to one monitor are applied in the order they were issued. A write
//! waits for its predecessor before reaching the bus, and that wait counts
//! against its own deadline. Teardown restores every session and then waits
//! for the queue to drain, so the restore is the last write a monitor sees.

mod capability;
mod session;

pub use capability::{
    CapabilityMap, CapabilitySnapshot, CapabilityStatus, MSG_DISABLED_BY_SETTINGS, MSG_NOT_SUPPORTED, StatusRow,
};
pub use session::{DimmingSession, PROBE_ORDER, ProbeOutcome, Protocols, level_for_percent, probe};

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, timeout_at};

use crate::config::DEFAULT_HARDWARE_TIMEOUT_MS;
use crate::error::DimmingError;
use crate::monitor::{MonitorDescriptor, MonitorId};
use crate::protocols::{DirectControl, ManagementQuery};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(DEFAULT_HARDWARE_TIMEOUT_MS);

/// How a single brightness write ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MutationOutcome {
    Applied,
    Failed(String),
    TimedOut,
    /// The session was replaced by a refresh before the result arrived
    Stale,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mutation {
    Dim,
    Restore,
}

impl std::fmt::Display for Mutation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mutation::Dim => f.write_str("set"),
            Mutation::Restore => f.write_str("restore"),
        }
    }
}

/// Consumer-facing hardware operations used by the masking state machine
pub trait HardwareChannel {
    fn can_dim(&self, id: &str) -> bool;
    fn dim(&mut self, id: &str, percent: u8, timeout: Duration);
    fn restore(&mut self, id: &str, timeout: Duration);
}

pub struct HardwareDimmer {
    protocols: Protocols,
    sessions: HashMap<MonitorId, DimmingSession>,
    capabilities: Arc<CapabilityMap>,
    generation: u64,
    /// Deadline for the restores issued by refresh and dispose
    timeout: Duration,
    runtime: Handle,
}

impl HardwareDimmer {
    /// Create an engine bound to the current tokio runtime
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn new(direct: Arc<dyn DirectControl>, management: Arc<dyn ManagementQuery>) -> Self {
        Self::with_runtime(direct, management, Handle::current())
    }

    pub fn with_runtime(
        direct: Arc<dyn DirectControl>,
        management: Arc<dyn ManagementQuery>,
        runtime: Handle,
    ) -> Self {
        Self {
            protocols: Protocols { direct, management },
            sessions: HashMap::new(),
            capabilities: Arc::new(CapabilityMap::new()),
            generation: 0,
            timeout: DEFAULT_TIMEOUT,
            runtime,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Lock-free view of every monitor's capability
    pub fn capabilities(&self) -> CapabilitySnapshot {
        self.capabilities.snapshot()
    }

    pub fn session(&self, id: &str) -> Option<&DimmingSession> {
        self.sessions.get(id)
    }

    pub fn is_supported(&self, id: &str) -> bool {
        self.sessions.get(id).is_some_and(|s| s.supported)
    }

    pub fn can_dim(&self, id: &str) -> bool {
        self.sessions
            .get(id)
            .is_some_and(|s| s.supported && !s.disabled_this_session())
    }

    /// Tear down every session and probe the given monitors from scratch
    ///
    /// Monitors in `disabled_ids` get [`CapabilityStatus::DisabledBySettings`]
    /// and no session. This is the only path that changes the set of known
    /// monitors.
    pub async fn refresh(&mut self, monitors: &[MonitorDescriptor], disabled_ids: &HashSet<MonitorId>) {
        info!("=== START PROBE ({} monitor(s)) ===", monitors.len());
        self.teardown().await;
        self.generation += 1;

        let mut entries = BTreeMap::new();
        let mut tasks = Vec::new();

        for monitor in monitors {
            if disabled_ids.contains(&monitor.id) {
                entries.insert(monitor.id.clone(), CapabilityStatus::DisabledBySettings);
                continue;
            }

            let id = monitor.id.clone();
            let monitor = monitor.clone();
            let protocols = self.protocols.clone();
            let task = self.runtime.spawn_blocking(move || probe(&monitor, &protocols));
            tasks.push((id, task));
        }

        for (id, task) in tasks {
            let (status, session) = probe_result(&id, task.await);
            entries.insert(id.clone(), status);
            if let Some(session) = session {
                self.sessions.insert(id, session);
            }
        }

        for (id, status) in &entries {
            info!(monitor = %id, "Capability: {}", status);
        }
        self.capabilities.publish(self.generation, entries);
        info!("=== END PROBE: {} session(s) ===", self.sessions.len());
    }

    /// Dim a monitor to `percent` of its hardware range
    ///
    /// Returns `None` without touching the hardware when the monitor cannot
    /// be dimmed. The returned handle may be dropped; the write still runs.
    pub fn dim(&self, id: &str, percent: u8, timeout: Duration) -> Option<JoinHandle<MutationOutcome>> {
        let Some(session) = self.dimmable(id) else {
            debug!(monitor = %id, "hardware dim skipped");
            return None;
        };
        let value = session.level_for_percent(percent);
        debug!(monitor = %id, "hardware dim to {}% (raw {})", percent.min(100), value);
        Some(self.dispatch(session, Mutation::Dim, value, timeout))
    }

    /// Write back the level recorded when the session was probed
    pub fn restore(&self, id: &str, timeout: Duration) -> Option<JoinHandle<MutationOutcome>> {
        let session = self.dimmable(id)?;
        Some(self.dispatch(session, Mutation::Restore, session.original_level, timeout))
    }

    /// Restore every eligible session; one failure never blocks the others
    pub fn restore_all(&self, timeout: Duration) -> Vec<JoinHandle<MutationOutcome>> {
        self.sessions
            .keys()
            .filter_map(|id| self.restore(id, timeout))
            .collect()
    }

    /// Restore every session and wait for each write to settle or time out
    pub async fn restore_all_and_wait(&self, timeout: Duration) {
        for handle in self.restore_all(timeout) {
            if let Err(e) = handle.await {
                warn!("{}", DimmingError::Join(e.to_string()));
            }
        }
    }

    /// Restore brightness and release every native resource
    pub async fn dispose(&mut self) {
        self.teardown().await;
        info!("Hardware dimmer disposed");
    }

    async fn teardown(&mut self) {
        let timeout = self.timeout;
        self.restore_all_and_wait(timeout).await;
        for (id, session) in &self.sessions {
            if !session.health.settle(timeout).await {
                warn!(monitor = %id, "write still running at teardown, releasing anyway");
            }
        }
        self.release_sessions();
    }

    fn release_sessions(&mut self) {
        for (_, mut session) in self.sessions.drain() {
            session.release(&self.protocols);
        }
    }

    fn dimmable(&self, id: &str) -> Option<&DimmingSession> {
        self.sessions
            .get(id)
            .filter(|s| s.supported && !s.disabled_this_session())
    }

    fn dispatch(&self, session: &DimmingSession, op: Mutation, value: u32, timeout: Duration) -> JoinHandle<MutationOutcome> {
        let id = session.monitor_id.clone();
        let protocol = session.protocol;
        let target = session.target(&self.protocols);
        let health = Arc::clone(&session.health);
        let capabilities = Arc::clone(&self.capabilities);
        let generation = self.generation;

        let running = health.begin();
        if running > 0 {
            warn!(monitor = %id, "{} mutation(s) still outstanding, queueing {}", running, op);
        }
        let (earlier, done) = health.enqueue();

        self.runtime.spawn(async move {
            let deadline = Instant::now() + timeout;

            let outcome = 'write: {
                if let Some(mut earlier) = earlier
                    && timeout_at(deadline, &mut earlier).await.is_err()
                {
                    // our turn never came; pass the slot on once it does
                    health.finish();
                    tokio::spawn(async move {
                        let _ = earlier.await;
                        drop(done);
                    });
                    break 'write MutationOutcome::TimedOut;
                }

                if let Some(failure) = health.failure() {
                    debug!(monitor = %id, "{} skipped, session failed earlier: {}", op, failure);
                    health.finish();
                    return MutationOutcome::Failed(failure.to_string());
                }

                let mut call = tokio::task::spawn_blocking(move || target.write(value));
                match timeout_at(deadline, &mut call).await {
                    Ok(joined) => {
                        health.finish();
                        drop(done);
                        match joined {
                            Ok(Ok(())) => MutationOutcome::Applied,
                            Ok(Err(err)) => MutationOutcome::Failed(
                                DimmingError::Mutation {
                                    id: id.clone(),
                                    reason: format!("{} {} failed: {:#}", protocol, op, err),
                                }
                                .to_string(),
                            ),
                            Err(join) => MutationOutcome::Failed(DimmingError::Join(join.to_string()).to_string()),
                        }
                    }
                    Err(_) => {
                        let late_id = id.clone();
                        let late_health = Arc::clone(&health);
                        tokio::spawn(async move {
                            match call.await {
                                Ok(res) => debug!(monitor = %late_id, "discarding late {} result: {:?}", op, res.is_ok()),
                                Err(e) => debug!(monitor = %late_id, "late {} task failed: {}", op, e),
                            }
                            late_health.finish();
                            drop(done);
                        });
                        MutationOutcome::TimedOut
                    }
                }
            };

            let message = match outcome {
                MutationOutcome::Applied => {
                    info!(monitor = %id, "hardware {} to {} ok", op, value);
                    return MutationOutcome::Applied;
                }
                MutationOutcome::Failed(ref msg) => msg.clone(),
                MutationOutcome::TimedOut => DimmingError::Timeout { id: id.clone() }.to_string(),
                MutationOutcome::Stale => return MutationOutcome::Stale,
            };

            if capabilities.snapshot().generation() != generation {
                warn!(monitor = %id, "{} result arrived after a refresh, discarded: {}", op, message);
                return MutationOutcome::Stale;
            }
            if !health.fail(message.clone()) {
                debug!(monitor = %id, "session already failed, ignoring: {}", message);
                return outcome;
            }
            warn!(monitor = %id, "hardware {} failed: {}; overlay only from now on", op, message);

            if !capabilities.update(generation, &id, CapabilityStatus::Failed(message)) {
                warn!(monitor = %id, "result arrived after a refresh, discarded");
                return MutationOutcome::Stale;
            }
            outcome
        })
    }
}

/// Capability entry and session for one finished probe task
fn probe_result(id: &str, joined: Result<ProbeOutcome, JoinError>) -> (CapabilityStatus, Option<DimmingSession>) {
    match joined {
        Ok(ProbeOutcome::Session(session)) => (CapabilityStatus::Supported, Some(session)),
        Ok(ProbeOutcome::Unsupported(msg)) => (CapabilityStatus::Unsupported(msg), None),
        Err(e) => {
            error!(monitor = %id, "{}", DimmingError::Join(e.to_string()));
            (CapabilityStatus::Unsupported(MSG_NOT_SUPPORTED.to_string()), None)
        }
    }
}

impl HardwareChannel for HardwareDimmer {
    fn can_dim(&self, id: &str) -> bool {
        HardwareDimmer::can_dim(self, id)
    }

    fn dim(&mut self, id: &str, percent: u8, timeout: Duration) {
        let _ = HardwareDimmer::dim(self, id, percent, timeout);
    }

    fn restore(&mut self, id: &str, timeout: Duration) {
        let _ = HardwareDimmer::restore(self, id, timeout);
    }
}

impl Drop for HardwareDimmer {
    fn drop(&mut self) {
        self.release_sessions();
    }
}
