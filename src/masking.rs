// SPDX-License-Identifier: GPL-3.0-only
//! Pointer-driven masking state machine
//!
//! Runs on the tick loop only. Each controlled monitor is `Unmasked`,
//! `PendingMask` (idle timer armed) or `Masked`. Visiting a monitor with the
//! pointer unmasks it and disarms its timer; leaving it arms a fresh timer.
//!
//! The dimming mode decides whether the hardware channel is used alongside
//! the overlay. The overlay is always shown: hardware dimming only adds a
//! backlight reduction on top of it.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::config::{DimmingMode, DimmingPolicy};
use crate::dimming::HardwareChannel;
use crate::monitor::{MonitorDescriptor, MonitorId, controlled_monitors};
use crate::overlay::{MaskFactory, VisualMask};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MaskState {
    pub is_masked: bool,
    /// Only set while unmasked and not under the pointer
    pub next_mask_at: Option<Instant>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MaskPhase {
    Unmasked,
    PendingMask,
    Masked,
}

impl MaskState {
    pub fn phase(&self) -> MaskPhase {
        match (self.is_masked, self.next_mask_at) {
            (true, _) => MaskPhase::Masked,
            (false, Some(_)) => MaskPhase::PendingMask,
            (false, None) => MaskPhase::Unmasked,
        }
    }
}

struct MaskEntry {
    monitor: MonitorDescriptor,
    mask: Box<dyn VisualMask>,
    state: MaskState,
}

pub struct MaskingEngine {
    entries: BTreeMap<MonitorId, MaskEntry>,
    policy: DimmingPolicy,
}

impl MaskingEngine {
    pub fn new(policy: DimmingPolicy) -> Self {
        Self {
            entries: BTreeMap::new(),
            policy,
        }
    }

    pub fn policy(&self) -> &DimmingPolicy {
        &self.policy
    }

    pub fn state(&self, id: &str) -> Option<&MaskState> {
        self.entries.get(id).map(|e| &e.state)
    }

    pub fn monitor_ids(&self) -> impl Iterator<Item = &MonitorId> {
        self.entries.keys()
    }

    /// Drop every mask and create fresh ones for the controlled monitors
    pub fn rebuild(&mut self, monitors: &[MonitorDescriptor], policy: DimmingPolicy, factory: &mut dyn MaskFactory) {
        self.hide_all();
        self.entries.clear();
        self.policy = policy;

        for monitor in controlled_monitors(monitors, &self.policy.controlled_monitor_ids) {
            match factory.create(monitor, self.policy.overlay_opacity_percent) {
                Ok(mask) => {
                    self.entries.insert(
                        monitor.id.clone(),
                        MaskEntry {
                            monitor: monitor.clone(),
                            mask,
                            state: MaskState::default(),
                        },
                    );
                }
                Err(err) => error!(monitor = %monitor.id, "can't create mask: {:#}", err),
            }
        }
        info!("Masking {} monitor(s): {:?}", self.entries.len(), self.entries.keys().collect::<Vec<_>>());
    }

    /// Swap the policy without rebuilding masks
    pub fn set_policy(&mut self, policy: DimmingPolicy) {
        if policy.overlay_opacity_percent != self.policy.overlay_opacity_percent {
            self.apply_opacity(policy.overlay_opacity_percent);
        }
        self.policy = policy;
    }

    pub fn apply_opacity(&mut self, percent: u8) {
        for entry in self.entries.values_mut() {
            if let Err(err) = entry.mask.set_opacity(percent) {
                warn!(monitor = %entry.monitor.id, "can't set mask opacity: {:#}", err);
            }
        }
    }

    /// Hide every mask and forget all timers
    pub fn hide_all(&mut self) {
        for entry in self.entries.values_mut() {
            if let Err(err) = entry.mask.hide() {
                warn!(monitor = %entry.monitor.id, "can't hide mask: {:#}", err);
            }
            entry.state = MaskState::default();
        }
    }

    /// Disarm every pending timer; masked monitors stay masked
    pub fn reset_timers(&mut self) {
        for entry in self.entries.values_mut() {
            entry.state.next_mask_at = None;
        }
    }

    /// Evaluate every monitor against the one under the pointer
    pub fn tick(&mut self, active_id: Option<&str>, now: Instant, hardware: &mut dyn HardwareChannel) {
        let policy = &self.policy;

        for (id, entry) in self.entries.iter_mut() {
            if active_id == Some(id.as_str()) {
                if entry.state.is_masked {
                    restore_hardware(policy, id, hardware);
                    if let Err(err) = entry.mask.hide() {
                        warn!(monitor = %id, "can't hide mask: {:#}", err);
                    }
                    entry.state.is_masked = false;
                    info!(monitor = %id, "Unmask (pointer on)");
                }
                entry.state.next_mask_at = None;
                continue;
            }

            if entry.state.is_masked {
                continue;
            }

            let due = *entry
                .state
                .next_mask_at
                .get_or_insert_with(|| mask_deadline(now, policy.delay()));

            if due <= now {
                dim_hardware(policy, id, hardware);
                if let Err(err) = entry.mask.show() {
                    warn!(monitor = %id, "can't show mask: {:#}", err);
                }
                entry.state.is_masked = true;
                entry.state.next_mask_at = None;
                info!(monitor = %id, "Mask applied");
            }
        }
    }
}

fn mask_deadline(now: Instant, delay: Duration) -> Instant {
    if delay.is_zero() { now } else { now + delay }
}

fn hardware_allowed(policy: &DimmingPolicy, id: &str) -> bool {
    policy.allows_hardware() && !policy.hardware_disabled_monitor_ids.contains(id)
}

fn dim_hardware(policy: &DimmingPolicy, id: &str, hardware: &mut dyn HardwareChannel) {
    if !hardware_allowed(policy, id) {
        debug!(
            monitor = %id,
            "hardware dim skipped (mode={}, enabled={})",
            policy.dimming_mode,
            policy.hardware_dimming_enabled
        );
        return;
    }

    if hardware.can_dim(id) {
        hardware.dim(id, policy.hardware_dim_level_percent, policy.hardware_timeout);
        info!(monitor = %id, "Hardware dim attempt -> {}%", policy.hardware_dim_level_percent);
    } else if policy.dimming_mode == DimmingMode::HardwareOnly {
        info!(monitor = %id, "hardware dim not available in hardware-only mode, overlay still applied");
    } else {
        debug!(monitor = %id, "hardware dim not available, overlay only");
    }
}

fn restore_hardware(policy: &DimmingPolicy, id: &str, hardware: &mut dyn HardwareChannel) {
    if hardware_allowed(policy, id) {
        hardware.restore(id, policy.hardware_timeout);
        debug!(monitor = %id, "Hardware dim restore");
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::monitor::test_monitor;
    use crate::overlay::recording::{CallLog, RecordingFactory};

    struct FakeHardware {
        dimmable: HashSet<String>,
        log: CallLog,
    }

    impl HardwareChannel for FakeHardware {
        fn can_dim(&self, id: &str) -> bool {
            self.dimmable.contains(id)
        }

        fn dim(&mut self, id: &str, percent: u8, _timeout: Duration) {
            self.log.borrow_mut().push(format!("{}:dim={}", id, percent));
        }

        fn restore(&mut self, id: &str, _timeout: Duration) {
            self.log.borrow_mut().push(format!("{}:restore", id));
        }
    }

    fn policy(delay_seconds: u32, mode: DimmingMode, hardware: bool) -> DimmingPolicy {
        DimmingPolicy {
            delay_seconds,
            dimming_mode: mode,
            hardware_dimming_enabled: hardware,
            hardware_dim_level_percent: 25,
            controlled_monitor_ids: ["A".to_string(), "B".to_string()].into_iter().collect(),
            ..DimmingPolicy::default()
        }
    }

    fn setup(policy: DimmingPolicy, dimmable: &[&str]) -> (MaskingEngine, FakeHardware, CallLog) {
        let monitors = vec![test_monitor("A", 0, true), test_monitor("B", 1920, false)];
        let mut factory = RecordingFactory::default();
        let mut engine = MaskingEngine::new(DimmingPolicy::default());
        engine.rebuild(&monitors, policy, &mut factory);

        let log = factory.log.clone();
        log.borrow_mut().clear();
        let hardware = FakeHardware {
            dimmable: dimmable.iter().map(|s| s.to_string()).collect(),
            log: log.clone(),
        };
        (engine, hardware, log)
    }

    fn calls(log: &CallLog) -> Vec<String> {
        log.borrow_mut().drain(..).collect()
    }

    #[test]
    fn test_zero_delay_masks_on_first_tick() {
        let (mut engine, mut hw, log) = setup(policy(0, DimmingMode::OverlayOnly, false), &[]);
        let t0 = Instant::now();

        engine.tick(Some("B"), t0, &mut hw);

        assert_eq!(engine.state("A").unwrap().phase(), MaskPhase::Masked);
        assert_eq!(engine.state("B").unwrap().phase(), MaskPhase::Unmasked);
        assert_eq!(calls(&log), vec!["A:show"]);
    }

    #[test]
    fn test_timer_restarts_after_visit() {
        let (mut engine, mut hw, _log) = setup(policy(180, DimmingMode::OverlayOnly, false), &[]);
        let t0 = Instant::now();
        let secs = Duration::from_secs;

        engine.tick(Some("B"), t0, &mut hw);
        let a = engine.state("A").unwrap();
        assert_eq!(a.phase(), MaskPhase::PendingMask);
        assert_eq!(a.next_mask_at, Some(t0 + secs(180)));

        engine.tick(Some("A"), t0 + secs(90), &mut hw);
        let a = engine.state("A").unwrap();
        assert_eq!(a.phase(), MaskPhase::Unmasked);
        assert_eq!(a.next_mask_at, None);

        engine.tick(Some("B"), t0 + secs(95), &mut hw);
        assert_eq!(engine.state("A").unwrap().next_mask_at, Some(t0 + secs(275)));

        // the old deadline no longer applies
        engine.tick(Some("B"), t0 + secs(181), &mut hw);
        assert_eq!(engine.state("A").unwrap().phase(), MaskPhase::PendingMask);

        engine.tick(Some("B"), t0 + secs(275), &mut hw);
        assert_eq!(engine.state("A").unwrap().phase(), MaskPhase::Masked);
    }

    #[test]
    fn test_masked_monitor_is_left_alone_until_active() {
        let (mut engine, mut hw, log) = setup(policy(0, DimmingMode::OverlayOnly, false), &[]);
        let t0 = Instant::now();

        engine.tick(Some("B"), t0, &mut hw);
        engine.tick(Some("B"), t0 + Duration::from_millis(50), &mut hw);
        engine.tick(Some("B"), t0 + Duration::from_millis(100), &mut hw);
        assert_eq!(calls(&log), vec!["A:show"]);
        assert_eq!(engine.state("A").unwrap().next_mask_at, None);

        engine.tick(Some("A"), t0 + Duration::from_millis(150), &mut hw);
        assert_eq!(calls(&log), vec!["A:hide", "B:show"]);
    }

    #[test]
    fn test_overlay_only_never_touches_hardware() {
        let (mut engine, mut hw, log) = setup(policy(0, DimmingMode::OverlayOnly, true), &["A", "B"]);
        let t0 = Instant::now();

        engine.tick(Some("B"), t0, &mut hw);
        engine.tick(Some("A"), t0, &mut hw);

        let log = calls(&log);
        assert!(log.iter().all(|c| !c.contains("dim") && !c.contains("restore")), "{log:?}");
    }

    #[test]
    fn test_hardware_dim_precedes_overlay_and_restore_precedes_hide() {
        let (mut engine, mut hw, log) = setup(policy(0, DimmingMode::AutoPreferHardware, true), &["A"]);
        let t0 = Instant::now();

        engine.tick(Some("B"), t0, &mut hw);
        assert_eq!(calls(&log), vec!["A:dim=25", "A:show"]);

        engine.tick(Some("A"), t0, &mut hw);
        // B is not dimmable so it only gets the overlay
        assert_eq!(calls(&log), vec!["A:restore", "A:hide", "B:show"]);
    }

    #[test]
    fn test_hardware_only_still_shows_overlay_when_unsupported() {
        let (mut engine, mut hw, log) = setup(policy(0, DimmingMode::HardwareOnly, true), &[]);

        engine.tick(Some("B"), Instant::now(), &mut hw);

        assert_eq!(calls(&log), vec!["A:show"]);
        assert!(engine.state("A").unwrap().is_masked);
    }

    #[test]
    fn test_per_monitor_hardware_opt_out() {
        let mut p = policy(0, DimmingMode::AutoPreferHardware, true);
        p.hardware_disabled_monitor_ids.insert("A".to_string());
        let (mut engine, mut hw, log) = setup(p, &["A", "B"]);
        let t0 = Instant::now();

        engine.tick(Some("B"), t0, &mut hw);
        engine.tick(Some("A"), t0, &mut hw);

        assert_eq!(calls(&log), vec!["A:show", "A:hide", "B:dim=25", "B:show"]);
    }

    #[test]
    fn test_master_switch_off_skips_hardware() {
        let (mut engine, mut hw, log) = setup(policy(0, DimmingMode::HardwareOnly, false), &["A"]);
        let t0 = Instant::now();

        engine.tick(Some("B"), t0, &mut hw);
        engine.tick(Some("A"), t0, &mut hw);

        assert_eq!(calls(&log), vec!["A:show", "A:hide", "B:show"]);
    }

    #[test]
    fn test_pointer_outside_controlled_masks_everything() {
        let (mut engine, mut hw, log) = setup(policy(0, DimmingMode::OverlayOnly, false), &[]);

        engine.tick(None, Instant::now(), &mut hw);

        assert_eq!(calls(&log), vec!["A:show", "B:show"]);
    }

    #[test]
    fn test_hide_all_and_reset() {
        let (mut engine, mut hw, log) = setup(policy(0, DimmingMode::OverlayOnly, false), &[]);
        engine.tick(Some("B"), Instant::now(), &mut hw);
        calls(&log);

        engine.hide_all();
        assert_eq!(engine.state("A").unwrap().phase(), MaskPhase::Unmasked);
        assert_eq!(calls(&log), vec!["A:hide", "B:hide"]);
    }

    #[test]
    fn test_reset_timers_disarms_pending() {
        let (mut engine, mut hw, _log) = setup(policy(60, DimmingMode::OverlayOnly, false), &[]);
        engine.tick(Some("B"), Instant::now(), &mut hw);
        assert_eq!(engine.state("A").unwrap().phase(), MaskPhase::PendingMask);

        engine.reset_timers();
        assert_eq!(engine.state("A").unwrap().phase(), MaskPhase::Unmasked);
    }

    #[test]
    fn test_rebuild_defaults_to_non_primary_and_skips_failures() {
        let monitors = vec![
            test_monitor("A", 0, true),
            test_monitor("B", 1920, false),
            test_monitor("C", 3840, false),
        ];
        let mut factory = RecordingFactory {
            fail_for: Some("C".to_string()),
            ..RecordingFactory::default()
        };
        let mut engine = MaskingEngine::new(DimmingPolicy::default());
        engine.rebuild(&monitors, DimmingPolicy::default(), &mut factory);

        assert_eq!(engine.monitor_ids().collect::<Vec<_>>(), vec!["B"]);
        assert_eq!(calls(&factory.log), vec!["B:create opacity=100"]);
    }

    #[test]
    fn test_opacity_change_reaches_every_mask() {
        let (mut engine, _hw, log) = setup(policy(0, DimmingMode::OverlayOnly, false), &[]);
        let mut next = engine.policy().clone();
        next.overlay_opacity_percent = 40;

        engine.set_policy(next.clone());
        assert_eq!(calls(&log), vec!["A:opacity=40", "B:opacity=40"]);

        engine.set_policy(next);
        assert!(calls(&log).is_empty());
    }
}
