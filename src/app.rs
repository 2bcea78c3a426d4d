// SPDX-License-Identifier: GPL-3.0-only
//! Daemon loop wiring the masking engine to the desktop and the hardware
//!
//! One task owns everything: the pointer tick, hotplug and RandR layout
//! changes, signals for pause (`SIGUSR1`), reload (`SIGHUP`) and shutdown
//! (`SIGINT`/`SIGTERM`).

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc::Receiver;
use tokio::time::MissedTickBehavior;

use crate::config::{Overrides, Settings};
use crate::dimming::{CapabilitySnapshot, HardwareDimmer, StatusRow};
use crate::masking::MaskingEngine;
use crate::monitor::{MonitorDescriptor, MonitorSource, PointerSource, controlled_monitors, monitor_at};
use crate::overlay::MaskFactory;

/// Pointer sampling period
pub const TICK_INTERVAL: Duration = Duration::from_millis(50);

pub struct App<D, F> {
    desktop: D,
    factory: F,
    dimmer: HardwareDimmer,
    masking: MaskingEngine,
    settings: Settings,
    settings_path: PathBuf,
    overrides: Overrides,
    monitors: Vec<MonitorDescriptor>,
    paused: bool,
}

impl<D, F> App<D, F>
where
    D: MonitorSource + PointerSource,
    F: MaskFactory,
{
    pub fn new(
        desktop: D,
        factory: F,
        dimmer: HardwareDimmer,
        settings: Settings,
        settings_path: PathBuf,
        overrides: Overrides,
    ) -> Self {
        Self {
            desktop,
            factory,
            dimmer,
            masking: MaskingEngine::new(settings.policy()),
            settings,
            settings_path,
            overrides,
            monitors: Vec::new(),
            paused: false,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn masking(&self) -> &MaskingEngine {
        &self.masking
    }

    pub fn capabilities(&self) -> CapabilitySnapshot {
        self.dimmer.capabilities()
    }

    /// Re-enumerate monitors, recreate masks and re-probe the hardware
    pub async fn rebuild(&mut self) -> Result<()> {
        let monitors = self.desktop.list().context("Failed to enumerate monitors")?;
        let policy = self.settings.policy();

        self.masking.rebuild(&monitors, policy.clone(), &mut self.factory);

        let controlled: Vec<MonitorDescriptor> = controlled_monitors(&monitors, &policy.controlled_monitor_ids)
            .into_iter()
            .cloned()
            .collect();
        self.dimmer.set_timeout(policy.hardware_timeout);
        self.dimmer
            .refresh(&controlled, &policy.hardware_disabled_monitor_ids)
            .await;

        self.monitors = monitors;
        self.masking.reset_timers();
        log_status(&self.dimmer.capabilities().rows());
        Ok(())
    }

    /// Sample the pointer and advance every monitor's mask state
    pub fn tick(&mut self, now: Instant) {
        if self.paused {
            return;
        }

        let (x, y) = match self.desktop.position() {
            Ok(pos) => pos,
            Err(err) => {
                debug!("pointer query failed: {:#}", err);
                return;
            }
        };

        let active = monitor_at(&self.monitors, x, y).map(|m| m.id.clone());
        self.masking.tick(active.as_deref(), now, &mut self.dimmer);
    }

    pub async fn set_paused(&mut self, paused: bool) {
        if paused == self.paused {
            return;
        }
        self.paused = paused;

        if paused {
            self.masking.hide_all();
            self.dimmer
                .restore_all_and_wait(self.masking.policy().hardware_timeout)
                .await;
            info!("Paused: masks hidden, brightness restored");
        } else {
            self.masking.reset_timers();
            info!("Resumed");
        }
    }

    /// Re-read the settings file and rebuild everything from it
    pub async fn reload(&mut self) -> Result<()> {
        let mut settings = Settings::load(&self.settings_path);
        settings.apply(&self.overrides);
        info!("Settings reloaded from {}", self.settings_path.display());
        self.settings = settings;
        self.rebuild().await
    }

    /// Hide every mask, restore brightness and release the hardware
    pub async fn shutdown(&mut self) {
        self.masking.hide_all();
        self.dimmer.dispose().await;
    }

    pub async fn run(mut self, mut hotplug: Receiver<()>) -> Result<()> {
        let mut sigusr1 = signal(SignalKind::user_defined1()).context("Failed to install SIGUSR1 handler")?;
        let mut sighup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;
        let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

        self.rebuild().await?;

        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.desktop.layout_changed() {
                        info!("Output layout changed, rebuilding");
                        self.rebuild_or_log().await;
                    }
                    self.tick(Instant::now());
                }
                Some(()) = hotplug.recv() => {
                    info!("Display hotplug, rebuilding");
                    self.rebuild_or_log().await;
                }
                _ = sigusr1.recv() => {
                    let paused = !self.paused;
                    self.set_paused(paused).await;
                }
                _ = sighup.recv() => {
                    if let Err(err) = self.reload().await {
                        error!("reload failed: {:#}", err);
                    }
                }
                _ = sigterm.recv() => {
                    info!("SIGTERM received, shutting down");
                    break;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted, shutting down");
                    break;
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    async fn rebuild_or_log(&mut self) {
        if let Err(err) = self.rebuild().await {
            error!("rebuild failed: {:#}", err);
        }
    }
}

/// Probe every attached monitor once and report its hardware capability
pub async fn probe_status(desktop: &impl MonitorSource, dimmer: &mut HardwareDimmer, settings: &Settings) -> Result<Vec<StatusRow>> {
    let monitors = desktop.list().context("Failed to enumerate monitors")?;
    let policy = settings.policy();
    dimmer.set_timeout(policy.hardware_timeout);
    dimmer.refresh(&monitors, &policy.hardware_disabled_monitor_ids).await;
    let rows = dimmer.capabilities().rows();
    dimmer.dispose().await;
    Ok(rows)
}

fn log_status(rows: &[StatusRow]) {
    for row in rows {
        match &row.message {
            Some(msg) => info!(monitor = %row.id, enabled = row.enabled, "{}: {}", row.status, msg),
            None => info!(monitor = %row.id, enabled = row.enabled, "{}", row.status),
        }
    }
}
