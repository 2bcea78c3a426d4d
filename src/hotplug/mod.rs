// SPDX-License-Identifier: GPL-3.0-only
//! Display hotplug detection using udev
//!
//! A dedicated thread watches the DRM subsystem and pokes an async task,
//! which coalesces each burst of kernel events into a single rebuild request.

mod udev_monitor;

use std::time::{Duration, Instant};

use tokio::sync::mpsc::{self, Receiver, Sender, error::TrySendError};

use udev_monitor::UdevMonitor;

/// Minimum spacing between two rebuild requests
pub const MIN_REBUILD_GAP: Duration = Duration::from_millis(1500);
/// Time given to outputs to come up after the last event of a burst
pub const SETTLE_DELAY: Duration = Duration::from_millis(1000);

#[derive(Clone, Copy, Debug)]
pub struct Debounce {
    pub min_gap: Duration,
    pub settle: Duration,
}

impl Default for Debounce {
    fn default() -> Self {
        Self {
            min_gap: MIN_REBUILD_GAP,
            settle: SETTLE_DELAY,
        }
    }
}

impl Debounce {
    /// Forward one request per burst of raw events until either side closes
    pub async fn run(self, mut raw: Receiver<()>, settled: Sender<()>) {
        let mut last_rebuild: Option<Instant> = None;

        while raw.recv().await.is_some() {
            let mut drained = 0;
            while raw.try_recv().is_ok() {
                drained += 1;
            }
            if drained > 0 {
                debug!("Drained {} additional hotplug events", drained);
            }

            if let Some(last) = last_rebuild {
                let elapsed = last.elapsed();
                if elapsed < self.min_gap {
                    let wait = self.min_gap - elapsed;
                    debug!("Rate limiting: waiting additional {:?} before rebuild", wait);
                    tokio::time::sleep(wait).await;
                }
            }

            tokio::time::sleep(self.settle).await;
            // events that arrived while settling belong to this burst
            while raw.try_recv().is_ok() {}
            last_rebuild = Some(Instant::now());

            info!("Hotplug settled, requesting monitor rebuild");
            if settled.send(()).await.is_err() {
                break;
            }
        }

        debug!("Hotplug debounce task finished");
    }
}

/// Start watching for display hotplug; yields one `()` per settled burst
///
/// udev's `MonitorSocket` is not `Send`, so it lives on its own thread.
pub fn spawn() -> Receiver<()> {
    let (raw_tx, raw_rx) = mpsc::channel(100);
    let (settled_tx, settled_rx) = mpsc::channel(1);

    std::thread::Builder::new()
        .name("udev-hotplug".into())
        .spawn(move || {
            let monitor = match UdevMonitor::new() {
                Ok(m) => m,
                Err(e) => {
                    error!("Failed to initialize display hotplug monitoring: {}", e);
                    return;
                }
            };

            let err = monitor.run(|_event: &udev::Event| match raw_tx.try_send(()) {
                Ok(_) => true,
                Err(TrySendError::Full(_)) => {
                    debug!("Hotplug channel full, skipping event");
                    true
                }
                Err(TrySendError::Closed(_)) => false,
            });
            warn!("Display hotplug monitoring stopped: {}", err);
        })
        .map_err(|e| error!("Failed to spawn hotplug thread: {}", e))
        .ok();

    tokio::spawn(Debounce::default().run(raw_rx, settled_tx));
    settled_rx
}
