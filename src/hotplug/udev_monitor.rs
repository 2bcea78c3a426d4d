// SPDX-License-Identifier: GPL-3.0-only
use std::io;
use std::os::fd::AsRawFd;

/// Blocking watcher for DRM connector changes
pub struct UdevMonitor {
    socket: udev::MonitorSocket,
}

impl UdevMonitor {
    /// Listen on `drm`/`drm_minor`; connector plug and unplug both surface as
    /// change events on the card device
    pub fn new() -> io::Result<Self> {
        let socket = udev::MonitorBuilder::new()?
            .match_subsystem_devtype("drm", "drm_minor")?
            .listen()?;
        Ok(Self { socket })
    }

    /// Block on the socket and hand each add/remove/change event to `on_event`
    ///
    /// Returns when polling fails or `on_event` returns `false`.
    pub fn run<F>(self, mut on_event: F) -> io::Error
    where
        F: FnMut(&udev::Event) -> bool,
    {
        info!("Display hotplug monitoring started");
        let fd = self.socket.as_raw_fd();

        loop {
            let mut poll_fd = libc::pollfd {
                fd,
                events: libc::POLLIN,
                revents: 0,
            };

            // SAFETY: poll_fd is a valid pollfd for the lifetime of the call
            let ready = unsafe { libc::poll(&mut poll_fd, 1, -1) };
            if ready < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return err;
            }

            for event in self.socket.iter() {
                if !matches!(
                    event.event_type(),
                    udev::EventType::Add | udev::EventType::Remove | udev::EventType::Change
                ) {
                    continue;
                }

                debug!("udev {:?} at {:?}", event.event_type(), event.syspath());
                if !on_event(&event) {
                    return io::Error::new(io::ErrorKind::Interrupted, "hotplug receiver closed");
                }
            }
        }
    }
}
