// SPDX-License-Identifier: GPL-3.0-only
//! RandR-backed monitor enumeration and pointer sampling

use std::sync::Arc;

use anyhow::{Context, Result};
use x11rb::connection::Connection;
use x11rb::protocol::Event;
use x11rb::protocol::randr::{self, ConnectionExt as RandrExt};
use x11rb::protocol::xproto::{Atom, AtomEnum, ConnectionExt as XprotoExt, Window};
use x11rb::rust_connection::RustConnection;

use super::{Bounds, MonitorDescriptor, MonitorSource, NativeHandle, PointerSource};

/// EDID blocks are 128 bytes; extensions push this to a few hundred at most
const EDID_MAX_LONGS: u32 = 256;

/// Shared X11 connection used for enumeration, pointer queries and overlays
pub struct X11Display {
    conn: Arc<RustConnection>,
    root: Window,
    root_depth: u8,
    root_visual: u32,
    edid_atom: Atom,
}

impl X11Display {
    pub fn connect() -> Result<Self> {
        let (conn, screen_num) = x11rb::connect(None).context("Failed to connect to X server")?;
        let screen = &conn.setup().roots[screen_num];
        let (root, root_depth, root_visual) = (screen.root, screen.root_depth, screen.root_visual);

        let version = conn
            .randr_query_version(1, 5)
            .context("Failed to query RandR version")?
            .reply()
            .context("RandR extension not available")?;
        debug!("RandR {}.{}", version.major_version, version.minor_version);

        conn.randr_select_input(root, randr::NotifyMask::SCREEN_CHANGE | randr::NotifyMask::OUTPUT_CHANGE)
            .context("Failed to subscribe to RandR notifications")?;

        let edid_atom = conn
            .intern_atom(false, b"EDID")
            .context("Failed to intern EDID atom")?
            .reply()
            .context("Failed to get reply for EDID atom")?
            .atom;

        conn.flush().context("Failed to flush X11 connection")?;

        Ok(Self {
            conn: Arc::new(conn),
            root,
            root_depth,
            root_visual,
            edid_atom,
        })
    }

    pub fn connection(&self) -> Arc<RustConnection> {
        Arc::clone(&self.conn)
    }

    pub fn root(&self) -> Window {
        self.root
    }

    pub fn root_depth(&self) -> u8 {
        self.root_depth
    }

    pub fn root_visual(&self) -> u32 {
        self.root_visual
    }

    /// Drain pending events and report whether the output layout changed
    pub fn take_layout_change(&self) -> bool {
        let mut changed = false;
        loop {
            match self.conn.poll_for_event() {
                Ok(Some(Event::RandrScreenChangeNotify(_))) | Ok(Some(Event::RandrNotify(_))) => {
                    changed = true;
                }
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(err) => {
                    error!("X11 event poll failed: {}", err);
                    break;
                }
            }
        }
        changed
    }

    fn read_edid(&self, output: randr::Output) -> Option<Vec<u8>> {
        let reply = self
            .conn
            .randr_get_output_property(output, self.edid_atom, AtomEnum::ANY, 0, EDID_MAX_LONGS, false, false)
            .ok()?
            .reply()
            .ok()?;
        (!reply.data.is_empty()).then_some(reply.data)
    }
}

impl MonitorSource for X11Display {
    fn layout_changed(&self) -> bool {
        self.take_layout_change()
    }

    fn list(&self) -> Result<Vec<MonitorDescriptor>> {
        let resources = self
            .conn
            .randr_get_screen_resources_current(self.root)
            .context("Failed to query RandR screen resources")?
            .reply()
            .context("Failed to get RandR screen resources reply")?;
        let primary = self
            .conn
            .randr_get_output_primary(self.root)
            .context("Failed to query primary output")?
            .reply()
            .context("Failed to get primary output reply")?
            .output;

        let mut monitors = Vec::new();
        for &output in &resources.outputs {
            let info = self
                .conn
                .randr_get_output_info(output, resources.config_timestamp)
                .context("Failed to query output info")?
                .reply()
                .context("Failed to get output info reply")?;

            if info.connection != randr::Connection::CONNECTED || info.crtc == x11rb::NONE {
                continue;
            }

            let crtc = self
                .conn
                .randr_get_crtc_info(info.crtc, resources.config_timestamp)
                .context("Failed to query CRTC info")?
                .reply()
                .context("Failed to get CRTC info reply")?;

            let name = String::from_utf8_lossy(&info.name).into_owned();
            let edid = self.read_edid(output);
            debug!(
                "RandR output {} at {}x{}+{}+{} (edid: {})",
                name,
                crtc.width,
                crtc.height,
                crtc.x,
                crtc.y,
                edid.as_ref().map_or(0, Vec::len)
            );

            monitors.push(MonitorDescriptor {
                id: name.clone(),
                bounds: Bounds::new(
                    i32::from(crtc.x),
                    i32::from(crtc.y),
                    u32::from(crtc.width),
                    u32::from(crtc.height),
                ),
                is_primary: output == primary,
                native_handle: Some(NativeHandle::new(name, edid)),
            });
        }

        // Without an explicit primary, treat the output at the origin as primary
        if !monitors.iter().any(|m| m.is_primary) {
            if let Some(m) = monitors
                .iter_mut()
                .find(|m| m.bounds.x == 0 && m.bounds.y == 0)
            {
                m.is_primary = true;
            }
        }

        info!("Found {} active output(s)", monitors.len());
        Ok(monitors)
    }
}

impl PointerSource for X11Display {
    fn position(&self) -> Result<(i32, i32)> {
        let reply = self
            .conn
            .query_pointer(self.root)
            .context("Failed to query pointer")?
            .reply()
            .context("Failed to get pointer reply")?;
        Ok((i32::from(reply.root_x), i32::from(reply.root_y)))
    }
}
