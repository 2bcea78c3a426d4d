// SPDX-License-Identifier: GPL-3.0-only
//! Override-redirect X11 windows used as dimming masks

use std::sync::Arc;

use anyhow::{Context, Result};
use x11rb::connection::Connection;
use x11rb::protocol::shape::{self, ConnectionExt as ShapeExt};
use x11rb::protocol::xproto::{
    Atom, AtomEnum, ClipOrdering, ConfigureWindowAux, ConnectionExt as XprotoExt, CreateWindowAux, PropMode,
    StackMode, Window, WindowClass,
};
use x11rb::rust_connection::RustConnection;
use x11rb::wrapper::ConnectionExt as WrapperExt;

use super::{MaskFactory, VisualMask, opacity_fraction};
use crate::monitor::MonitorDescriptor;
use crate::monitor::x11::X11Display;

const OVERRIDE_REDIRECT: u32 = 1;
/// Pixel value for black on TrueColor visuals
const BLACK_PIXEL: u32 = 0;

fn opacity_value(percent: u8) -> u32 {
    (opacity_fraction(percent) * f64::from(u32::MAX)) as u32
}

pub struct X11Mask {
    conn: Arc<RustConnection>,
    window: Window,
    opacity_atom: Atom,
    visible: bool,
}

impl VisualMask for X11Mask {
    fn show(&mut self) -> Result<()> {
        if !self.visible {
            self.conn.map_window(self.window).context("Failed to map mask window")?;
            self.visible = true;
        }
        self.conn
            .configure_window(self.window, &ConfigureWindowAux::new().stack_mode(StackMode::ABOVE))
            .context("Failed to raise mask window")?;
        self.conn.flush().context("Failed to flush X11 connection")?;
        Ok(())
    }

    fn hide(&mut self) -> Result<()> {
        if self.visible {
            self.conn.unmap_window(self.window).context("Failed to unmap mask window")?;
            self.conn.flush().context("Failed to flush X11 connection")?;
            self.visible = false;
        }
        Ok(())
    }

    fn set_opacity(&mut self, percent: u8) -> Result<()> {
        self.conn
            .change_property32(
                PropMode::REPLACE,
                self.window,
                self.opacity_atom,
                AtomEnum::CARDINAL,
                &[opacity_value(percent)],
            )
            .context("Failed to set mask opacity")?;
        self.conn.flush().context("Failed to flush X11 connection")?;
        Ok(())
    }
}

impl Drop for X11Mask {
    fn drop(&mut self) {
        let _ = self.conn.destroy_window(self.window);
        let _ = self.conn.flush();
    }
}

pub struct X11MaskFactory {
    conn: Arc<RustConnection>,
    root: Window,
    depth: u8,
    visual: u32,
    opacity_atom: Atom,
}

impl X11MaskFactory {
    pub fn new(display: &X11Display) -> Result<Self> {
        let conn = display.connection();
        conn.shape_query_version()
            .context("Failed to query SHAPE version")?
            .reply()
            .context("SHAPE extension not available")?;
        let opacity_atom = conn
            .intern_atom(false, b"_NET_WM_WINDOW_OPACITY")
            .context("Failed to intern _NET_WM_WINDOW_OPACITY atom")?
            .reply()
            .context("Failed to get reply for _NET_WM_WINDOW_OPACITY atom")?
            .atom;

        Ok(Self {
            conn,
            root: display.root(),
            depth: display.root_depth(),
            visual: display.root_visual(),
            opacity_atom,
        })
    }
}

impl MaskFactory for X11MaskFactory {
    fn create(&mut self, monitor: &MonitorDescriptor, opacity_percent: u8) -> Result<Box<dyn VisualMask>> {
        let b = monitor.bounds;
        let window = self.conn.generate_id().context("Failed to generate X11 window ID")?;
        self.conn
            .create_window(
                self.depth,
                window,
                self.root,
                b.x as i16,
                b.y as i16,
                b.width.clamp(1, u32::from(u16::MAX)) as u16,
                b.height.clamp(1, u32::from(u16::MAX)) as u16,
                0,
                WindowClass::INPUT_OUTPUT,
                self.visual,
                &CreateWindowAux::new()
                    .override_redirect(OVERRIDE_REDIRECT)
                    .background_pixel(BLACK_PIXEL),
            )
            .with_context(|| format!("Failed to create mask window for {}", monitor.id))?;

        // Empty input region: pointer events fall through to whatever is below
        self.conn
            .shape_rectangles(shape::SO::SET, shape::SK::INPUT, ClipOrdering::UNSORTED, window, 0, 0, &[])
            .with_context(|| format!("Failed to make mask for {} click-through", monitor.id))?;

        let mut mask = X11Mask {
            conn: Arc::clone(&self.conn),
            window,
            opacity_atom: self.opacity_atom,
            visible: false,
        };
        mask.set_opacity(opacity_percent)?;
        debug!(monitor = %monitor.id, "created mask window {}", window);
        Ok(Box::new(mask))
    }
}
