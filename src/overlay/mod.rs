// SPDX-License-Identifier: GPL-3.0-only
//! On-screen dimming masks
//!
//! A mask is an always-on-top, click-through translucent window covering one
//! monitor. The masking state machine only ever shows, hides, or re-tints it.

pub mod x11;

use anyhow::Result;

use crate::monitor::MonitorDescriptor;

pub trait VisualMask {
    fn show(&mut self) -> Result<()>;
    fn hide(&mut self) -> Result<()>;
    fn set_opacity(&mut self, percent: u8) -> Result<()>;
}

/// Creates one mask per monitor, sized to its bounds
pub trait MaskFactory {
    fn create(&mut self, monitor: &MonitorDescriptor, opacity_percent: u8) -> Result<Box<dyn VisualMask>>;
}

/// Window opacity for a percentage; fully opaque is capped just below 1.0
/// so compositors keep treating the window as translucent
pub fn opacity_fraction(percent: u8) -> f64 {
    match percent.min(100) {
        100 => 0.999,
        p => f64::from(p) / 100.0,
    }
}

#[cfg(test)]
pub(crate) mod recording {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    /// Shared log of mask calls, `"<id>:<op>"`
    pub type CallLog = Rc<RefCell<Vec<String>>>;

    pub struct RecordingMask {
        id: String,
        log: CallLog,
        pub visible: Rc<RefCell<bool>>,
    }

    impl VisualMask for RecordingMask {
        fn show(&mut self) -> Result<()> {
            *self.visible.borrow_mut() = true;
            self.log.borrow_mut().push(format!("{}:show", self.id));
            Ok(())
        }

        fn hide(&mut self) -> Result<()> {
            *self.visible.borrow_mut() = false;
            self.log.borrow_mut().push(format!("{}:hide", self.id));
            Ok(())
        }

        fn set_opacity(&mut self, percent: u8) -> Result<()> {
            self.log.borrow_mut().push(format!("{}:opacity={}", self.id, percent));
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct RecordingFactory {
        pub log: CallLog,
        pub fail_for: Option<String>,
    }

    impl MaskFactory for RecordingFactory {
        fn create(&mut self, monitor: &MonitorDescriptor, opacity_percent: u8) -> Result<Box<dyn VisualMask>> {
            if self.fail_for.as_deref() == Some(monitor.id.as_str()) {
                anyhow::bail!("cannot create window");
            }
            self.log
                .borrow_mut()
                .push(format!("{}:create opacity={}", monitor.id, opacity_percent));
            Ok(Box::new(RecordingMask {
                id: monitor.id.clone(),
                log: self.log.clone(),
                visible: Rc::new(RefCell::new(false)),
            }))
        }
    }
}
