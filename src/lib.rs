// SPDX-License-Identifier: GPL-3.0-only
//! Dim every monitor the pointer is not on
//!
//! Idle monitors get a translucent click-through mask and, where the panel
//! allows it, a hardware backlight reduction over DDC/CI or the sysfs
//! backlight.

#[macro_use]
extern crate tracing;

pub mod app;
pub mod config;
pub mod dimming;
pub mod error;
pub mod hotplug;
pub mod masking;
pub mod monitor;
pub mod overlay;
pub mod protocols;
