// SPDX-License-Identifier: GPL-3.0-only

#[macro_use]
extern crate tracing;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use monitors_focus::app::{self, App};
use monitors_focus::config::{DimmingMode, Overrides, Settings};
use monitors_focus::dimming::HardwareDimmer;
use monitors_focus::hotplug;
use monitors_focus::monitor::x11::X11Display;
use monitors_focus::overlay::x11::X11MaskFactory;
use monitors_focus::protocols::backlight::Backlight;
use monitors_focus::protocols::ddc_ci::DdcCiBus;

#[derive(Parser, Debug)]
#[command(name = "monitors-focus", version, about = "Dim the monitors you are not looking at")]
struct Args {
    /// Settings file (defaults to ~/.config/monitors-focus/settings.json)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Probe hardware dimming support, print it and exit
    #[arg(long)]
    status: bool,

    /// Idle seconds before a monitor is masked
    #[arg(long, value_name = "SECONDS")]
    delay: Option<u32>,

    /// Mask opacity in percent
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
    opacity: Option<u8>,

    /// auto, overlay or hardware
    #[arg(long)]
    mode: Option<DimmingMode>,
}

fn setup_logs() {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let fmt_layer = fmt::layer().with_target(false);
    let filter_layer = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,{}=info", env!("CARGO_CRATE_NAME"))));

    if let Ok(journal_layer) = tracing_journald::layer() {
        tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .with(journal_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logs();
    let args = Args::parse();

    let settings_path = args.config.unwrap_or_else(Settings::default_path);
    let overrides = Overrides {
        delay_seconds: args.delay,
        overlay_opacity: args.opacity,
        dimming_mode: args.mode,
    };
    let mut settings = Settings::load(&settings_path);
    settings.apply(&overrides);
    info!("Starting with {:?}", settings);

    let display = X11Display::connect()?;
    let backlight = Backlight::discover();
    if let Some(name) = backlight.device_name() {
        info!("Backlight device: {}", name);
    }
    let mut dimmer = HardwareDimmer::new(Arc::new(DdcCiBus::new()), Arc::new(backlight));

    if args.status {
        let rows = app::probe_status(&display, &mut dimmer, &settings).await?;
        for row in rows {
            let message = row.message.as_deref().unwrap_or("");
            let enabled = if row.enabled { "" } else { " (disabled)" };
            println!("{:<12} {:<20} {}{}", row.id, row.status, message, enabled);
        }
        return Ok(());
    }

    let factory = X11MaskFactory::new(&display).context("Failed to set up mask windows")?;
    let hotplug = hotplug::spawn();

    App::new(display, factory, dimmer, settings, settings_path, overrides)
        .run(hotplug)
        .await
}
