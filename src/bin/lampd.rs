//! Long-running daemon: keeps the lamp connected and drives it from the
//! active schedule profiles.
//!
//! One instance per user: an exclusive advisory lock on a file in the
//! config directory makes a second launch exit instead of starting a
//! second connection supervisor.

use chrono::{Local, NaiveDate};
use clap::Parser;
use color_eyre::eyre::{eyre, Result};
use fs2::FileExt;
use lamp_scheduler::settings::{config_dir, SettingsStore, CUSTOM_COLORS_FILE};
use lamp_scheduler::sun::SunTimes;
use lamp_scheduler::{
    BleTransport, CommandChannel, ConnectionState, ConnectionSupervisor, Error, LampClient,
    Outcome, Palette, ScheduleEngine, SunCalculator, SupervisorConfig,
};
use parking_lot::Mutex;
use std::fs::File;
use std::sync::Arc;
use tokio::time::{Duration, MissedTickBehavior};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const LOCK_FILE: &str = "lampd.lock";

#[derive(Parser)]
#[command(author, version, about = "Connection and schedule daemon for the lamp")]
struct Cli {
    /// Schedule evaluation interval in seconds
    #[arg(long, default_value_t = 30)]
    tick: u64,
}

/// What the schedule tick last pushed to the lamp
#[derive(Debug, Clone, PartialEq, Eq)]
enum Applied {
    Color(String),
    Off,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("RUST_LOG")
                .unwrap_or_else(|_| EnvFilter::new("lamp_scheduler=info,lampd=info")),
        )
        .compact()
        .init();

    color_eyre::install()?;

    let cli = Cli::parse();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)?;

    // Single instance guard; the lock is held for the process lifetime
    let lock_file = File::create(dir.join(LOCK_FILE))?;
    if lock_file.try_lock_exclusive().is_err() {
        return Err(eyre!(Error::AlreadyRunning));
    }

    let settings = Arc::new(Mutex::new(SettingsStore::load(&dir)));
    let (device_name, device_address) = settings
        .lock()
        .last_device()
        .ok_or(Error::NoDeviceSelected)?;
    if settings.lock().get_bool("auto_connect_on_startup") == Some(false) {
        debug!("auto_connect_on_startup is disabled; connecting anyway on explicit launch");
    }

    let transport = BleTransport::new().await?;
    let client = Arc::new(LampClient::new(transport));

    let settings_for_rotation = settings.clone();
    let supervisor = Arc::new(
        ConnectionSupervisor::new(
            client.clone(),
            &device_name,
            &device_address,
            SupervisorConfig::default(),
        )
        .with_address_callback(Box::new(move |name, address| {
            settings_for_rotation.lock().set_last_device(name, address);
        })),
    );
    let cancel = supervisor.cancel_token();
    let state_rx = supervisor.state_receiver();
    let supervisor_task = {
        let supervisor = supervisor.clone();
        tokio::spawn(async move { supervisor.run().await })
    };

    let palette = Palette::load(dir.join(CUSTOM_COLORS_FILE));
    let channel = CommandChannel::new(client.clone());
    let location = SunCalculator::new().locate().await;
    info!(
        "Sun location: lat={:.4}, lon={:.4}{}",
        location.latitude,
        location.longitude,
        if location.located { "" } else { " (fallback)" }
    );

    let mut interval = tokio::time::interval(Duration::from_secs(cli.tick.max(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut sun_cache: Option<(NaiveDate, SunTimes)> = None;
    let mut last_applied: Option<Applied> = None;
    let mut was_connected = false;

    info!("Schedule tick running every {}s", cli.tick.max(1));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            _ = interval.tick() => {}
        }

        let connected = *state_rx.borrow() == ConnectionState::Connected;
        if !connected {
            was_connected = false;
            continue;
        }
        if !was_connected {
            // Fresh connection: reapply brightness and force a resend of
            // whatever the schedule resolves to
            was_connected = true;
            last_applied = None;
            let level = settings.lock().get_i64("brightness_level").unwrap_or(80) as u8;
            if let Err(e) = channel.send_brightness(level).await {
                warn!("Failed to restore brightness: {}", e);
                was_connected = false;
                continue;
            }
        }

        let now = Local::now();
        let today = now.date_naive();
        let sun = match &sun_cache {
            Some((date, sun)) if *date == today => *sun,
            _ => {
                let sun = SunTimes::compute(&location, today);
                debug!(
                    "Sun times for {}: sunrise={:?}, sunset={:?}",
                    today,
                    sun.sunrise.map(|t| t.format("%H:%M").to_string()),
                    sun.sunset.map(|t| t.format("%H:%M").to_string()),
                );
                sun_cache = Some((today, sun));
                sun
            }
        };

        // Reload each tick so edits made through lampc are picked up
        let engine = ScheduleEngine::load(&dir, &palette);
        let (wanted, color) = match engine.evaluate(&palette, now, &sun) {
            Outcome::Active(color) => (Applied::Color(color.name.clone()), Some(color)),
            Outcome::Off => (Applied::Off, None),
            Outcome::NoSchedule => continue,
        };
        if last_applied.as_ref() == Some(&wanted) {
            continue;
        }

        let result = match &color {
            Some(color) => {
                info!("Schedule resolved to color '{}'", color.name);
                channel.send_color(color).await
            }
            None => {
                info!("Schedule resolved to off");
                channel.send_power(false).await
            }
        };
        match result {
            Ok(()) => last_applied = Some(wanted),
            Err(e) => {
                // The supervisor notices the dropped link on its own; retry
                // after it reconnects
                warn!("Failed to apply schedule state: {}", e);
                last_applied = None;
            }
        }
    }

    cancel.cancel();
    if let Err(e) = supervisor_task.await {
        warn!("Supervisor task ended abnormally: {}", e);
    }
    info!("Daemon stopped");
    Ok(())
}
