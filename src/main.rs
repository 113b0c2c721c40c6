use chrono::Local;
use clap::{Parser, Subcommand};
use color_eyre::eyre::{bail, Result};
use lamp_scheduler::settings::{config_dir, SettingsStore, CUSTOM_COLORS_FILE};
use lamp_scheduler::sun::{sun_times, SunCalculator};
use lamp_scheduler::timeline::{active_day_intervals, profile_day_intervals};
use lamp_scheduler::{
    BleTransport, Color, CommandChannel, DaySchedule, Error, LampClient, Palette, ScheduleEngine,
    DAYS,
};
use serde_json::Value;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for nearby BLE devices
    Scan {
        /// Scan duration in seconds
        #[arg(short, long, default_value_t = 15)]
        timeout: u64,
        /// Remember the device with this name for later commands
        #[arg(short, long)]
        select: Option<String>,
    },
    /// Show the remembered device and stored settings
    Status,
    /// Turn the lamp on (replays the last color)
    On,
    /// Turn the lamp off
    Off,
    /// Set a palette color by name
    Color {
        /// Color name, e.g. "Piros"
        name: String,
    },
    /// Set a raw color from a hex code
    Hex {
        /// Color as #rrggbb
        hex: String,
    },
    /// Set brightness
    Brightness {
        /// Brightness level (0-100)
        #[arg(short, long, default_value_t = 100)]
        level: u8,
    },
    /// List the color palette
    Colors,
    /// Add a custom color to the palette
    ColorAdd {
        /// Unique color name
        name: String,
        /// Color as #rrggbb
        hex: String,
    },
    /// Remove a custom color from the palette
    ColorRemove {
        /// Color name
        name: String,
    },
    /// List schedule profiles
    Profiles,
    /// Create a new (inactive) profile
    ProfileAdd {
        /// Unique profile name
        name: String,
    },
    /// Delete a profile
    ProfileDelete {
        /// Profile name
        name: String,
    },
    /// Activate a profile, refusing on conflicts with active ones
    Activate {
        /// Profile name
        name: String,
    },
    /// Deactivate a profile
    Deactivate {
        /// Profile name
        name: String,
    },
    /// Edit one weekday of a profile's schedule
    SetDay {
        /// Profile name
        profile: String,
        /// Weekday name, e.g. "Hétfő"
        day: String,
        /// Reset the day to a blank rule before applying other options
        #[arg(long)]
        clear: bool,
        /// Color name for the day
        #[arg(long)]
        color: Option<String>,
        /// On time as HH:MM, empty to unset
        #[arg(long)]
        on: Option<String>,
        /// Off time as HH:MM, empty to unset
        #[arg(long)]
        off: Option<String>,
        /// Use sunrise as the on instant instead of --on
        #[arg(long)]
        sunrise: Option<bool>,
        /// Signed minute offset applied to sunrise
        #[arg(long)]
        sunrise_offset: Option<i32>,
        /// Use sunset as the off instant instead of --off
        #[arg(long)]
        sunset: Option<bool>,
        /// Signed minute offset applied to sunset
        #[arg(long)]
        sunset_offset: Option<i32>,
        /// Second on time as HH:MM, empty to unset
        #[arg(long)]
        on2: Option<String>,
        /// Second off time as HH:MM, empty to unset
        #[arg(long)]
        off2: Option<String>,
    },
    /// Print a profile's weekly timeline (all active profiles by default)
    Timeline {
        /// Limit to one profile
        #[arg(short, long)]
        profile: Option<String>,
    },
    /// Show today's sunrise and sunset for the resolved location
    Sun,
    /// Change stored settings
    Config {
        /// Connect to the remembered device when the daemon starts
        #[arg(long)]
        auto_connect: Option<bool>,
        /// Launch the daemon when the system starts
        #[arg(long)]
        start_with_system: Option<bool>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("RUST_LOG")
                .unwrap_or_else(|_| EnvFilter::new("lamp_scheduler=info,lampc=info")),
        )
        .compact()
        .init();

    color_eyre::install()?;

    let cli = Cli::parse();
    let dir = config_dir();
    debug!("Config directory: {}", dir.display());

    match cli.command {
        Commands::Scan { timeout, select } => {
            let transport = BleTransport::new().await?;
            let client = LampClient::new(transport);
            let lamps = client.scan(Duration::from_secs(timeout)).await?;
            if lamps.is_empty() {
                println!("No named devices found");
            }
            for lamp in &lamps {
                println!("{}  {}", lamp.address, lamp.name);
            }
            if let Some(name) = select {
                let Some(lamp) = lamps.iter().find(|l| l.name == name) else {
                    bail!("no device named '{name}' was found");
                };
                let mut settings = SettingsStore::load(&dir);
                settings.set_last_device(&lamp.name, &lamp.address);
                println!("Remembered '{}' ({})", lamp.name, lamp.address);
            }
        }
        Commands::Status => {
            let settings = SettingsStore::load(&dir);
            match settings.last_device() {
                Some((name, address)) => println!("Device: {name} ({address})"),
                None => println!("Device: none selected"),
            }
            println!(
                "Brightness: {}%",
                settings.get_i64("brightness_level").unwrap_or(80)
            );
            println!(
                "Auto-connect on startup: {}",
                settings.get_bool("auto_connect_on_startup").unwrap_or(true)
            );
            let palette = Palette::load(dir.join(CUSTOM_COLORS_FILE));
            let engine = ScheduleEngine::load(&dir, &palette);
            println!("Profiles:");
            for (name, profile) in engine.profiles() {
                let marker = if profile.active { "active" } else { "inactive" };
                println!("  {name} ({marker})");
            }
        }
        Commands::On => {
            let (client, channel) = open_channel(&dir).await?;
            channel.send_power(true).await?;
            client.disconnect().await;
        }
        Commands::Off => {
            let (client, channel) = open_channel(&dir).await?;
            channel.send_power(false).await?;
            client.disconnect().await;
        }
        Commands::Color { name } => {
            let palette = Palette::load(dir.join(CUSTOM_COLORS_FILE));
            let color = palette
                .find(&name)
                .ok_or_else(|| Error::UnknownColor(name.clone()))?
                .clone();
            let (client, channel) = open_channel(&dir).await?;
            channel.send_color(&color).await?;
            client.disconnect().await;
        }
        Commands::Hex { hex } => {
            let color = Color::new("", &hex)?;
            let (client, channel) = open_channel(&dir).await?;
            channel.send_color(&color).await?;
            client.disconnect().await;
        }
        Commands::Brightness { level } => {
            let (client, channel) = open_channel(&dir).await?;
            channel.send_brightness(level).await?;
            client.disconnect().await;
            let mut settings = SettingsStore::load(&dir);
            settings.set("brightness_level", Value::from(level.min(100)));
        }
        Commands::Colors => {
            let palette = Palette::load(dir.join(CUSTOM_COLORS_FILE));
            for color in palette.colors() {
                println!("{}  {}", color.hex, color.name);
            }
        }
        Commands::ColorAdd { name, hex } => {
            let mut palette = Palette::load(dir.join(CUSTOM_COLORS_FILE));
            palette.add_custom(&name, &hex)?;
            println!("Added color '{name}'");
        }
        Commands::ColorRemove { name } => {
            let mut palette = Palette::load(dir.join(CUSTOM_COLORS_FILE));
            palette.remove_custom(&name)?;
            println!("Removed color '{name}'");
        }
        Commands::Profiles => {
            let palette = Palette::load(dir.join(CUSTOM_COLORS_FILE));
            let engine = ScheduleEngine::load(&dir, &palette);
            for (name, profile) in engine.profiles() {
                let marker = if profile.active { "*" } else { " " };
                let days: Vec<&str> = DAYS
                    .iter()
                    .filter(|day| profile.schedule.get(**day).is_some_and(has_any_rule))
                    .copied()
                    .collect();
                println!("{marker} {name}: {}", days.join(", "));
            }
        }
        Commands::ProfileAdd { name } => {
            let palette = Palette::load(dir.join(CUSTOM_COLORS_FILE));
            let mut engine = ScheduleEngine::load(&dir, &palette);
            engine.add_profile(&name, &palette)?;
            println!("Created profile '{name}'");
        }
        Commands::ProfileDelete { name } => {
            let palette = Palette::load(dir.join(CUSTOM_COLORS_FILE));
            let mut engine = ScheduleEngine::load(&dir, &palette);
            engine.delete_profile(&name)?;
            println!("Deleted profile '{name}'");
        }
        Commands::Activate { name } => {
            let palette = Palette::load(dir.join(CUSTOM_COLORS_FILE));
            let mut engine = ScheduleEngine::load(&dir, &palette);
            engine.set_active(&name, true)?;
            println!("Activated profile '{name}'");
        }
        Commands::Deactivate { name } => {
            let palette = Palette::load(dir.join(CUSTOM_COLORS_FILE));
            let mut engine = ScheduleEngine::load(&dir, &palette);
            engine.set_active(&name, false)?;
            println!("Deactivated profile '{name}'");
        }
        Commands::SetDay {
            profile,
            day,
            clear,
            color,
            on,
            off,
            sunrise,
            sunrise_offset,
            sunset,
            sunset_offset,
            on2,
            off2,
        } => {
            if !DAYS.contains(&day.as_str()) {
                bail!("unknown day '{}', expected one of: {}", day, DAYS.join(", "));
            }
            let palette = Palette::load(dir.join(CUSTOM_COLORS_FILE));
            let mut engine = ScheduleEngine::load(&dir, &palette);
            let mut schedule = engine
                .get(&profile)
                .ok_or_else(|| Error::UnknownProfile(profile.clone()))?
                .schedule
                .clone();
            {
                let entry = schedule.get_mut(&day).expect("all seven days are present");
                if clear {
                    *entry = DaySchedule::blank(palette.first_color_name().unwrap_or(""));
                }
                if let Some(color) = color {
                    if palette.find(&color).is_none() {
                        bail!("unknown color '{color}'");
                    }
                    entry.color = color;
                }
                if let Some(on) = on {
                    entry.on_time = on;
                }
                if let Some(off) = off {
                    entry.off_time = off;
                }
                if let Some(sunrise) = sunrise {
                    entry.sunrise = sunrise;
                }
                if let Some(offset) = sunrise_offset {
                    entry.sunrise_offset = offset;
                }
                if let Some(sunset) = sunset {
                    entry.sunset = sunset;
                }
                if let Some(offset) = sunset_offset {
                    entry.sunset_offset = offset;
                }
                if let Some(on2) = on2 {
                    entry.on_time_2 = on2;
                }
                if let Some(off2) = off2 {
                    entry.off_time_2 = off2;
                }
            }
            engine.update_schedule(&profile, schedule)?;
            println!("Updated {day} of '{profile}'");
        }
        Commands::Timeline { profile } => {
            let palette = Palette::load(dir.join(CUSTOM_COLORS_FILE));
            let engine = ScheduleEngine::load(&dir, &palette);
            let location = SunCalculator::new().locate().await;
            let today = Local::now().date_naive();
            let intervals = match profile {
                Some(name) => {
                    let profile = engine
                        .get(&name)
                        .ok_or_else(|| Error::UnknownProfile(name.clone()))?;
                    profile_day_intervals(profile, &palette, &location, today)
                }
                None => active_day_intervals(&engine, &palette, &location, today),
            };
            for day in DAYS {
                let entries: Vec<String> = intervals[day]
                    .iter()
                    .map(|(start, end, hex)| {
                        format!("{}-{} {hex}", fmt_minutes(*start), fmt_minutes(*end))
                    })
                    .collect();
                println!("{day}: {}", entries.join("  "));
            }
        }
        Commands::Config {
            auto_connect,
            start_with_system,
        } => {
            let mut settings = SettingsStore::load(&dir);
            if let Some(value) = auto_connect {
                settings.set("auto_connect_on_startup", Value::from(value));
            }
            if let Some(value) = start_with_system {
                settings.set("start_with_system", Value::from(value));
            }
            println!(
                "Auto-connect on startup: {}",
                settings.get_bool("auto_connect_on_startup").unwrap_or(true)
            );
            println!(
                "Start with system: {}",
                settings.get_bool("start_with_system").unwrap_or(false)
            );
        }
        Commands::Sun => {
            let location = SunCalculator::new().locate().await;
            println!(
                "Location: lat={:.4}, lon={:.4}{}",
                location.latitude,
                location.longitude,
                if location.located { "" } else { " (fallback)" }
            );
            let today = Local::now().date_naive();
            match sun_times(location.latitude, location.longitude, today) {
                Some((sunrise, sunset)) => {
                    println!("Sunrise: {}", sunrise.format("%H:%M"));
                    println!("Sunset:  {}", sunset.format("%H:%M"));
                }
                None => println!("Sun times are unavailable for this location"),
            }
        }
    }

    Ok(())
}

/// Connects to the remembered device and wraps it in a command channel
async fn open_channel(
    dir: &std::path::Path,
) -> Result<(Arc<LampClient<BleTransport>>, CommandChannel<BleTransport>)> {
    let settings = SettingsStore::load(dir);
    let (name, address) = settings.last_device().ok_or(Error::NoDeviceSelected)?;
    let transport = BleTransport::new().await?;
    let client = Arc::new(LampClient::new(transport));
    info!("Connecting to '{}' ({})", name, address);
    client
        .connect_with_retry(&address, 3, Duration::from_secs(1))
        .await?;
    Ok((client.clone(), CommandChannel::new(client)))
}

fn has_any_rule(day: &DaySchedule) -> bool {
    day.sunrise
        || day.sunset
        || !day.on_time.is_empty()
        || !day.off_time.is_empty()
        || !day.on_time_2.is_empty()
        || !day.off_time_2.is_empty()
}

fn fmt_minutes(minutes: u32) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}
