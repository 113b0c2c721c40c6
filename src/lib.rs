/*!
 # Bluetooth LED Lamp Scheduler

 A Rust library for controlling an ELK-BLEDOM style Bluetooth LED lamp and
 driving it from named weekly schedule profiles, including sunrise/sunset
 relative triggers.

 ## Features

 * Resilient connection maintenance (retry, rescan by name, keep-alive ping)
 * Named, independently activatable weekly schedule profiles
 * Sunrise/sunset relative on/off instants with signed minute offsets
 * Conflict detection between active profiles
 * Built-in palette plus persisted custom colors
 * Timeline projection of schedules for rendering

 ## Example

 ```rust,no_run
 use lamp_scheduler::channel::CommandChannel;
 use lamp_scheduler::client::LampClient;
 use lamp_scheduler::protocol::Palette;
 use lamp_scheduler::transport::BleTransport;
 use std::sync::Arc;
 use std::time::Duration;

 #[tokio::main]
 async fn main() -> Result<(), lamp_scheduler::Error> {
     tracing_subscriber::fmt::init();

     let transport = BleTransport::new().await?;
     let client = Arc::new(LampClient::new(transport));
     client.connect_with_retry("AA:BB:CC:DD:EE:FF", 3, Duration::from_secs(1)).await?;

     let palette = Palette::builtin();
     let channel = CommandChannel::new(client.clone());
     channel.send_color(palette.find("Piros").unwrap()).await?;
     channel.send_brightness(80).await?;

     client.disconnect().await;
     Ok(())
 }
 ```
*/

use thiserror::Error;

/// Custom error types for the lamp scheduler library
#[derive(Error, Debug)]
pub enum Error {
    /// No Bluetooth adapters found
    #[error("No Bluetooth adapters found")]
    NoBluetoothAdapters,

    /// The Bluetooth radio itself is off or unavailable
    #[error("Bluetooth is turned off or unavailable. Enable it and try again")]
    BluetoothUnavailable,

    /// Scan finished without locating the requested device
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Failed to find required BLE characteristic
    #[error("Could not find required BLE characteristic: {0}")]
    CharacteristicNotFound(String),

    /// Command issued without a live connection
    #[error("Cannot send command: not connected to device")]
    NotConnected,

    /// Connection attempt did not complete within its timeout
    #[error("Connection to {0} timed out")]
    ConnectTimeout(String),

    /// BLE communication error
    #[error("BLE communication error: {0}")]
    Ble(String),

    /// Schedule edit carried an unparsable HH:MM value
    #[error("Invalid {field} for '{day}': '{value}' is not a valid HH:MM time")]
    InvalidTime {
        day: String,
        field: &'static str,
        value: String,
    },

    /// Color definition carried an unparsable hex code
    #[error("Invalid hex color: {0}")]
    InvalidColor(String),

    /// Custom color name collides with an existing palette entry
    #[error("A color named '{0}' already exists")]
    DuplicateColor(String),

    /// Color name not present in the merged palette
    #[error("Unknown color: {0}")]
    UnknownColor(String),

    /// Built-in palette entries cannot be removed
    #[error("'{0}' is a built-in color and cannot be removed")]
    BuiltinColor(String),

    /// Profile name already taken
    #[error("A profile named '{0}' already exists")]
    DuplicateProfile(String),

    /// Profile name not present in the collection
    #[error("Unknown profile: {0}")]
    UnknownProfile(String),

    /// The default profile cannot be deleted
    #[error("The default profile '{0}' cannot be deleted")]
    ProtectedProfile(String),

    /// Activation refused because the profile overlaps active ones
    #[error("Profile '{name}' conflicts with: {}", conflicts.join(", "))]
    ProfileConflicts { name: String, conflicts: Vec<String> },

    /// No remembered or explicitly selected device
    #[error("No device selected. Scan and select a device first")]
    NoDeviceSelected,

    /// Another daemon instance already holds the lock file
    #[error("Another instance is already running")]
    AlreadyRunning,

    /// Error from btleplug
    #[error(transparent)]
    Btleplug(#[from] btleplug::Error),

    /// Filesystem error from one of the stores
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// HTTP error from a geolocation provider
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

// Re-export modules
pub mod channel;
pub mod client;
pub mod protocol;
pub mod schedule;
pub mod settings;
pub mod sun;
pub mod supervisor;
pub mod timeline;
pub mod transport;

// Re-export key types
pub use channel::CommandChannel;
pub use client::{ActivityClock, LampClient};
pub use protocol::{Color, Palette};
pub use schedule::{DaySchedule, Outcome, Profile, ScheduleEngine, WeekSchedule, DAYS};
pub use sun::{Location, SunCalculator, SunTimes};
pub use supervisor::{ConnectionState, ConnectionSupervisor, SupervisorConfig};
pub use transport::{BleTransport, Connection, DiscoveredLamp, Transport};
