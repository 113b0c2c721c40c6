/*!
 # BLE transport

 The trait seam between the connection logic and the Bluetooth stack,
 plus the production implementation on top of btleplug. The supervisor
 and command channel only ever talk to [`Transport`] / [`Connection`],
 which keeps them testable against a fake.
*/

use btleplug::api::{Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use std::time::Duration;
use tokio::time;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::{Error, Result};

/// The single GATT characteristic all command frames are written to
pub fn write_characteristic_uuid() -> Uuid {
    Uuid::parse_str("0000fff3-0000-1000-8000-00805f9b34fb").unwrap()
}

/// Poll cadence while a scan is running
const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Lowercased fragments of platform error messages that indicate the
/// Bluetooth radio itself is off or unavailable, across the locales the
/// application has been observed on. The numeric entry is the Windows
/// error code for a powered-off radio.
const BLUETOOTH_OFF_MARKERS: [&str; 6] = [
    "bluetooth adapter is off",
    "bluetooth is turned off",
    "org.bluez.error.notready",
    "das gerät kann nicht verwendet werden",
    "device not ready",
    "-2147020577",
];

/// Heuristically decides whether an error means the radio is off rather
/// than an ordinary connection failure
pub fn is_bluetooth_off_error(error: &btleplug::Error) -> bool {
    let message = error.to_string().to_lowercase();
    BLUETOOTH_OFF_MARKERS.iter().any(|m| message.contains(m))
}

/// Classifies a btleplug error into the crate taxonomy
fn classify(error: btleplug::Error) -> Error {
    if is_bluetooth_off_error(&error) {
        Error::BluetoothUnavailable
    } else {
        Error::Btleplug(error)
    }
}

/// A device found during discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredLamp {
    pub name: String,
    pub address: String,
}

/// A live link to one peripheral
#[allow(async_fn_in_trait)]
pub trait Connection: Send + Sync + 'static {
    /// Whether the transport still considers the link up
    async fn is_connected(&self) -> bool;
    /// Writes one command frame without waiting for a response
    async fn write(&self, frame: &[u8]) -> Result<()>;
    /// Tears the link down; tolerant of an already-dead link
    async fn disconnect(&self) -> Result<()>;
}

/// Factory for scans and connections
#[allow(async_fn_in_trait)]
pub trait Transport: Send + Sync + 'static {
    type Conn: Connection;

    /// One-shot discovery of named devices.
    ///
    /// Surfaces [`Error::BluetoothUnavailable`] when the radio is off so
    /// callers can prompt instead of silently retrying.
    async fn scan(&self, timeout: Duration) -> Result<Vec<DiscoveredLamp>>;

    /// Connects to a device by address and prepares it for writes
    async fn connect(&self, address: &str, timeout: Duration) -> Result<Self::Conn>;

    /// Fresh discovery filtered by display name, used to relocate a
    /// device whose address rotated
    async fn find_by_name(&self, name: &str, timeout: Duration) -> Result<Option<DiscoveredLamp>> {
        let lamps = self.scan(timeout).await?;
        Ok(lamps.into_iter().find(|l| l.name == name))
    }
}

/// Production transport over btleplug
pub struct BleTransport {
    adapter: Adapter,
}

impl BleTransport {
    /// Acquires the default Bluetooth adapter
    #[instrument]
    pub async fn new() -> Result<BleTransport> {
        debug!("Getting default Bluetooth adapter");
        let manager = Manager::new().await?;
        let mut adapters = manager.adapters().await?;
        if adapters.is_empty() {
            error!("No Bluetooth adapters found");
            return Err(Error::NoBluetoothAdapters);
        }
        Ok(BleTransport {
            adapter: adapters.remove(0),
        })
    }

    async fn poll_named_peripherals(&self) -> Result<Vec<(Peripheral, String)>> {
        let mut named = Vec::new();
        for p in self.adapter.peripherals().await.map_err(classify)? {
            if let Ok(Some(props)) = p.properties().await {
                if let Some(name) = props.local_name {
                    named.push((p, name));
                }
            }
        }
        Ok(named)
    }
}

impl Transport for BleTransport {
    type Conn = BleConnection;

    #[instrument(skip(self))]
    async fn scan(&self, timeout: Duration) -> Result<Vec<DiscoveredLamp>> {
        info!("Scanning for BLE devices...");
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(classify)?;

        let start = std::time::Instant::now();
        let mut found: Vec<DiscoveredLamp> = Vec::new();
        while start.elapsed() < timeout {
            for (p, name) in self.poll_named_peripherals().await? {
                let address = p.address().to_string();
                if !found.iter().any(|l| l.address == address) {
                    debug!("Found device: {} ({})", name, address);
                    found.push(DiscoveredLamp { name, address });
                }
            }
            time::sleep(SCAN_POLL_INTERVAL).await;
        }

        self.adapter.stop_scan().await.map_err(classify)?;
        info!("Scan finished, {} named devices", found.len());
        Ok(found)
    }

    #[instrument(skip(self))]
    async fn connect(&self, address: &str, timeout: Duration) -> Result<BleConnection> {
        let wanted = address.to_lowercase();
        let deadline = std::time::Instant::now() + timeout;

        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(classify)?;

        // Poll discovery until the wanted address (or platform id) shows up
        let peripheral = loop {
            let mut matched = None;
            for (p, _name) in self.poll_named_peripherals().await? {
                if p.address().to_string().to_lowercase() == wanted
                    || p.id().to_string().to_lowercase() == wanted
                {
                    matched = Some(p);
                    break;
                }
            }
            if let Some(p) = matched {
                break p;
            }
            if std::time::Instant::now() >= deadline {
                self.adapter.stop_scan().await.ok();
                warn!("Device {} not seen within {:?}", address, timeout);
                return Err(Error::DeviceNotFound(address.to_string()));
            }
            time::sleep(SCAN_POLL_INTERVAL).await;
        };

        self.adapter.stop_scan().await.ok();

        let remaining = deadline.saturating_duration_since(std::time::Instant::now());
        let handshake = async {
            if !peripheral.is_connected().await.map_err(classify)? {
                peripheral.connect().await.map_err(classify)?;
            }
            debug!("Discovering services...");
            peripheral.discover_services().await.map_err(classify)?;

            let uuid = write_characteristic_uuid();
            let characteristic = peripheral
                .characteristics()
                .into_iter()
                .find(|c| c.uuid == uuid)
                .ok_or_else(|| Error::CharacteristicNotFound(uuid.to_string()))?;
            Ok::<_, Error>(characteristic)
        };

        let characteristic = match time::timeout(remaining, handshake).await {
            Ok(result) => result?,
            Err(_) => {
                warn!("Handshake with {} timed out", address);
                // Leave nothing half-open behind
                peripheral.disconnect().await.ok();
                return Err(Error::ConnectTimeout(address.to_string()));
            }
        };

        info!("Connected to {}", address);
        Ok(BleConnection {
            peripheral,
            characteristic,
        })
    }
}

/// Live btleplug connection with the resolved write characteristic
pub struct BleConnection {
    peripheral: Peripheral,
    characteristic: Characteristic,
}

impl Connection for BleConnection {
    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    async fn write(&self, frame: &[u8]) -> Result<()> {
        self.peripheral
            .write(&self.characteristic, frame, WriteType::WithoutResponse)
            .await
            .map_err(|e| Error::Ble(e.to_string()))
    }

    async fn disconnect(&self) -> Result<()> {
        self.peripheral.disconnect().await.map_err(classify)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bluetooth_off_detected_from_localized_messages() {
        let cases = [
            "Bluetooth adapter is off",
            "Bluetooth is turned off",
            "org.bluez.Error.NotReady: resource not ready",
            "Das Gerät kann nicht verwendet werden",
            "OS error -2147020577",
        ];
        for message in cases {
            let error = btleplug::Error::RuntimeError(message.to_string());
            assert!(is_bluetooth_off_error(&error), "expected off: {message}");
        }
    }

    #[test]
    fn ordinary_failures_are_not_classified_as_radio_off() {
        let error = btleplug::Error::RuntimeError("connection refused".to_string());
        assert!(!is_bluetooth_off_error(&error));
        assert!(!is_bluetooth_off_error(&btleplug::Error::DeviceNotFound));
    }

    #[test]
    fn classification_maps_to_distinct_error_kind() {
        let off = classify(btleplug::Error::RuntimeError(
            "bluetooth is turned off".to_string(),
        ));
        assert!(matches!(off, Error::BluetoothUnavailable));
        let other = classify(btleplug::Error::DeviceNotFound);
        assert!(matches!(other, Error::Btleplug(_)));
    }
}
