/*!
 # Connection supervisor

 The long-running loop that keeps the lamp reachable: connect with
 bounded retries, rescan by display name when the device's address
 rotated, keep-alive pings while connected, and cooperative shutdown.

 The loop is an explicit state machine rather than per-branch retry
 code; every error funnels through one classification point and ends up
 in the same backoff/rescan path. Cancellation is observed at every
 iteration boundary and inside every sleep, so stop latency is bounded
 by one tick or one backoff delay.
*/

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::client::LampClient;
use crate::protocol::KEEP_ALIVE_FRAME;
use crate::transport::Transport;
use crate::Error;

/// Connection status mirrored to observers. Owned exclusively by the
/// supervisor; reads are eventually-consistent snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// Timing knobs of the maintenance loop
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Handshake timeout for one connection attempt
    pub connect_timeout: Duration,
    /// Delay between bounded connection attempts
    pub reconnect_delay: Duration,
    /// Consecutive failures before falling back to a rescan
    pub max_connect_attempts: u32,
    /// Discovery timeout of a rescan pass
    pub rescan_timeout: Duration,
    /// Delay between rescan passes while the device stays missing
    pub rescan_delay: Duration,
    /// Idle tick while connected
    pub loop_sleep: Duration,
    /// Ping when nothing was sent for this long
    pub ping_interval: Duration,
    /// Ping sooner once user interaction has gone quiet for this long
    pub inactivity_ping_threshold: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        SupervisorConfig {
            connect_timeout: Duration::from_secs(15),
            reconnect_delay: Duration::from_secs(1),
            max_connect_attempts: 3,
            rescan_timeout: Duration::from_secs(15),
            rescan_delay: Duration::from_secs(5),
            loop_sleep: Duration::from_millis(500),
            ping_interval: Duration::from_secs(20),
            inactivity_ping_threshold: Duration::from_secs(5),
        }
    }
}

/// Invoked when a rescan relocates the device at a new address, so the
/// remembered device can be persisted
pub type AddressChanged = Box<dyn Fn(&str, &str) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Scanning,
    Connecting,
    Connected,
    BackoffWait,
    Rescanning,
}

/// Owns the connection lifecycle for one remembered device
pub struct ConnectionSupervisor<T: Transport> {
    client: Arc<LampClient<T>>,
    device: Mutex<(String, String)>,
    config: SupervisorConfig,
    cancel: CancellationToken,
    state_tx: watch::Sender<ConnectionState>,
    on_address_change: Option<AddressChanged>,
}

impl<T: Transport> ConnectionSupervisor<T> {
    pub fn new(
        client: Arc<LampClient<T>>,
        device_name: &str,
        device_address: &str,
        config: SupervisorConfig,
    ) -> ConnectionSupervisor<T> {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        ConnectionSupervisor {
            client,
            device: Mutex::new((device_name.to_string(), device_address.to_string())),
            config,
            cancel: CancellationToken::new(),
            state_tx,
            on_address_change: None,
        }
    }

    /// Registers the address-rotation callback
    pub fn with_address_callback(mut self, callback: AddressChanged) -> Self {
        self.on_address_change = Some(callback);
        self
    }

    /// Token observers use to request cooperative shutdown
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Read-only mirror of the connection state
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Snapshot of the remembered (name, address)
    pub fn selected_device(&self) -> (String, String) {
        self.device.lock().clone()
    }

    /// Runs the maintenance loop until cancelled.
    ///
    /// On exit, whatever client handle is live is disconnected; no other
    /// error terminates the loop.
    #[instrument(skip(self))]
    pub async fn run(&self) {
        let (name, mut address) = self.selected_device();
        if name.is_empty() {
            error!("No selected device name, supervisor not starting");
            return;
        }
        info!("Starting connection supervisor for '{}' ({})", name, address);

        let mut attempts: u32 = 0;
        let mut state = if address.is_empty() {
            State::Scanning
        } else {
            State::Idle
        };

        loop {
            if self.cancel.is_cancelled() {
                info!("Stop requested, leaving connection loop");
                break;
            }

            match state {
                State::Idle => state = State::Connecting,

                State::Connecting => {
                    self.publish(ConnectionState::Connecting);
                    debug!("Connection attempt #{} to {}", attempts + 1, address);
                    match self.client.connect(&address, self.config.connect_timeout).await {
                        Ok(()) => {
                            self.publish(ConnectionState::Connected);
                            info!("Connected to '{}' ({})", name, address);
                            self.client.clock().mark_send();
                            attempts = 0;
                            state = State::Connected;
                        }
                        Err(e) => {
                            self.publish(ConnectionState::Disconnected);
                            attempts += 1;
                            self.report(&e, attempts);
                            if self.cancel.is_cancelled() {
                                break;
                            }
                            state = if attempts >= self.config.max_connect_attempts {
                                info!("Maximum connection attempts reached, rescanning");
                                State::Rescanning
                            } else {
                                State::BackoffWait
                            };
                        }
                    }
                }

                State::BackoffWait => {
                    if self.wait(self.config.reconnect_delay).await {
                        break;
                    }
                    state = State::Connecting;
                }

                State::Scanning | State::Rescanning => {
                    self.publish(ConnectionState::Disconnected);
                    attempts = 0;
                    match self.client.find_by_name(&name, self.config.rescan_timeout).await {
                        Ok(Some(lamp)) => {
                            if lamp.address != address {
                                info!("Device '{}' relocated to {}", name, lamp.address);
                                address = lamp.address;
                                self.device.lock().1 = address.clone();
                                if let Some(callback) = &self.on_address_change {
                                    callback(&name, &address);
                                }
                            } else {
                                debug!("Device '{}' found at the same address", name);
                            }
                            state = State::Connecting;
                        }
                        Ok(None) => {
                            info!(
                                "Device '{}' not found, retrying scan in {:?}",
                                name, self.config.rescan_delay
                            );
                            if self.wait(self.config.rescan_delay).await {
                                break;
                            }
                        }
                        Err(e) => {
                            self.report(&e, attempts);
                            if self.wait(self.config.rescan_delay).await {
                                break;
                            }
                        }
                    }
                }

                State::Connected => {
                    if !self.client.is_connected().await {
                        warn!("Transport reports disconnection from '{}'", name);
                        self.publish(ConnectionState::Disconnected);
                        self.client.disconnect().await;
                        if self.cancel.is_cancelled() {
                            break;
                        }
                        state = State::BackoffWait;
                        continue;
                    }

                    if self
                        .client
                        .clock()
                        .should_ping(self.config.ping_interval, self.config.inactivity_ping_threshold)
                    {
                        match self.client.send_frame(&KEEP_ALIVE_FRAME).await {
                            Ok(()) => {
                                trace!("Keep-alive ping sent");
                                attempts = 0;
                            }
                            Err(e) => {
                                warn!("Keep-alive ping failed: {}", e);
                                self.publish(ConnectionState::Disconnected);
                                self.client.disconnect().await;
                                attempts += 1;
                                if self.cancel.is_cancelled() {
                                    break;
                                }
                                state = State::BackoffWait;
                                continue;
                            }
                        }
                    }

                    if self.wait(self.config.loop_sleep).await {
                        break;
                    }
                }
            }
        }

        // Never leave a live handle behind, whatever ended the loop
        info!("Connection supervisor stopping, releasing connection");
        self.client.disconnect().await;
        self.publish(ConnectionState::Disconnected);
    }

    fn publish(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    fn report(&self, error: &Error, attempt: u32) {
        match error {
            Error::BluetoothUnavailable => {
                warn!("Bluetooth radio is off or unavailable; waiting for it to return")
            }
            other => warn!("Connection attempt #{} failed: {}", attempt, other),
        }
    }

    /// Sleeps for `duration` unless cancelled first; true means cancelled
    async fn wait(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => true,
            _ = tokio::time::sleep(duration) => false,
        }
    }
}
