/*!
 # Lamp client

 Owns the single live connection handle. Connect and disconnect
 sequences are serialized through one async mutex, and the shared handle
 is nulled out before any teardown is awaited, so a concurrent observer
 never sees a handle that is mid-teardown.
*/

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::transport::{Connection, DiscoveredLamp, Transport};
use crate::{Error, Result};

/// Default handshake timeout for one connection attempt
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

struct ClockInner {
    last_send: Instant,
    last_user_input: Instant,
}

/// The shared activity timestamps driving the keep-alive cadence.
///
/// Commands and pings both stamp `last_send`, so a real command makes a
/// ping redundant; user-initiated commands additionally stamp
/// `last_user_input`, which speeds pings up after a burst of interaction
/// goes quiet.
pub struct ActivityClock {
    inner: Mutex<ClockInner>,
}

impl Default for ActivityClock {
    fn default() -> Self {
        ActivityClock::new()
    }
}

impl ActivityClock {
    pub fn new() -> ActivityClock {
        let now = Instant::now();
        ActivityClock {
            inner: Mutex::new(ClockInner {
                last_send: now,
                last_user_input: now,
            }),
        }
    }

    /// Stamps a successful write (ping or command)
    pub fn mark_send(&self) {
        self.inner.lock().last_send = Instant::now();
    }

    /// Stamps a user-initiated command
    pub fn mark_user_input(&self) {
        self.inner.lock().last_user_input = Instant::now();
    }

    /// Whether a keep-alive ping is due
    pub fn should_ping(&self, ping_interval: Duration, inactivity_threshold: Duration) -> bool {
        let now = Instant::now();
        let inner = self.inner.lock();
        let since_send = now.saturating_duration_since(inner.last_send);
        let since_input = now.saturating_duration_since(inner.last_user_input);
        since_send >= ping_interval
            || (since_input >= inactivity_threshold && since_send >= inactivity_threshold)
    }
}

/// Owner of the live connection handle for one lamp
pub struct LampClient<T: Transport> {
    transport: T,
    conn: tokio::sync::Mutex<Option<Arc<T::Conn>>>,
    clock: ActivityClock,
}

impl<T: Transport> LampClient<T> {
    pub fn new(transport: T) -> LampClient<T> {
        LampClient {
            transport,
            conn: tokio::sync::Mutex::new(None),
            clock: ActivityClock::new(),
        }
    }

    /// The activity clock shared with the connection supervisor
    pub fn clock(&self) -> &ActivityClock {
        &self.clock
    }

    /// One-shot discovery of named devices
    pub async fn scan(&self, timeout: Duration) -> Result<Vec<DiscoveredLamp>> {
        self.transport.scan(timeout).await
    }

    /// Fresh discovery filtered by display name
    pub async fn find_by_name(&self, name: &str, timeout: Duration) -> Result<Option<DiscoveredLamp>> {
        self.transport.find_by_name(name, timeout).await
    }

    /// Connects to `address`, replacing any existing connection.
    ///
    /// Holding the connection mutex across the whole sequence makes this
    /// the only connect/disconnect in flight.
    pub async fn connect(&self, address: &str, timeout: Duration) -> Result<()> {
        let mut guard = self.conn.lock().await;
        if let Some(old) = guard.take() {
            debug!("Dropping previous connection before reconnect");
            if let Err(e) = old.disconnect().await {
                warn!("Error tearing down previous connection: {}", e);
            }
        }
        let conn = self.transport.connect(address, timeout).await?;
        *guard = Some(Arc::new(conn));
        info!("Connected to {}", address);
        Ok(())
    }

    /// Bounded retry around [`connect`](Self::connect)
    pub async fn connect_with_retry(
        &self,
        address: &str,
        attempts: u32,
        delay: Duration,
    ) -> Result<()> {
        let mut last = Error::Ble("no connection attempt made".into());
        for attempt in 1..=attempts.max(1) {
            debug!("Connection attempt {}/{} to {}", attempt, attempts, address);
            match self.connect(address, CONNECT_TIMEOUT).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!("Connect attempt {} failed: {}", attempt, e);
                    last = e;
                    if attempt < attempts {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
        Err(last)
    }

    /// Tears down the current connection, tolerating teardown errors
    pub async fn disconnect(&self) {
        let taken = self.conn.lock().await.take();
        if let Some(conn) = taken {
            if let Err(e) = conn.disconnect().await {
                warn!("Error during disconnect: {}", e);
            }
        }
    }

    /// Whether a connection exists and the transport still reports it up
    pub async fn is_connected(&self) -> bool {
        let handle = self.conn.lock().await.clone();
        match handle {
            Some(conn) => conn.is_connected().await,
            None => false,
        }
    }

    /// Whether a connection handle exists at all (without asking the
    /// transport)
    pub async fn has_handle(&self) -> bool {
        self.conn.lock().await.is_some()
    }

    /// Writes one frame over the current connection.
    ///
    /// The handle is cloned out under a short lock so writes never hold
    /// the connection mutex.
    pub async fn send_frame(&self, frame: &[u8]) -> Result<()> {
        let handle = self.conn.lock().await.clone();
        let Some(conn) = handle else {
            return Err(Error::NotConnected);
        };
        conn.write(frame).await?;
        self.clock.mark_send();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::KEEP_ALIVE_FRAME;
    use crate::transport::fake::FakeTransport;
    use std::sync::atomic::Ordering;

    fn client() -> (Arc<FakeTransport>, LampClient<Arc<FakeTransport>>) {
        let transport = Arc::new(FakeTransport::default());
        let client = LampClient::new(transport.clone());
        (transport, client)
    }

    #[tokio::test]
    async fn send_without_connection_is_a_distinct_error() {
        let (_transport, client) = client();
        assert!(matches!(
            client.send_frame(&KEEP_ALIVE_FRAME).await,
            Err(Error::NotConnected)
        ));
    }

    #[tokio::test]
    async fn connect_then_send_writes_frame() {
        let (transport, client) = client();
        client.connect("aa:bb", CONNECT_TIMEOUT).await.unwrap();
        client.send_frame(&KEEP_ALIVE_FRAME).await.unwrap();
        assert_eq!(transport.writes.load(Ordering::SeqCst), 1);
        assert!(client.is_connected().await);
    }

    #[tokio::test]
    async fn reconnect_tears_down_previous_handle() {
        let (transport, client) = client();
        client.connect("aa:bb", CONNECT_TIMEOUT).await.unwrap();
        client.connect("cc:dd", CONNECT_TIMEOUT).await.unwrap();
        // the first connection was explicitly closed, only one is live
        assert_eq!(transport.live_connections.load(Ordering::SeqCst), 1);
        client.disconnect().await;
        assert_eq!(transport.live_connections.load(Ordering::SeqCst), 0);
        assert!(!client.has_handle().await);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_with_retry_stops_after_budget() {
        let (transport, client) = client();
        transport.behavior.lock().connect_ok = [false, false, false].into();
        let result = client
            .connect_with_retry("aa:bb", 3, Duration::from_secs(1))
            .await;
        assert!(result.is_err());
        assert_eq!(
            transport.calls().iter().filter(|c| **c == "connect").count(),
            3
        );
        assert_eq!(transport.live_connections.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn ping_cadence_follows_activity_clock() {
        let clock = ActivityClock::new();
        let long = Duration::from_secs(20);
        let short = Duration::from_secs(5);

        assert!(!clock.should_ping(long, short));
        tokio::time::advance(Duration::from_secs(6)).await;
        // idle past the short threshold on both clocks
        assert!(clock.should_ping(long, short));

        clock.mark_send();
        clock.mark_user_input();
        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(!clock.should_ping(long, short));

        // a fresh command keeps pings away even past the short threshold
        tokio::time::advance(Duration::from_secs(3)).await;
        clock.mark_user_input();
        assert!(!clock.should_ping(long, short));

        // but the long interval always wins
        tokio::time::advance(Duration::from_secs(21)).await;
        assert!(clock.should_ping(long, short));
    }
}
