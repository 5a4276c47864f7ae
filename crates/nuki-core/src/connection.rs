//! Connection lifecycle
//!
//! Owns connect/disconnect policy around the host's [`BleTransport`]: the
//! retry loop with its per-attempt timeout, channel subscription after link
//! up, the refresh-services flag, and the idle disconnect timer polled via
//! [`ConnectionManager::update_connection_state`].

use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::time::{sleep, timeout};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::NukiConfig;
use crate::transport::{BleTransport, EventHandler, IndicationSink, NukiEvent, ScanPublisher};
use crate::types::BleAddress;

/// Grace period for a disconnect to take effect before the error event fires
const DISCONNECT_GRACE: Duration = Duration::from_secs(5);
/// Backoff between connect attempts
const RETRY_DELAY: Duration = Duration::from_millis(10);

// ----------------------------------------------------------------------------
// Channel selection
// ----------------------------------------------------------------------------

/// Which of the two I/O channels a connection is subscribed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Channel {
    /// Plaintext pairing channel (GDIO)
    Pairing,
    /// Authenticated user channel (USDIO)
    Data,
}

/// Service and characteristic of one channel
#[derive(Debug, Clone, Copy)]
pub(crate) struct ChannelIds {
    pub service: Uuid,
    pub characteristic: Uuid,
}

// ----------------------------------------------------------------------------
// Connection Manager
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
struct ConnState {
    connecting: bool,
    refresh_services: bool,
    subscribed: Option<Channel>,
    last_activity: Option<Instant>,
}

pub(crate) struct ConnectionManager {
    transport: Arc<dyn BleTransport>,
    scanner: Mutex<Option<Arc<dyn ScanPublisher>>>,
    config: NukiConfig,
    state: Mutex<ConnState>,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn BleTransport>, config: NukiConfig) -> Self {
        Self {
            transport,
            scanner: Mutex::new(None),
            config,
            state: Mutex::new(ConnState::default()),
        }
    }

    pub fn set_scanner(&self, scanner: Arc<dyn ScanPublisher>) {
        *self.scanner.lock().unwrap() = Some(scanner);
    }

    fn enable_scanning(&self, enable: bool) {
        if let Some(scanner) = self.scanner.lock().unwrap().as_ref() {
            scanner.enable_scanning(enable);
        }
    }

    /// Push the idle disconnect timer forward
    pub fn extend_activity(&self) {
        self.state.lock().unwrap().last_activity = Some(Instant::now());
    }

    /// Connect (if necessary) and subscribe the requested channel.
    ///
    /// Tries up to the configured number of attempts, each bounded by the
    /// connect timeout. A subscribe failure marks the cached GATT table as
    /// stale; the next attempt always rediscovers services.
    pub async fn ensure_connected(
        &self,
        address: BleAddress,
        channel: Channel,
        ids: ChannelIds,
        sink: IndicationSink,
    ) -> bool {
        let already_subscribed =
            { self.state.lock().unwrap().subscribed == Some(channel) };
        if already_subscribed {
            if self.transport.is_connected().await {
                return true;
            }
            self.state.lock().unwrap().subscribed = None;
        }

        self.state.lock().unwrap().connecting = true;
        self.enable_scanning(false);

        let mut attempt = 0u8;
        let connected = loop {
            if attempt >= self.config.connect_retries {
                warn!(%address, attempts = attempt, "BLE connect failed");
                break false;
            }
            attempt += 1;

            let refresh = {
                let state = self.state.lock().unwrap();
                state.refresh_services
            };
            debug!(%address, attempt, refresh, "connection attempt");

            let linked = if self.transport.is_connected().await {
                true
            } else {
                matches!(
                    timeout(
                        self.config.connect_timeout,
                        self.transport.connect(address, refresh),
                    )
                    .await,
                    Ok(true)
                )
            };
            if !linked {
                sleep(RETRY_DELAY).await;
                continue;
            }
            self.state.lock().unwrap().refresh_services = false;

            if self
                .transport
                .subscribe_indications(ids.service, ids.characteristic, sink.clone())
                .await
            {
                let mut state = self.state.lock().unwrap();
                state.subscribed = Some(channel);
                state.last_activity = Some(Instant::now());
                break true;
            }

            // Stale GATT cache is the usual culprit; force rediscovery.
            warn!(%address, ?channel, "subscribe failed, flagging service refresh");
            self.state.lock().unwrap().refresh_services = true;
            self.transport.disconnect().await;
            self.state.lock().unwrap().subscribed = None;
            sleep(RETRY_DELAY).await;
        };

        self.state.lock().unwrap().connecting = false;
        self.enable_scanning(true);
        connected
    }

    /// Tear the link down and wait for it to actually come down.
    ///
    /// Reports [`NukiEvent::BleErrorOnDisconnect`] when the link is still up
    /// after the grace period.
    pub async fn disconnect(&self, events: Option<&Arc<dyn EventHandler>>) {
        self.state.lock().unwrap().subscribed = None;
        if !self.transport.is_connected().await {
            return;
        }
        debug!("disconnecting BLE");
        self.transport.disconnect().await;

        let deadline = Instant::now() + DISCONNECT_GRACE;
        while self.transport.is_connected().await {
            if Instant::now() >= deadline {
                warn!("BLE client still connected after disconnect");
                if let Some(events) = events {
                    events.notify(NukiEvent::BleErrorOnDisconnect);
                }
                return;
            }
            sleep(self.config.disconnect_poll_interval).await;
        }
    }

    /// Run the idle timer; called periodically by the host.
    ///
    /// Disconnects once nothing has extended the activity window for the
    /// configured idle timeout. A connection attempt in flight suppresses
    /// the timer.
    pub async fn update_connection_state(&self, events: Option<&Arc<dyn EventHandler>>) {
        let expired = {
            let state = self.state.lock().unwrap();
            if state.connecting {
                return;
            }
            matches!(
                state.last_activity,
                Some(last) if last.elapsed() > self.config.disconnect_timeout
            )
        };
        if expired {
            debug!("disconnecting BLE on idle timeout");
            self.state.lock().unwrap().last_activity = None;
            self.disconnect(events).await;
        }
    }

    pub async fn rssi(&self) -> i16 {
        self.transport.rssi().await
    }

    pub async fn write(
        &self,
        ids: ChannelIds,
        value: &[u8],
        with_response: bool,
    ) -> bool {
        self.transport
            .write_characteristic(ids.service, ids.characteristic, value, with_response)
            .await
    }

    pub async fn prepare_passkey_bonding(&self, address: BleAddress, passkey: u32) -> bool {
        self.transport.prepare_passkey_bonding(address, passkey).await
    }
}
