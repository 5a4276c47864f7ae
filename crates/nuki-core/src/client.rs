//! Client façade
//!
//! [`NukiClient`] is what the host application holds: it owns the
//! per-device state (credential snapshot, receive state, beacon monitor,
//! connection manager) and sequences every operation through the
//! single-flight semaphore. It is generic over a [`DeviceProfile`]; the
//! lock and opener modules add their device-specific surfaces on top.

use std::sync::{Arc, Mutex, Weak};
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::beacon::BeaconMonitor;
use crate::command::{self, Action, ActionKind, CommandLink};
use crate::config::{DeviceIdentity, NukiConfig};
use crate::connection::{Channel, ChannelIds, ConnectionManager};
use crate::credentials::{CredentialStore, CredentialVault, Credentials};
use crate::dispatch::{self, DispatchContext, RxState};
use crate::errors::{CmdResult, PairingResult};
use crate::frame;
use crate::pairing::{self, IdType, PairingParams};
use crate::profile::DeviceProfile;
use crate::records::{
    AuthorizationEntry, KeypadEntry, LogEntry, NewAuthorizationEntry, NewKeypadEntry,
    NewTimeControlEntry, TimeControlEntry, TimeValue, UpdatedAuthorizationEntry,
    UpdatedKeypadEntry,
};
use crate::transport::{
    Advertisement, BleTransport, EventHandler, IndicationSink, ScanListener, ScanPublisher,
};
use crate::types::{AuthorizationId, BleAddress, CommandId, SecurityPin, SharedKey};

// ----------------------------------------------------------------------------
// Session state
// ----------------------------------------------------------------------------

/// Mutable per-device bookkeeping outside the receive state
struct Session {
    /// Snapshot of the persisted credentials, refreshed before commands
    credentials: Option<Credentials>,
    /// Peer address commands and pairing talk to
    address: Option<BleAddress>,
    /// Variant of the current peer (offer or credentials)
    is_ultra: bool,
    /// Key published mid-pairing, before credentials exist
    pairing_key: Option<SharedKey>,
    /// Last time anything was heard from the device
    last_heartbeat: Instant,
    /// Preconfigured 6-digit passkey for ultra pairing
    pairing_pin: Option<u32>,
}

// ----------------------------------------------------------------------------
// Shared core
// ----------------------------------------------------------------------------

struct Shared<P: DeviceProfile> {
    profile: P,
    identity: DeviceIdentity,
    config: NukiConfig,
    connection: ConnectionManager,
    vault: Mutex<CredentialVault>,
    rx: Mutex<RxState<P::Inbox>>,
    session: Mutex<Session>,
    beacon: Mutex<BeaconMonitor>,
    events: Mutex<Option<Arc<dyn EventHandler>>>,
    semaphore: Semaphore,
    /// Back-reference for building indication sinks without keeping
    /// ourselves alive through the transport
    weak_self: Mutex<Weak<Self>>,
}

impl<P: DeviceProfile> Shared<P> {
    fn events(&self) -> Option<Arc<dyn EventHandler>> {
        self.events.lock().unwrap().clone()
    }

    fn touch_heartbeat(&self) {
        self.session.lock().unwrap().last_heartbeat = Instant::now();
    }

    /// Refresh the credential snapshot from the store
    fn reload_credentials(&self) -> Option<Credentials> {
        let loaded = self.vault.lock().unwrap().load();
        let mut session = self.session.lock().unwrap();
        session.credentials = loaded;
        if let Some(credentials) = &loaded {
            session.address = Some(credentials.address);
            session.is_ultra = credentials.is_ultra;
        }
        loaded
    }

    /// Encryption context for outbound authenticated frames. During
    /// pairing the authorization id is still zero and the key comes from
    /// the in-flight handshake.
    fn crypto_context(&self) -> Option<(SharedKey, AuthorizationId)> {
        let session = self.session.lock().unwrap();
        match (&session.credentials, session.pairing_key) {
            (Some(credentials), _) => Some((credentials.shared_key, credentials.auth_id)),
            (None, Some(key)) => Some((key, AuthorizationId::default())),
            (None, None) => None,
        }
    }

    fn pairing_channel(&self) -> ChannelIds {
        let ultra = self.session.lock().unwrap().is_ultra;
        ChannelIds {
            service: self.profile.pairing_service(ultra),
            characteristic: self.profile.gdio_characteristic(ultra),
        }
    }

    fn data_channel(&self) -> ChannelIds {
        ChannelIds {
            service: self.profile.data_service(),
            characteristic: self.profile.usdio_characteristic(),
        }
    }

    fn sink(self: &Arc<Self>) -> IndicationSink {
        let weak = Arc::downgrade(self);
        Arc::new(move |characteristic, data| {
            if let Some(shared) = weak.upgrade() {
                shared.on_indication(characteristic, data);
            }
        })
    }

    /// Frame router: invoked by the transport for every indication
    fn on_indication(&self, characteristic: Uuid, data: &[u8]) {
        self.touch_heartbeat();
        self.connection.extend_activity();

        let usdio = self.profile.usdio_characteristic();
        let is_gdio = characteristic == self.profile.gdio_characteristic(false)
            || characteristic == self.profile.gdio_characteristic(true);

        let decoded = if characteristic == usdio {
            let Some((key, _)) = self.crypto_context() else {
                warn!("encrypted indication without a key, dropping");
                return;
            };
            // Undecryptable or corrupt frames are dropped; the waiting
            // machine times out instead of seeing garbage.
            frame::decode_encrypted(data, &key).ok()
        } else if is_gdio {
            frame::decode_plain(data).ok()
        } else {
            warn!(%characteristic, "indication on unexpected characteristic");
            return;
        };

        let Some((command, payload)) = decoded else {
            return;
        };
        debug!(%command, len = payload.len(), "indication received");

        let events = self.events();
        let is_ultra = self.session.lock().unwrap().is_ultra;
        let shared_key = self.crypto_context().map(|(key, _)| key);
        let mut rx = self.rx.lock().unwrap();
        rx.crc_ok = true;
        let ctx = DispatchContext {
            shared_key: shared_key.as_ref(),
            is_ultra,
            events: events.as_ref(),
        };
        dispatch::handle_message(&self.profile, &mut rx, ctx, command, &payload);
    }

    async fn send_plain(&self, command: CommandId, payload: &[u8]) -> bool {
        let Some(address) = self.session.lock().unwrap().address else {
            warn!("no peer address for plain message");
            return false;
        };
        let ids = self.pairing_channel();
        self.ensure_and_write(
            address,
            Channel::Pairing,
            ids,
            frame::encode_plain(command, payload),
        )
        .await
    }

    async fn send_encrypted(&self, command: CommandId, payload: &[u8]) -> bool {
        let Some(address) = self.session.lock().unwrap().address else {
            warn!("no peer address for encrypted message");
            return false;
        };
        let Some((key, auth_id)) = self.crypto_context() else {
            warn!("no shared key for encrypted message");
            return false;
        };
        let frame = match frame::encode_encrypted(command, payload, auth_id, &key) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(%err, "encrypting message failed");
                return false;
            }
        };
        self.ensure_and_write(address, Channel::Data, self.data_channel(), frame)
            .await
    }

    async fn ensure_and_write(
        &self,
        address: BleAddress,
        channel: Channel,
        ids: ChannelIds,
        frame: Vec<u8>,
    ) -> bool {
        // A sink is needed for (re)subscription; build it from the Arc
        // that owns us.
        let sink = match self.self_arc() {
            Some(shared) => shared.sink(),
            None => return false,
        };
        if !self
            .connection
            .ensure_connected(address, channel, ids, sink)
            .await
        {
            warn!(%address, "send failed, unable to connect");
            return false;
        }
        self.connection.extend_activity();
        self.touch_heartbeat();
        self.connection.write(ids, &frame, true).await
    }

    fn self_arc(&self) -> Option<Arc<Self>> {
        self.weak_self.lock().unwrap().upgrade()
    }
}

// ----------------------------------------------------------------------------
// Link adapter
// ----------------------------------------------------------------------------

/// Adapter handing the state machines their wire access
struct Link<P: DeviceProfile> {
    shared: Arc<Shared<P>>,
}

#[async_trait]
impl<P: DeviceProfile> CommandLink for Link<P> {
    async fn send_encrypted(&self, command: CommandId, payload: &[u8]) -> bool {
        self.shared.send_encrypted(command, payload).await
    }
}

#[async_trait]
impl<P: DeviceProfile> pairing::PairingLink for Link<P> {
    async fn send_plain(&self, command: CommandId, payload: &[u8]) -> bool {
        self.shared.send_plain(command, payload).await
    }

    async fn send_encrypted(&self, command: CommandId, payload: &[u8]) -> bool {
        self.shared.send_encrypted(command, payload).await
    }

    fn publish_shared_key(&self, key: SharedKey) {
        self.shared.session.lock().unwrap().pairing_key = Some(key);
    }
}

// ----------------------------------------------------------------------------
// Scan bridge
// ----------------------------------------------------------------------------

/// Listener registered with the scan publisher; holds the core weakly so
/// publisher and client never keep each other alive.
struct ScanBridge<P: DeviceProfile> {
    shared: Weak<Shared<P>>,
}

impl<P: DeviceProfile> ScanListener for ScanBridge<P> {
    fn on_advertisement(&self, advertisement: &Advertisement) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };

        let (paired_address, pin_configured) = {
            let session = shared.session.lock().unwrap();
            (
                session.credentials.as_ref().map(|c| c.address),
                session.pairing_pin.is_some(),
            )
        };

        match paired_address {
            Some(address) if address == advertisement.address => {
                let observation = shared
                    .beacon
                    .lock()
                    .unwrap()
                    .observe_paired(advertisement, &shared.profile.data_service());
                if observation.heartbeat {
                    shared.touch_heartbeat();
                }
                if let Some(event) = observation.event {
                    if let Some(events) = shared.events() {
                        events.notify(event);
                    }
                }
            }
            Some(_) => {}
            None => {
                let classic = shared.profile.pairing_service(false);
                let ultra = shared.profile.pairing_service(true);
                shared.beacon.lock().unwrap().observe_unpaired(
                    advertisement,
                    &classic,
                    &ultra,
                    pin_configured,
                );
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Client
// ----------------------------------------------------------------------------

/// Handle to one remote device
pub struct NukiClient<P: DeviceProfile> {
    shared: Arc<Shared<P>>,
    listener: Mutex<Option<Arc<dyn ScanListener>>>,
}

impl<P: DeviceProfile> NukiClient<P> {
    pub fn new(
        profile: P,
        identity: DeviceIdentity,
        config: NukiConfig,
        transport: Arc<dyn BleTransport>,
        store: Box<dyn CredentialStore>,
    ) -> Self {
        let vault = CredentialVault::new(store, &identity.preferences_id);
        let shared = Arc::new_cyclic(|weak| Shared {
            profile,
            identity,
            connection: ConnectionManager::new(transport, config.clone()),
            config,
            vault: Mutex::new(vault),
            rx: Mutex::new(RxState::default()),
            session: Mutex::new(Session {
                credentials: None,
                address: None,
                is_ultra: false,
                pairing_key: None,
                last_heartbeat: Instant::now(),
                pairing_pin: None,
            }),
            beacon: Mutex::new(BeaconMonitor::default()),
            events: Mutex::new(None),
            semaphore: Semaphore::new(1),
            weak_self: Mutex::new(weak.clone()),
        });
        shared.reload_credentials();
        Self {
            shared,
            listener: Mutex::new(None),
        }
    }

    /// Wire the client into the host's scanner and connection manager
    pub fn register_scanner(&self, publisher: Arc<dyn ScanPublisher>) {
        let listener: Arc<dyn ScanListener> = Arc::new(ScanBridge {
            shared: Arc::downgrade(&self.shared),
        });
        publisher.subscribe(listener.clone());
        *self.listener.lock().unwrap() = Some(listener);
        self.shared.connection.set_scanner(publisher);
    }

    /// Detach from the scanner again
    pub fn unregister_scanner(&self, publisher: &dyn ScanPublisher) {
        if let Some(listener) = self.listener.lock().unwrap().take() {
            publisher.unsubscribe(&listener);
        }
    }

    pub fn set_event_handler(&self, handler: Arc<dyn EventHandler>) {
        *self.shared.events.lock().unwrap() = Some(handler);
    }

    /// Preset the 6-digit passkey required before an ultra device can be
    /// paired
    pub fn set_pairing_pin(&self, pin: u32) {
        self.shared.session.lock().unwrap().pairing_pin = Some(pin);
    }

    pub fn is_paired(&self) -> bool {
        self.shared.reload_credentials().is_some()
    }

    /// The stored peer address, surviving unpair
    pub fn stored_address(&self) -> Option<BleAddress> {
        self.shared.vault.lock().unwrap().stored_address()
    }

    /// Whether the paired device is an ultra variant
    pub fn is_ultra(&self) -> bool {
        self.shared.session.lock().unwrap().is_ultra
    }

    /// The authorization id of the current pairing
    pub fn authorization_id(&self) -> Option<AuthorizationId> {
        self.shared
            .session
            .lock()
            .unwrap()
            .credentials
            .as_ref()
            .map(|credentials| credentials.auth_id)
    }

    /// The stored PIN for the current variant
    pub fn stored_pin(&self) -> SecurityPin {
        let ultra = self.shared.session.lock().unwrap().is_ultra;
        self.shared.vault.lock().unwrap().stored_pin(ultra)
    }

    // ------------------------------------------------------------------
    // Beacon observers
    // ------------------------------------------------------------------

    pub fn rssi(&self) -> i16 {
        self.shared.beacon.lock().unwrap().rssi
    }

    pub fn last_beacon(&self) -> Option<Instant> {
        self.shared.beacon.lock().unwrap().last_beacon
    }

    pub fn last_heartbeat(&self) -> Instant {
        self.shared.session.lock().unwrap().last_heartbeat
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Run the idle disconnect timer; poll this from the host loop
    pub async fn update_connection_state(&self) {
        self.shared
            .connection
            .update_connection_state(self.shared.events().as_ref())
            .await;
    }

    /// Pair with a device currently advertising pairing mode.
    ///
    /// Idempotent: returns `Success` immediately when valid credentials
    /// exist. Returns `Pairing` when no device offered pairing recently or
    /// the link could not be established.
    pub async fn pair(&self, id_type: IdType) -> PairingResult {
        let shared = &self.shared;
        if shared.reload_credentials().is_some() {
            debug!("already paired");
            return PairingResult::Success;
        }

        let offer = shared
            .beacon
            .lock()
            .unwrap()
            .current_offer(shared.config.pairing_offer_expiry);
        let Some(offer) = offer else {
            debug!("no device in pairing mode found");
            return PairingResult::Pairing;
        };
        shared.beacon.lock().unwrap().clear_offer();

        let pairing_pin = shared.session.lock().unwrap().pairing_pin;
        if offer.is_ultra {
            // SMP bonding with the preset passkey precedes the handshake.
            let Some(pin) = pairing_pin else {
                warn!("ultra device offered pairing but no pairing PIN is set");
                return PairingResult::Pairing;
            };
            if !shared
                .connection
                .prepare_passkey_bonding(offer.address, pin)
                .await
            {
                warn!("passkey bonding preparation failed");
                return PairingResult::Pairing;
            }
        }

        {
            let mut session = shared.session.lock().unwrap();
            session.address = Some(offer.address);
            session.is_ultra = offer.is_ultra;
            session.pairing_key = None;
        }

        let ids = shared.pairing_channel();
        if !shared
            .connection
            .ensure_connected(offer.address, Channel::Pairing, ids, shared.sink())
            .await
        {
            warn!("could not connect for pairing");
            return PairingResult::Pairing;
        }

        let link = Link {
            shared: shared.clone(),
        };
        let params = PairingParams {
            identity: &shared.identity,
            id_type,
            is_ultra: offer.is_ultra,
            ultra_pin: pairing_pin.unwrap_or(0),
        };
        let outcome = pairing::run_pairing(&link, &shared.rx, &shared.config, params).await;

        let result = match outcome {
            Ok(output) => {
                {
                    let mut vault = shared.vault.lock().unwrap();
                    let credentials = Credentials {
                        address: offer.address,
                        shared_key: output.shared_key,
                        auth_id: output.auth_id,
                        is_ultra: offer.is_ultra,
                        pin: vault.stored_pin(offer.is_ultra),
                    };
                    vault.save(&credentials);
                    if let (true, Some(pin)) = (offer.is_ultra, pairing_pin) {
                        vault.save_pin(SecurityPin::Ultra(pin));
                    }
                }
                if let Some(device_uuid) = shared.rx.lock().unwrap().device_uuid {
                    debug!(device_uuid = %hex::encode(device_uuid), "paired with device");
                }
                shared.reload_credentials();
                shared.touch_heartbeat();
                PairingResult::Success
            }
            Err(_) => PairingResult::Timeout,
        };

        shared.session.lock().unwrap().pairing_key = None;
        shared.connection.extend_activity();
        debug!(?result, "pairing finished");
        result
    }

    /// Forget the pairing. The link, if up, is left alone.
    pub fn unpair(&self) {
        self.shared.vault.lock().unwrap().clear();
        let mut session = self.shared.session.lock().unwrap();
        session.credentials = None;
        session.pairing_key = None;
        debug!("credentials deleted");
    }

    // ------------------------------------------------------------------
    // Command execution
    // ------------------------------------------------------------------

    /// Execute one action against the device.
    ///
    /// Serialized through the single-flight permit; a second concurrent
    /// call blocks for up to the semaphore timeout and then fails. In
    /// classic (co-located scanner) mode a stale heartbeat fails fast
    /// without touching the link.
    pub async fn execute_action(&self, action: Action) -> CmdResult {
        let shared = &self.shared;

        if !shared.config.alt_connect {
            let stale = shared.session.lock().unwrap().last_heartbeat.elapsed()
                > shared.config.heartbeat_timeout;
            if stale {
                warn!("heartbeat timeout, command failed");
                return CmdResult::Error;
            }
        }

        let Some(credentials) = shared.reload_credentials() else {
            debug!("credentials not available, pair first");
            return CmdResult::NotPaired;
        };

        let permit = match timeout(shared.config.semaphore_timeout, shared.semaphore.acquire())
            .await
        {
            Ok(Ok(permit)) => permit,
            _ => {
                warn!("another command is in flight");
                return CmdResult::Failed;
            }
        };

        shared.connection.extend_activity();
        let link = Link {
            shared: shared.clone(),
        };
        let pin = credentials.pin.to_le_bytes();
        let result =
            command::execute(&link, &shared.rx, &shared.config, &action, Some(pin)).await;
        drop(permit);

        if shared.config.alt_connect
            && matches!(result, CmdResult::Failed | CmdResult::Error)
        {
            shared.connection.disconnect(shared.events().as_ref()).await;
        }
        result
    }

    /// Read access to the profile's decoded records
    pub fn with_inbox<R>(&self, f: impl FnOnce(&P::Inbox) -> R) -> R {
        f(&self.shared.rx.lock().unwrap().inbox)
    }

    /// Poll the receive state until `pred` yields, bounded by the bulk
    /// collection timeout
    async fn await_bulk<T>(
        &self,
        mut pred: impl FnMut(&mut RxState<P::Inbox>) -> Option<T>,
    ) -> Result<T, CmdResult> {
        let deadline = Instant::now() + self.shared.config.general_timeout;
        loop {
            if let Some(value) = pred(&mut self.shared.rx.lock().unwrap()) {
                return Ok(value);
            }
            if Instant::now() >= deadline {
                warn!("bulk receive timeout");
                return Err(CmdResult::TimeOut);
            }
            sleep(self.shared.config.command_poll_interval).await;
        }
    }

    // ------------------------------------------------------------------
    // Keypad codes
    // ------------------------------------------------------------------

    /// Fetch a window of keypad codes; entries land in
    /// [`NukiClient::keypad_entries`]. Waits for the count handshake and
    /// the announced number of entries.
    pub async fn retrieve_keypad_entries(&self, offset: u16, count: u16) -> CmdResult {
        {
            let mut rx = self.shared.rx.lock().unwrap();
            rx.keypad_entries.clear();
            rx.keypad_code_count = None;
        }

        let mut payload = offset.to_le_bytes().to_vec();
        payload.extend_from_slice(&count.to_le_bytes());
        let action = Action::new(
            ActionKind::CommandWithChallengeAndPin,
            CommandId::REQUEST_KEYPAD_CODES,
            payload,
        );
        let result = self.execute_action(action).await;
        if result != CmdResult::Success {
            return result;
        }

        let total = match self.await_bulk(|rx| rx.keypad_code_count).await {
            Ok(total) => total,
            Err(result) => return result,
        };
        let expected = count.min(total.saturating_sub(offset)) as usize;
        debug!(total, expected, "keypad code count received");

        match self
            .await_bulk(|rx| (rx.keypad_entries.len() >= expected).then_some(()))
            .await
        {
            Ok(()) => CmdResult::Success,
            Err(result) => result,
        }
    }

    /// Entries collected by the last retrieval
    pub fn keypad_entries(&self) -> Vec<KeypadEntry> {
        self.shared.rx.lock().unwrap().keypad_entries.clone()
    }

    /// Total keypad codes on the device, per the last retrieval
    pub fn keypad_entry_count(&self) -> u16 {
        self.shared.rx.lock().unwrap().keypad_code_count.unwrap_or(0)
    }

    pub async fn add_keypad_entry(&self, entry: NewKeypadEntry) -> CmdResult {
        self.execute_action(Action::new(
            ActionKind::CommandWithChallengeAndPin,
            CommandId::ADD_KEYPAD_CODE,
            entry.encode(),
        ))
        .await
    }

    pub async fn update_keypad_entry(&self, entry: UpdatedKeypadEntry) -> CmdResult {
        self.execute_action(Action::new(
            ActionKind::CommandWithChallengeAndPin,
            CommandId::UPDATE_KEYPAD_CODE,
            entry.encode(),
        ))
        .await
    }

    pub async fn delete_keypad_entry(&self, code_id: u16) -> CmdResult {
        self.execute_action(Action::new(
            ActionKind::CommandWithChallengeAndPin,
            CommandId::REMOVE_KEYPAD_CODE,
            code_id.to_le_bytes().to_vec(),
        ))
        .await
    }

    // ------------------------------------------------------------------
    // Authorization entries
    // ------------------------------------------------------------------

    /// Fetch a window of authorization entries into
    /// [`NukiClient::authorization_entries`]
    pub async fn retrieve_authorization_entries(&self, offset: u16, count: u16) -> CmdResult {
        {
            let mut rx = self.shared.rx.lock().unwrap();
            rx.authorization_entries.clear();
            rx.auth_entry_count = None;
        }

        let mut payload = offset.to_le_bytes().to_vec();
        payload.extend_from_slice(&count.to_le_bytes());
        let action = Action::new(
            ActionKind::CommandWithChallengeAndPin,
            CommandId::REQUEST_AUTHORIZATION_ENTRIES,
            payload,
        );
        let result = self.execute_action(action).await;
        if result != CmdResult::Success {
            return result;
        }

        let total = match self.await_bulk(|rx| rx.auth_entry_count).await {
            Ok(total) => total,
            Err(result) => return result,
        };
        let expected = count.min(total.saturating_sub(offset)) as usize;

        match self
            .await_bulk(|rx| (rx.authorization_entries.len() >= expected).then_some(()))
            .await
        {
            Ok(()) => CmdResult::Success,
            Err(result) => result,
        }
    }

    pub fn authorization_entries(&self) -> Vec<AuthorizationEntry> {
        self.shared.rx.lock().unwrap().authorization_entries.clone()
    }

    pub async fn add_authorization_entry(&self, entry: NewAuthorizationEntry) -> CmdResult {
        self.execute_action(Action::new(
            ActionKind::CommandWithChallengeAndPin,
            CommandId::AUTHORIZATION_DATA_INVITE,
            entry.encode(),
        ))
        .await
    }

    pub async fn update_authorization_entry(
        &self,
        entry: UpdatedAuthorizationEntry,
    ) -> CmdResult {
        self.execute_action(Action::new(
            ActionKind::CommandWithChallengeAndPin,
            CommandId::UPDATE_AUTHORIZATION_ENTRY,
            entry.encode(),
        ))
        .await
    }

    pub async fn delete_authorization_entry(&self, auth_id: u32) -> CmdResult {
        self.execute_action(Action::new(
            ActionKind::CommandWithChallengeAndPin,
            CommandId::REMOVE_AUTHORIZATION_ENTRY,
            auth_id.to_le_bytes().to_vec(),
        ))
        .await
    }

    // ------------------------------------------------------------------
    // Log entries
    // ------------------------------------------------------------------

    /// Fetch log entries into [`NukiClient::log_entries`]. With
    /// `total_count_only` the device just reports the count.
    pub async fn retrieve_log_entries(
        &self,
        start_index: u32,
        count: u16,
        sort_order: u8,
        total_count_only: bool,
    ) -> CmdResult {
        {
            let mut rx = self.shared.rx.lock().unwrap();
            rx.log_entries.clear();
            rx.log_entry_count = None;
        }

        let mut payload = start_index.to_le_bytes().to_vec();
        payload.extend_from_slice(&count.to_le_bytes());
        payload.push(sort_order);
        payload.push(total_count_only as u8);
        let action = Action::new(
            ActionKind::CommandWithChallengeAndPin,
            CommandId::REQUEST_LOG_ENTRIES,
            payload,
        );
        let result = self.execute_action(action).await;
        if result != CmdResult::Success {
            return result;
        }

        if total_count_only {
            return match self.await_bulk(|rx| rx.log_entry_count).await {
                Ok(_) => CmdResult::Success,
                Err(result) => result,
            };
        }

        match self
            .await_bulk(|rx| (rx.log_entries.len() >= count as usize).then_some(()))
            .await
        {
            Ok(()) => CmdResult::Success,
            Err(result) => result,
        }
    }

    pub fn log_entries(&self) -> Vec<LogEntry> {
        self.shared.rx.lock().unwrap().log_entries.clone()
    }

    pub fn log_entry_count(&self) -> u16 {
        self.shared.rx.lock().unwrap().log_entry_count.unwrap_or(0)
    }

    /// Whether activity logging is enabled on the device, per the last
    /// log-entry retrieval
    pub fn logging_enabled(&self) -> bool {
        self.shared.rx.lock().unwrap().logging_enabled
    }

    // ------------------------------------------------------------------
    // Time control entries
    // ------------------------------------------------------------------

    /// Fetch all time-control entries into
    /// [`NukiClient::time_control_entries`]
    pub async fn retrieve_time_control_entries(&self) -> CmdResult {
        {
            let mut rx = self.shared.rx.lock().unwrap();
            rx.time_control_entries.clear();
            rx.time_control_entry_count = None;
        }

        let action = Action::new(
            ActionKind::CommandWithChallengeAndPin,
            CommandId::REQUEST_TIME_CONTROL_ENTRIES,
            Vec::new(),
        );
        let result = self.execute_action(action).await;
        if result != CmdResult::Success {
            return result;
        }

        let total = match self.await_bulk(|rx| rx.time_control_entry_count).await {
            Ok(total) => total as usize,
            Err(result) => return result,
        };

        match self
            .await_bulk(|rx| (rx.time_control_entries.len() >= total).then_some(()))
            .await
        {
            Ok(()) => CmdResult::Success,
            Err(result) => result,
        }
    }

    pub fn time_control_entries(&self) -> Vec<TimeControlEntry> {
        self.shared.rx.lock().unwrap().time_control_entries.clone()
    }

    pub async fn add_time_control_entry(&self, entry: NewTimeControlEntry) -> CmdResult {
        self.execute_action(Action::new(
            ActionKind::CommandWithChallengeAndPin,
            CommandId::ADD_TIME_CONTROL_ENTRY,
            entry.encode(),
        ))
        .await
    }

    pub async fn update_time_control_entry(&self, entry: TimeControlEntry) -> CmdResult {
        self.execute_action(Action::new(
            ActionKind::CommandWithChallengeAndPin,
            CommandId::UPDATE_TIME_CONTROL_ENTRY,
            entry.encode(),
        ))
        .await
    }

    pub async fn remove_time_control_entry(&self, entry_id: u8) -> CmdResult {
        self.execute_action(Action::new(
            ActionKind::CommandWithChallengeAndPin,
            CommandId::REMOVE_TIME_CONTROL_ENTRY,
            vec![entry_id],
        ))
        .await
    }

    // ------------------------------------------------------------------
    // Maintenance commands
    // ------------------------------------------------------------------

    /// Update the device security PIN through the variant-aware path.
    ///
    /// A PIN of the wrong variant for the paired device is a programming
    /// error and fails before any traffic is generated.
    pub async fn set_security_pin(&self, pin: SecurityPin) -> CmdResult {
        let Some(credentials) = self.shared.reload_credentials() else {
            return CmdResult::NotPaired;
        };
        if pin.is_ultra() != credentials.is_ultra {
            warn!(
                device_ultra = credentials.is_ultra,
                "security PIN variant does not match the paired device"
            );
            return CmdResult::Failed;
        }

        let action = Action::new(
            ActionKind::CommandWithChallengeAndPin,
            CommandId::SET_SECURITY_PIN,
            pin.to_le_bytes(),
        );
        let result = self.execute_action(action).await;
        if result == CmdResult::Success {
            self.shared.vault.lock().unwrap().save_pin(pin);
            self.shared.reload_credentials();
        }
        result
    }

    /// Check the stored PIN against the device without side effects
    pub async fn verify_security_pin(&self) -> CmdResult {
        self.execute_action(Action::new(
            ActionKind::CommandWithChallengeAndPin,
            CommandId::VERIFY_SECURITY_PIN,
            Vec::new(),
        ))
        .await
    }

    pub async fn update_time(&self, time: TimeValue) -> CmdResult {
        let mut payload = Vec::with_capacity(TimeValue::WIRE_LEN);
        time.encode(&mut payload);
        self.execute_action(Action::new(
            ActionKind::CommandWithChallengeAndPin,
            CommandId::UPDATE_TIME,
            payload,
        ))
        .await
    }

    pub async fn request_calibration(&self) -> CmdResult {
        self.execute_action(Action::new(
            ActionKind::CommandWithChallengeAndPin,
            CommandId::REQUEST_CALIBRATION,
            Vec::new(),
        ))
        .await
    }

    pub async fn request_reboot(&self) -> CmdResult {
        self.execute_action(Action::new(
            ActionKind::CommandWithChallengeAndPin,
            CommandId::REQUEST_REBOOT,
            Vec::new(),
        ))
        .await
    }

    /// Trigger a keypad action on the device
    pub async fn keypad_action(&self, source: u8, code: u32, action: u8) -> CmdResult {
        let mut payload = vec![source];
        payload.extend_from_slice(&code.to_le_bytes());
        payload.push(action);
        self.execute_action(Action::new(
            ActionKind::CommandWithChallengeAndAccept,
            CommandId::KEYPAD_ACTION,
            payload,
        ))
        .await
    }
}
