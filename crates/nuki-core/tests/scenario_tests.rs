//! End-to-end scenarios against the scripted lock peer
//!
//! Everything here exercises the real wire path: frames are built,
//! encrypted, decrypted and dispatched exactly as they would be against a
//! physical device; only the GATT plumbing is replaced by the harness.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use nuki_core::credentials::MemoryStore;
use nuki_core::lock::{self, LockAction, LockProfile};
use nuki_core::pairing::IdType;
use nuki_core::records::TimeValue;
use nuki_core::transport::Advertisement;
use nuki_core::types::{
    BleAddress, CommandId, STATUS_ACCEPTED, STATUS_COMPLETE,
};
use nuki_core::{
    CmdResult, DeviceIdentity, NukiClient, NukiConfig, NukiEvent, PairingResult, SecurityPin,
};
use nuki_harness::{EventCollector, FakeScanner, MockTransport, Reply, ScriptedLock};

const LOCK_ADDRESS: BleAddress = BleAddress::new([0x54, 0xD2, 0x72, 0x01, 0x02, 0x03]);

struct Rig {
    client: NukiClient<LockProfile>,
    transport: Arc<MockTransport>,
    scanner: Arc<FakeScanner>,
    events: Arc<EventCollector>,
    peer: Arc<ScriptedLock>,
}

fn test_config() -> NukiConfig {
    let mut config = NukiConfig::new()
        .with_command_timeout(Duration::from_millis(300))
        .with_pairing_timeout(Duration::from_millis(500))
        .with_general_timeout(Duration::from_millis(300))
        .with_connect_timeout(Duration::from_millis(100));
    config.semaphore_timeout = Duration::from_millis(200);
    config.pairing_poll_interval = Duration::from_millis(5);
    config.command_poll_interval = Duration::from_millis(5);
    config
}

fn rig_with(peer: Arc<ScriptedLock>, gdio: uuid::Uuid, config: NukiConfig) -> Rig {
    let transport = Arc::new(MockTransport::new(peer.clone(), gdio, lock::USDIO_UUID));
    let client = NukiClient::new(
        LockProfile,
        DeviceIdentity::new("bridge", 0x4242_4242, "nuki-test"),
        config,
        transport.clone(),
        Box::new(MemoryStore::new()),
    );
    let scanner = Arc::new(FakeScanner::new());
    client.register_scanner(scanner.clone());
    let events = Arc::new(EventCollector::new());
    client.set_event_handler(events.clone());
    Rig {
        client,
        transport,
        scanner,
        events,
        peer,
    }
}

fn rig() -> Rig {
    rig_with(
        Arc::new(ScriptedLock::new()),
        lock::PAIRING_GDIO_UUID,
        test_config(),
    )
}

fn pairing_advertisement(service: uuid::Uuid) -> Advertisement {
    let mut service_data = HashMap::new();
    service_data.insert(service, vec![0x01]);
    Advertisement {
        address: LOCK_ADDRESS,
        rssi: -61,
        manufacturer_data: Vec::new(),
        service_data,
        service_uuids: Vec::new(),
    }
}

fn ibeacon_advertisement(power: u8) -> Advertisement {
    let mut manufacturer_data = vec![0x4C, 0x00, 0x02, 0x15];
    manufacturer_data.extend_from_slice(&[0x22; 16]);
    manufacturer_data.extend_from_slice(&[0x00, 0x01, 0x00, 0x02]);
    manufacturer_data.push(power);
    Advertisement {
        address: LOCK_ADDRESS,
        rssi: -58,
        manufacturer_data,
        service_data: HashMap::new(),
        service_uuids: vec![lock::SERVICE_UUID],
    }
}

async fn pair(rig: &Rig) {
    rig.scanner
        .publish(&pairing_advertisement(lock::PAIRING_SERVICE_UUID));
    assert_eq!(rig.client.pair(IdType::Bridge).await, PairingResult::Success);
}

fn key_turner_payload(lock_state: u8) -> Vec<u8> {
    let mut data = vec![0x02, lock_state, 0x01];
    TimeValue {
        year: 2024,
        month: 6,
        day: 1,
        hour: 12,
        minute: 0,
        second: 0,
    }
    .encode(&mut data);
    data.extend_from_slice(&120i16.to_le_bytes());
    data.extend_from_slice(&[0, 1, 0, 2, 0, 0, 0]);
    data.extend_from_slice(&0u16.to_le_bytes());
    data.push(0);
    data
}

fn keypad_entry_payload(code_id: u16, code: u32) -> Vec<u8> {
    let mut data = code_id.to_le_bytes().to_vec();
    data.extend_from_slice(&code.to_le_bytes());
    data.extend_from_slice(&[0u8; 20]); // name
    data.push(1); // enabled
    data.resize(2 + 4 + 20 + 1 + 7 + 7 + 2 + 1 + 7 + 7 + 1 + 2 + 2, 0);
    data
}

// ----------------------------------------------------------------------------
// Pairing scenarios
// ----------------------------------------------------------------------------

#[tokio::test]
async fn classic_pairing_happy_path() {
    let rig = rig();
    assert!(!rig.client.is_paired());

    pair(&rig).await;

    assert!(rig.client.is_paired());
    // The lock-assigned authorization id is persisted little-endian.
    let auth_id = rig.client.authorization_id().expect("paired");
    assert_eq!(auth_id.as_bytes(), &[0x04, 0x03, 0x02, 0x01]);
    assert_eq!(auth_id, rig.peer.auth_id());
    // Both ends agreed on a key.
    assert!(rig.peer.shared_key().is_some());
    // Pairing is idempotent.
    assert_eq!(rig.client.pair(IdType::Bridge).await, PairingResult::Success);
}

#[tokio::test]
async fn pairing_without_advertisement_reports_pairing() {
    let rig = rig();
    assert_eq!(rig.client.pair(IdType::Bridge).await, PairingResult::Pairing);
}

#[tokio::test]
async fn pairing_times_out_when_device_stays_silent() {
    let rig = rig();
    rig.peer.mute_pairing();
    rig.scanner
        .publish(&pairing_advertisement(lock::PAIRING_SERVICE_UUID));

    assert_eq!(rig.client.pair(IdType::Bridge).await, PairingResult::Timeout);
    assert!(!rig.client.is_paired());
}

#[tokio::test]
async fn ultra_pairing_uses_passkey_bonding() {
    let peer = Arc::new(ScriptedLock::new_ultra());
    let rig = rig_with(peer, lock::ULTRA_PAIRING_GDIO_UUID, test_config());

    // Without a pairing PIN the ultra offer is ignored.
    rig.scanner
        .publish(&pairing_advertisement(lock::ULTRA_PAIRING_SERVICE_UUID));
    assert_eq!(rig.client.pair(IdType::Bridge).await, PairingResult::Pairing);

    rig.client.set_pairing_pin(123_456);
    rig.scanner
        .publish(&pairing_advertisement(lock::ULTRA_PAIRING_SERVICE_UUID));
    assert_eq!(rig.client.pair(IdType::Bridge).await, PairingResult::Success);

    assert_eq!(rig.transport.bonding_requests(), vec![(LOCK_ADDRESS, 123_456)]);
    assert_eq!(rig.client.stored_pin(), SecurityPin::Ultra(123_456));
}

// ----------------------------------------------------------------------------
// Command scenarios
// ----------------------------------------------------------------------------

#[tokio::test]
async fn key_turner_state_read_populates_record() {
    let rig = rig();
    pair(&rig).await;

    rig.peer.script_response(
        CommandId::KEYTURNER_STATES,
        vec![Reply::Message(
            CommandId::KEYTURNER_STATES,
            key_turner_payload(0x03),
        )],
    );

    assert_eq!(rig.client.request_key_turner_state().await, CmdResult::Success);
    let state = rig.client.key_turner_state().expect("state record");
    assert_eq!(state.lock_state, 0x03);
    assert_eq!(state.timezone_offset, 120);
}

#[tokio::test]
async fn unpaired_command_fails_fast() {
    let rig = rig();
    assert_eq!(
        rig.client.request_key_turner_state().await,
        CmdResult::NotPaired
    );
}

#[tokio::test]
async fn bad_pin_raises_event_and_fails() {
    let rig = rig();
    pair(&rig).await;

    rig.peer.script_response(
        CommandId::VERIFY_SECURITY_PIN,
        vec![Reply::Error(0x21, CommandId::VERIFY_SECURITY_PIN)],
    );

    assert_eq!(rig.client.verify_security_pin().await, CmdResult::Failed);
    assert_eq!(rig.events.count(NukiEvent::ErrorBadPin), 1);
}

#[tokio::test]
async fn lock_busy_then_retry_succeeds() {
    let rig = rig();
    pair(&rig).await;

    rig.peer.script_response(
        CommandId::LOCK_ACTION,
        vec![Reply::Error(0x45, CommandId::LOCK_ACTION)],
    );
    rig.peer.script_response(
        CommandId::LOCK_ACTION,
        vec![
            Reply::Status(STATUS_ACCEPTED),
            Reply::Status(STATUS_COMPLETE),
        ],
    );

    let first = rig
        .client
        .lock_action(LockAction::Unlock, 0, 0, None)
        .await;
    assert_eq!(first, CmdResult::LockBusy);

    let second = rig
        .client
        .lock_action(LockAction::Unlock, 0, 0, None)
        .await;
    assert_eq!(second, CmdResult::Success);
}

#[tokio::test]
async fn accept_skipped_still_succeeds() {
    let rig = rig();
    pair(&rig).await;

    // Lock already unlocked: it answers Complete without Accepted.
    rig.peer.script_response(
        CommandId::LOCK_ACTION,
        vec![Reply::Status(STATUS_COMPLETE)],
    );

    let result = rig
        .client
        .lock_action(LockAction::Unlock, 0, 0, None)
        .await;
    assert_eq!(result, CmdResult::Success);
}

#[tokio::test]
async fn silent_device_times_out() {
    let rig = rig();
    pair(&rig).await;

    rig.peer
        .script_response(CommandId::KEYTURNER_STATES, vec![Reply::Silence]);
    assert_eq!(rig.client.request_key_turner_state().await, CmdResult::TimeOut);
}

#[tokio::test]
async fn single_flight_blocks_second_command() {
    let rig = rig();
    pair(&rig).await;

    // First command never gets an answer and occupies the permit until
    // its deadline; the second gives up at the semaphore timeout.
    rig.peer
        .script_response(CommandId::KEYTURNER_STATES, vec![Reply::Silence]);

    let first = rig.client.request_key_turner_state();
    let second = async {
        tokio::time::sleep(Duration::from_millis(30)).await;
        rig.client.request_battery_report().await
    };
    let (first, second) = tokio::join!(first, second);

    assert_eq!(first, CmdResult::TimeOut);
    assert_eq!(second, CmdResult::Failed);
}

#[tokio::test]
async fn heartbeat_guard_fails_stale_client() {
    let mut config = test_config();
    config.heartbeat_timeout = Duration::from_millis(50);
    let rig = rig_with(Arc::new(ScriptedLock::new()), lock::PAIRING_GDIO_UUID, config);
    pair(&rig).await;

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(rig.client.request_key_turner_state().await, CmdResult::Error);
}

#[tokio::test]
async fn subscribe_failure_triggers_service_refresh() {
    let rig = rig();
    pair(&rig).await;

    // The cached GATT table goes stale before the first data-channel use.
    rig.transport
        .fail_subscribe_until_refresh
        .store(true, std::sync::atomic::Ordering::SeqCst);
    rig.peer.script_response(
        CommandId::KEYTURNER_STATES,
        vec![Reply::Message(
            CommandId::KEYTURNER_STATES,
            key_turner_payload(0x01),
        )],
    );

    assert_eq!(rig.client.request_key_turner_state().await, CmdResult::Success);
    assert!(rig.transport.refresh_request_count() >= 1);
}

// ----------------------------------------------------------------------------
// Bulk retrieval
// ----------------------------------------------------------------------------

#[tokio::test]
async fn keypad_retrieval_waits_for_count_handshake() {
    let rig = rig();
    pair(&rig).await;

    rig.peer.script_response(
        CommandId::REQUEST_KEYPAD_CODES,
        vec![
            Reply::Message(CommandId::KEYPAD_CODE_COUNT, 2u16.to_le_bytes().to_vec()),
            Reply::Message(CommandId::KEYPAD_CODE, keypad_entry_payload(1, 111_111)),
            Reply::Message(CommandId::KEYPAD_CODE, keypad_entry_payload(2, 222_222)),
        ],
    );

    assert_eq!(rig.client.retrieve_keypad_entries(0, 10).await, CmdResult::Success);
    assert_eq!(rig.client.keypad_entry_count(), 2);
    let entries = rig.client.keypad_entries();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].code, 111_111);
    assert_eq!(entries[1].code_id, 2);
}

#[tokio::test]
async fn keypad_retrieval_times_out_on_missing_entries() {
    let rig = rig();
    pair(&rig).await;

    rig.peer.script_response(
        CommandId::REQUEST_KEYPAD_CODES,
        vec![
            Reply::Message(CommandId::KEYPAD_CODE_COUNT, 3u16.to_le_bytes().to_vec()),
            Reply::Message(CommandId::KEYPAD_CODE, keypad_entry_payload(1, 1)),
        ],
    );

    assert_eq!(rig.client.retrieve_keypad_entries(0, 3).await, CmdResult::TimeOut);
}

// ----------------------------------------------------------------------------
// Config read-modify-write
// ----------------------------------------------------------------------------

fn config_payload() -> Vec<u8> {
    let mut wire = Vec::new();
    wire.extend_from_slice(&7u32.to_le_bytes());
    let mut name = b"Front Door".to_vec();
    name.resize(32, 0);
    wire.extend_from_slice(&name);
    wire.extend_from_slice(&48.0f32.to_le_bytes());
    wire.extend_from_slice(&16.0f32.to_le_bytes());
    wire.extend_from_slice(&[0, 1, 1, 1, 3]); // flags + brightness
    TimeValue::default().encode(&mut wire);
    wire.extend_from_slice(&60i16.to_le_bytes());
    wire.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 0]);
    wire.extend_from_slice(&[1, 0, 0]); // firmware
    wire.extend_from_slice(&[2, 0]); // hardware
    wire.push(0);
    wire.extend_from_slice(&37u16.to_le_bytes());
    wire
}

#[tokio::test]
async fn config_mutator_does_read_modify_write() {
    let rig = rig();
    pair(&rig).await;

    rig.peer.script_response(
        CommandId::REQUEST_CONFIG,
        vec![Reply::Message(CommandId::CONFIG, config_payload())],
    );
    rig.peer
        .script_response(CommandId::SET_CONFIG, vec![Reply::Status(STATUS_COMPLETE)]);

    let writes_before = rig.transport.writes().len();
    assert_eq!(rig.client.set_led_brightness(5).await, CmdResult::Success);

    // Two challenge-response exchanges: four encrypted writes in total.
    let writes: Vec<_> = rig.transport.writes().into_iter().skip(writes_before).collect();
    let usdio_writes: Vec<_> = writes
        .iter()
        .filter(|(characteristic, _)| *characteristic == lock::USDIO_UUID)
        .collect();
    assert_eq!(usdio_writes.len(), 4);

    // The written record carries the modified brightness and the
    // otherwise-unchanged name.
    let key = rig.peer.shared_key().unwrap();
    let set_config = usdio_writes
        .iter()
        .filter_map(|(_, frame)| nuki_core::frame::decode_encrypted(frame, &key).ok())
        .find(|(command, _)| *command == CommandId::SET_CONFIG)
        .expect("SetConfig frame");
    let payload = set_config.1;
    assert_eq!(&payload[..10], b"Front Door");
    assert_eq!(payload[44], 5); // led brightness
}

// ----------------------------------------------------------------------------
// Unpair & beacons
// ----------------------------------------------------------------------------

#[tokio::test]
async fn unpair_is_idempotent() {
    let rig = rig();
    pair(&rig).await;
    assert!(rig.client.is_paired());

    rig.client.unpair();
    assert!(!rig.client.is_paired());
    rig.client.unpair();
    assert!(!rig.client.is_paired());
    assert_eq!(
        rig.client.request_key_turner_state().await,
        CmdResult::NotPaired
    );
    // The stored address survives for re-pairing with the same device.
    assert_eq!(rig.client.stored_address(), Some(LOCK_ADDRESS));
}

#[tokio::test]
async fn status_beacon_lsb_toggle_emits_events() {
    let rig = rig();
    pair(&rig).await;

    rig.scanner.publish(&ibeacon_advertisement(0xC4)); // LSB 0
    rig.scanner.publish(&ibeacon_advertisement(0xC5)); // LSB 1
    rig.scanner.publish(&ibeacon_advertisement(0xC4)); // LSB 0

    let beacon_events: Vec<_> = rig
        .events
        .events()
        .into_iter()
        .filter(|event| {
            matches!(
                event,
                NukiEvent::KeyTurnerStatusUpdated | NukiEvent::KeyTurnerStatusReset
            )
        })
        .collect();
    assert_eq!(
        beacon_events,
        vec![
            NukiEvent::KeyTurnerStatusUpdated,
            NukiEvent::KeyTurnerStatusReset,
        ]
    );
    assert_eq!(rig.client.rssi(), -58);
    assert!(rig.client.last_beacon().is_some());
}

#[tokio::test]
async fn wrong_variant_pin_is_rejected_locally() {
    let rig = rig();
    pair(&rig).await; // classic device

    let writes_before = rig.transport.writes().len();
    let result = rig.client.set_security_pin(SecurityPin::Ultra(123_456)).await;
    assert_eq!(result, CmdResult::Failed);
    // rejected before any traffic
    assert_eq!(rig.transport.writes().len(), writes_before);
}

#[tokio::test]
async fn set_security_pin_persists_on_success() {
    let rig = rig();
    pair(&rig).await;

    rig.peer.script_response(
        CommandId::SET_SECURITY_PIN,
        vec![Reply::Status(STATUS_COMPLETE)],
    );
    assert_eq!(
        rig.client.set_security_pin(SecurityPin::Classic(9999)).await,
        CmdResult::Success
    );
    assert_eq!(rig.client.stored_pin(), SecurityPin::Classic(9999));
}
