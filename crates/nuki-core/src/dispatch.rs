//! Inbound message dispatch
//!
//! Every decoded frame ends up here. The dispatcher writes whole records
//! into the shared receive state first and only then publishes the command
//! code; the polling state machines treat `last_command` as the signal that
//! everything else for this message is in place.

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::crypto::hmac_sha256;
use crate::errors::FrameError;
use crate::profile::DeviceProfile;
use crate::records::{AuthorizationEntry, KeypadEntry, LogEntry, TimeControlEntry};
use crate::transport::{EventHandler, NukiEvent};
use crate::types::{AuthorizationId, CommandId, SharedKey, ERROR_BAD_PIN};

// ----------------------------------------------------------------------------
// Receive State
// ----------------------------------------------------------------------------

/// Fields written by the indication context and polled by the state
/// machines. One instance per device, guarded by the client's state mutex.
#[derive(Debug)]
pub(crate) struct RxState<I> {
    /// Phase of the command machine currently executing
    pub command_state: crate::command::CommandState,
    /// Command code of the last fully-processed message; the wait signal
    pub last_command: Option<CommandId>,
    /// Set when the last decrypted response carried a valid CRC
    pub crc_ok: bool,
    /// Error byte of the last `ErrorReport`
    pub error_code: u8,
    /// Peer public key received while pairing
    pub remote_public_key: Option<[u8; 32]>,
    /// Challenge nonce, consumed exactly once per authenticated exchange
    pub challenge_nonce: Option<[u8; 32]>,
    /// Status byte of the last `Status` message
    pub received_status: Option<u8>,
    /// Authorization id delivered during pairing
    pub auth_id: Option<AuthorizationId>,
    /// Device identifier delivered alongside the authorization id
    pub device_uuid: Option<[u8; 16]>,

    // Bulk-retrieval inboxes shared by all device kinds.
    pub keypad_code_count: Option<u16>,
    pub keypad_entries: Vec<KeypadEntry>,
    pub auth_entry_count: Option<u16>,
    pub authorization_entries: Vec<AuthorizationEntry>,
    pub logging_enabled: bool,
    pub log_entry_count: Option<u16>,
    pub log_entries: Vec<LogEntry>,
    pub time_control_entry_count: Option<u16>,
    pub time_control_entries: Vec<TimeControlEntry>,

    /// Device-specific records decoded by the profile
    pub inbox: I,
}

impl<I: Default> Default for RxState<I> {
    fn default() -> Self {
        Self {
            command_state: crate::command::CommandState::Idle,
            last_command: None,
            crc_ok: false,
            error_code: 0,
            remote_public_key: None,
            challenge_nonce: None,
            received_status: None,
            auth_id: None,
            device_uuid: None,
            keypad_code_count: None,
            keypad_entries: Vec::new(),
            auth_entry_count: None,
            authorization_entries: Vec::new(),
            logging_enabled: false,
            log_entry_count: None,
            log_entries: Vec::new(),
            time_control_entry_count: None,
            time_control_entries: Vec::new(),
            inbox: I::default(),
        }
    }
}

impl<I> RxState<I> {
    /// Reset the wait signal before issuing a new request
    pub fn arm(&mut self) {
        self.last_command = None;
    }

    /// Take the challenge nonce, consuming it
    pub fn take_challenge(&mut self) -> Option<[u8; 32]> {
        self.challenge_nonce.take()
    }
}

// ----------------------------------------------------------------------------
// Dispatcher
// ----------------------------------------------------------------------------

/// Context the dispatcher needs beyond the receive state itself
pub(crate) struct DispatchContext<'a> {
    /// Shared key for verifying the pairing authenticator, when known
    pub shared_key: Option<&'a SharedKey>,
    /// Ultra devices deliver a differently laid out `AuthorizationId`
    pub is_ultra: bool,
    pub events: Option<&'a Arc<dyn EventHandler>>,
}

/// Process one decoded message.
///
/// The profile gets the first shot at device-specific records; the shared
/// dictionary below covers the protocol-level messages. Malformed records
/// are dropped without publishing a command code, so the waiting state
/// machine runs into its deadline instead of consuming garbage.
pub(crate) fn handle_message<P: DeviceProfile>(
    profile: &P,
    rx: &mut RxState<P::Inbox>,
    ctx: DispatchContext<'_>,
    command: CommandId,
    payload: &[u8],
) {
    if profile.dispatch(&mut rx.inbox, command, payload) {
        rx.last_command = Some(command);
        return;
    }

    let result: Result<(), FrameError> = match command {
        CommandId::REQUEST_DATA => Ok(()),
        CommandId::PUBLIC_KEY => fixed::<32>(payload).map(|key| {
            debug!("received remote public key");
            rx.remote_public_key = Some(key);
        }),
        CommandId::CHALLENGE => fixed::<32>(payload).map(|nonce| {
            rx.challenge_nonce = Some(nonce);
        }),
        CommandId::AUTHORIZATION_ID => handle_authorization_id(rx, &ctx, payload),
        CommandId::STATUS => match payload.first() {
            Some(&status) => {
                rx.received_status = Some(status);
                Ok(())
            }
            None => Err(FrameError::BadFrame("empty status message")),
        },
        CommandId::ERROR_REPORT => match payload.first() {
            Some(&code) => {
                error!(code = %format_args!("0x{code:02x}"), "device reported an error");
                rx.error_code = code;
                if code == ERROR_BAD_PIN {
                    if let Some(events) = ctx.events {
                        events.notify(NukiEvent::ErrorBadPin);
                    }
                }
                Ok(())
            }
            None => Err(FrameError::BadFrame("empty error report")),
        },
        CommandId::AUTHORIZATION_ENTRY => AuthorizationEntry::decode(payload).map(|entry| {
            rx.authorization_entries.push(entry);
        }),
        CommandId::AUTHORIZATION_ENTRY_COUNT => u16_payload(payload).map(|count| {
            rx.auth_entry_count = Some(count);
        }),
        CommandId::KEYPAD_CODE_COUNT => u16_payload(payload).map(|count| {
            rx.keypad_code_count = Some(count);
        }),
        CommandId::KEYPAD_CODE => KeypadEntry::decode(payload).map(|entry| {
            rx.keypad_entries.push(entry);
        }),
        CommandId::LOG_ENTRY_COUNT => {
            if payload.len() < 3 {
                Err(FrameError::BadFrame("log entry count truncated"))
            } else {
                rx.logging_enabled = payload[0] != 0;
                rx.log_entry_count = Some(u16::from_le_bytes([payload[1], payload[2]]));
                Ok(())
            }
        }
        CommandId::LOG_ENTRY => LogEntry::decode(payload).map(|entry| {
            rx.log_entries.push(entry);
        }),
        CommandId::TIME_CONTROL_ENTRY_COUNT => u16_payload(payload).map(|count| {
            rx.time_control_entry_count = Some(count);
        }),
        CommandId::TIME_CONTROL_ENTRY => TimeControlEntry::decode(payload).map(|entry| {
            rx.time_control_entries.push(entry);
        }),
        CommandId::KEYPAD_CODE_ID | CommandId::KEYPAD_ACTION => Ok(()),
        other => {
            warn!(command = %other, "unknown return command");
            Ok(())
        }
    };

    match result {
        Ok(()) => rx.last_command = Some(command),
        Err(err) => warn!(command = %command, %err, "dropping malformed record"),
    }
}

/// `AuthorizationId` is the one pairing message whose authenticity the
/// client checks itself: authenticator (32) ‖ auth id (4) ‖ device uuid
/// (16) ‖ next challenge (32), where the authenticator is HMAC-SHA256 over
/// the rest. Ultra devices skip the authenticator and the extra challenge.
fn handle_authorization_id<I>(
    rx: &mut RxState<I>,
    ctx: &DispatchContext<'_>,
    payload: &[u8],
) -> Result<(), FrameError> {
    if ctx.is_ultra {
        if payload.len() < 20 {
            return Err(FrameError::BadFrame("authorization id truncated"));
        }
        rx.auth_id = Some(AuthorizationId::new(payload[..4].try_into().unwrap()));
        rx.device_uuid = Some(payload[4..20].try_into().unwrap());
        // No confirmation round on ultra: the id doubles as completion.
        rx.received_status = Some(0);
        return Ok(());
    }

    if payload.len() < 84 {
        return Err(FrameError::BadFrame("authorization id truncated"));
    }
    let authenticator: [u8; 32] = payload[..32].try_into().unwrap();
    if let Some(key) = ctx.shared_key {
        let expected = hmac_sha256(key, &payload[32..84]);
        if expected != authenticator {
            warn!("authorization id authenticator mismatch, dropping");
            return Err(FrameError::DecryptFailed);
        }
    }
    rx.auth_id = Some(AuthorizationId::new(payload[32..36].try_into().unwrap()));
    rx.device_uuid = Some(payload[36..52].try_into().unwrap());
    rx.challenge_nonce = Some(payload[52..84].try_into().unwrap());
    Ok(())
}

fn fixed<const N: usize>(payload: &[u8]) -> Result<[u8; N], FrameError> {
    payload
        .get(..N)
        .and_then(|s| s.try_into().ok())
        .ok_or(FrameError::BadFrame("payload shorter than record"))
}

fn u16_payload(payload: &[u8]) -> Result<u16, FrameError> {
    if payload.len() < 2 {
        return Err(FrameError::BadFrame("count payload truncated"));
    }
    Ok(u16::from_le_bytes([payload[0], payload[1]]))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::STATUS_COMPLETE;

    struct NullProfile;

    impl DeviceProfile for NullProfile {
        type Inbox = ();

        fn pairing_service(&self, _ultra: bool) -> uuid::Uuid {
            uuid::Uuid::nil()
        }
        fn gdio_characteristic(&self, _ultra: bool) -> uuid::Uuid {
            uuid::Uuid::nil()
        }
        fn data_service(&self) -> uuid::Uuid {
            uuid::Uuid::nil()
        }
        fn usdio_characteristic(&self) -> uuid::Uuid {
            uuid::Uuid::nil()
        }
        fn dispatch(&self, _inbox: &mut (), _command: CommandId, _payload: &[u8]) -> bool {
            false
        }
    }

    fn ctx() -> DispatchContext<'static> {
        DispatchContext {
            shared_key: None,
            is_ultra: false,
            events: None,
        }
    }

    #[test]
    fn test_challenge_stored_and_signalled_last() {
        let mut rx = RxState::<()>::default();
        handle_message(&NullProfile, &mut rx, ctx(), CommandId::CHALLENGE, &[7u8; 32]);
        assert_eq!(rx.take_challenge(), Some([7u8; 32]));
        assert_eq!(rx.last_command, Some(CommandId::CHALLENGE));
        // consuming the nonce does not clear the signal
        assert_eq!(rx.last_command, Some(CommandId::CHALLENGE));
    }

    #[test]
    fn test_truncated_challenge_dropped() {
        let mut rx = RxState::<()>::default();
        handle_message(&NullProfile, &mut rx, ctx(), CommandId::CHALLENGE, &[7u8; 10]);
        assert!(rx.challenge_nonce.is_none());
        assert!(rx.last_command.is_none());
    }

    #[test]
    fn test_status_byte() {
        let mut rx = RxState::<()>::default();
        handle_message(
            &NullProfile,
            &mut rx,
            ctx(),
            CommandId::STATUS,
            &[STATUS_COMPLETE],
        );
        assert_eq!(rx.received_status, Some(STATUS_COMPLETE));
    }

    #[test]
    fn test_authorization_id_verified() {
        let key = SharedKey::new([0x55; 32]);
        let mut body = Vec::new();
        body.extend_from_slice(&[0x04, 0x03, 0x02, 0x01]); // auth id
        body.extend_from_slice(&[0xEE; 16]); // device uuid
        body.extend_from_slice(&[0xCC; 32]); // next challenge
        let mut payload = hmac_sha256(&key, &body).to_vec();
        payload.extend_from_slice(&body);

        let mut rx = RxState::<()>::default();
        let ctx = DispatchContext {
            shared_key: Some(&key),
            is_ultra: false,
            events: None,
        };
        handle_message(&NullProfile, &mut rx, ctx, CommandId::AUTHORIZATION_ID, &payload);
        assert_eq!(rx.auth_id, Some(AuthorizationId::new([0x04, 0x03, 0x02, 0x01])));
        assert_eq!(rx.challenge_nonce, Some([0xCC; 32]));
    }

    #[test]
    fn test_authorization_id_bad_mac_dropped() {
        let key = SharedKey::new([0x55; 32]);
        let mut payload = vec![0u8; 84];
        payload[0] = 0xFF; // wrong authenticator
        let mut rx = RxState::<()>::default();
        let ctx = DispatchContext {
            shared_key: Some(&key),
            is_ultra: false,
            events: None,
        };
        handle_message(&NullProfile, &mut rx, ctx, CommandId::AUTHORIZATION_ID, &payload);
        assert!(rx.auth_id.is_none());
        assert!(rx.last_command.is_none());
    }

    #[test]
    fn test_ultra_authorization_id_completes() {
        let mut rx = RxState::<()>::default();
        let ctx = DispatchContext {
            shared_key: None,
            is_ultra: true,
            events: None,
        };
        let mut payload = vec![0u8; 20];
        payload[..4].copy_from_slice(&[1, 0, 0, 0]);
        handle_message(&NullProfile, &mut rx, ctx, CommandId::AUTHORIZATION_ID, &payload);
        assert_eq!(rx.auth_id, Some(AuthorizationId::from_u32(1)));
        assert_eq!(rx.received_status, Some(0));
    }

    #[test]
    fn test_bulk_inbox_accumulates() {
        let mut rx = RxState::<()>::default();
        handle_message(
            &NullProfile,
            &mut rx,
            ctx(),
            CommandId::KEYPAD_CODE_COUNT,
            &2u16.to_le_bytes(),
        );
        assert_eq!(rx.keypad_code_count, Some(2));

        handle_message(
            &NullProfile,
            &mut rx,
            ctx(),
            CommandId::LOG_ENTRY_COUNT,
            &[1, 0x10, 0x00],
        );
        assert!(rx.logging_enabled);
        assert_eq!(rx.log_entry_count, Some(16));
    }

    #[test]
    fn test_bad_pin_raises_event() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        #[derive(Default)]
        struct Counter(AtomicUsize);
        impl EventHandler for Counter {
            fn notify(&self, event: NukiEvent) {
                if event == NukiEvent::ErrorBadPin {
                    self.0.fetch_add(1, Ordering::SeqCst);
                }
            }
        }

        let counter = Arc::new(Counter::default());
        let handler: Arc<dyn EventHandler> = counter.clone();
        let mut rx = RxState::<()>::default();
        let ctx = DispatchContext {
            shared_key: None,
            is_ultra: false,
            events: Some(&handler),
        };
        handle_message(
            &NullProfile,
            &mut rx,
            ctx,
            CommandId::ERROR_REPORT,
            &[ERROR_BAD_PIN, 0x0D, 0x00],
        );
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert_eq!(rx.error_code, ERROR_BAD_PIN);
        assert_eq!(rx.last_command, Some(CommandId::ERROR_REPORT));
    }
}
