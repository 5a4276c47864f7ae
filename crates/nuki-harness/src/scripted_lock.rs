//! Scripted lock peer
//!
//! Implements the device side of the protocol well enough to drive the
//! engine end to end: it performs the real key agreement, issues
//! challenges, verifies the pairing authenticators and answers encrypted
//! commands from a per-command script. Unscripted commands stay silent so
//! deadline behavior can be exercised.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use tracing::{debug, warn};

use nuki_core::crypto::{generate_nonce, hmac_sha256, PairingKeypair};
use nuki_core::frame;
use nuki_core::types::{AuthorizationId, CommandId, SharedKey, STATUS_COMPLETE};

/// Which channel a device response goes out on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OutChannel {
    Gdio,
    Usdio,
}

/// One scripted device response
#[derive(Debug, Clone)]
pub enum Reply {
    /// Encrypted message with the given command id and payload
    Message(CommandId, Vec<u8>),
    /// `ErrorReport` with the given error code, naming the command
    Error(u8, CommandId),
    /// `Status` message with the given status byte
    Status(u8),
    /// Do not respond at all
    Silence,
}

/// Pairing-phase scratch state on the device side
#[derive(Default)]
struct PairingSide {
    client_public: Option<[u8; 32]>,
    issued_challenge: Option<[u8; 32]>,
}

/// A lock (or opener) standing in for the real device
pub struct ScriptedLock {
    keypair: PairingKeypair,
    auth_id: AuthorizationId,
    device_uuid: [u8; 16],
    shared_key: Mutex<Option<SharedKey>>,
    pairing: Mutex<PairingSide>,
    /// Challenge handed out on the user channel, checked against commands
    user_challenge: Mutex<Option<[u8; 32]>>,
    /// Scripted responses per command id, consumed front to back
    script: Mutex<HashMap<u16, VecDeque<Vec<Reply>>>>,
    /// When set, the device ignores the public key request (pairing
    /// timeout scenarios)
    mute_pairing: Mutex<bool>,
    /// Ultra flow: authorization data arrives encrypted and is answered
    /// with the short authorization id layout
    ultra: bool,
}

impl ScriptedLock {
    pub fn new() -> Self {
        Self {
            keypair: PairingKeypair::generate(),
            auth_id: AuthorizationId::from_u32(0x0102_0304),
            device_uuid: generate_nonce(),
            shared_key: Mutex::new(None),
            pairing: Mutex::new(PairingSide::default()),
            user_challenge: Mutex::new(None),
            script: Mutex::new(HashMap::new()),
            mute_pairing: Mutex::new(false),
            ultra: false,
        }
    }

    pub fn new_ultra() -> Self {
        Self {
            ultra: true,
            ..Self::new()
        }
    }

    /// The authorization id this device hands out
    pub fn auth_id(&self) -> AuthorizationId {
        self.auth_id
    }

    /// The shared key derived during pairing, once known
    pub fn shared_key(&self) -> Option<SharedKey> {
        *self.shared_key.lock().unwrap()
    }

    /// Install a pre-agreed key, skipping pairing for command tests
    pub fn install_shared_key(&self, key: SharedKey) {
        *self.shared_key.lock().unwrap() = Some(key);
    }

    /// Stop answering the pairing public-key request
    pub fn mute_pairing(&self) {
        *self.mute_pairing.lock().unwrap() = true;
    }

    /// Queue the replies for the next occurrence of `command`
    pub fn script_response(&self, command: CommandId, replies: Vec<Reply>) {
        self.script
            .lock()
            .unwrap()
            .entry(command.0)
            .or_default()
            .push_back(replies);
    }

    fn next_scripted(&self, command: CommandId) -> Option<Vec<Reply>> {
        self.script
            .lock()
            .unwrap()
            .get_mut(&command.0)
            .and_then(VecDeque::pop_front)
    }

    /// Process one GATT write; returns the indications to send back
    pub(crate) fn handle_write(
        &self,
        channel: OutChannel,
        data: &[u8],
    ) -> Vec<(OutChannel, Vec<u8>)> {
        match channel {
            OutChannel::Gdio => self.handle_gdio(data),
            OutChannel::Usdio => self.handle_usdio(data),
        }
    }

    // ------------------------------------------------------------------
    // Pairing channel
    // ------------------------------------------------------------------

    fn handle_gdio(&self, data: &[u8]) -> Vec<(OutChannel, Vec<u8>)> {
        let (command, payload) = match frame::decode_plain(data) {
            Ok(decoded) => decoded,
            Err(err) => {
                warn!(%err, "scripted lock dropping bad plain frame");
                return Vec::new();
            }
        };
        debug!(%command, "scripted lock received plain frame");

        match command {
            CommandId::REQUEST_DATA => {
                if *self.mute_pairing.lock().unwrap() {
                    return Vec::new();
                }
                vec![plain(CommandId::PUBLIC_KEY, &self.keypair.public_bytes())]
            }
            CommandId::PUBLIC_KEY => {
                let client_public: [u8; 32] = match payload.as_slice().try_into() {
                    Ok(key) => key,
                    Err(_) => return Vec::new(),
                };
                let key = self.keypair.derive_shared_key(&client_public);
                *self.shared_key.lock().unwrap() = Some(key);

                let challenge: [u8; 32] = generate_nonce();
                let mut pairing = self.pairing.lock().unwrap();
                pairing.client_public = Some(client_public);
                pairing.issued_challenge = Some(challenge);
                vec![plain(CommandId::CHALLENGE, &challenge)]
            }
            CommandId::AUTHORIZATION_AUTHENTICATOR => {
                let key = match self.shared_key() {
                    Some(key) => key,
                    None => return Vec::new(),
                };
                {
                    let pairing = self.pairing.lock().unwrap();
                    let (Some(client_public), Some(challenge)) =
                        (pairing.client_public, pairing.issued_challenge)
                    else {
                        return Vec::new();
                    };
                    let mut input = Vec::with_capacity(96);
                    input.extend_from_slice(&client_public);
                    input.extend_from_slice(&self.keypair.public_bytes());
                    input.extend_from_slice(&challenge);
                    if payload != hmac_sha256(&key, &input) {
                        warn!("scripted lock: authenticator mismatch");
                        return Vec::new();
                    }
                }

                let challenge: [u8; 32] = generate_nonce();
                self.pairing.lock().unwrap().issued_challenge = Some(challenge);
                vec![plain(CommandId::CHALLENGE, &challenge)]
            }
            CommandId::AUTHORIZATION_DATA => {
                let key = match self.shared_key() {
                    Some(key) => key,
                    None => return Vec::new(),
                };
                // authenticator (32) ‖ id type (1) ‖ app id (4) ‖ name (32)
                // ‖ client nonce (32)
                if payload.len() != 101 {
                    warn!(len = payload.len(), "scripted lock: bad authorization data");
                    return Vec::new();
                }
                {
                    let pairing = self.pairing.lock().unwrap();
                    let Some(challenge) = pairing.issued_challenge else {
                        return Vec::new();
                    };
                    let mut input = payload[32..].to_vec();
                    input.extend_from_slice(&challenge);
                    if payload[..32] != hmac_sha256(&key, &input) {
                        warn!("scripted lock: authorization data authenticator mismatch");
                        return Vec::new();
                    }
                }

                let challenge: [u8; 32] = generate_nonce();
                self.pairing.lock().unwrap().issued_challenge = Some(challenge);

                let mut body = Vec::with_capacity(52);
                body.extend_from_slice(self.auth_id.as_bytes());
                body.extend_from_slice(&self.device_uuid);
                body.extend_from_slice(&challenge);
                let mut message = hmac_sha256(&key, &body).to_vec();
                message.extend_from_slice(&body);
                vec![plain(CommandId::AUTHORIZATION_ID, &message)]
            }
            CommandId::AUTHORIZATION_ID_CONFIRMATION => {
                let key = match self.shared_key() {
                    Some(key) => key,
                    None => return Vec::new(),
                };
                let pairing = self.pairing.lock().unwrap();
                let Some(challenge) = pairing.issued_challenge else {
                    return Vec::new();
                };
                let mut input = self.auth_id.as_bytes().to_vec();
                input.extend_from_slice(&challenge);
                let expected = hmac_sha256(&key, &input);
                if payload.len() != 36 || payload[..32] != expected {
                    warn!("scripted lock: confirmation mismatch");
                    return Vec::new();
                }
                vec![plain(CommandId::STATUS, &[STATUS_COMPLETE])]
            }
            other => {
                warn!(command = %other, "scripted lock: unexpected plain command");
                Vec::new()
            }
        }
    }

    // ------------------------------------------------------------------
    // User channel
    // ------------------------------------------------------------------

    fn handle_usdio(&self, data: &[u8]) -> Vec<(OutChannel, Vec<u8>)> {
        let key = match self.shared_key() {
            Some(key) => key,
            None => {
                warn!("scripted lock: encrypted frame before key agreement");
                return Vec::new();
            }
        };
        let (command, payload) = match frame::decode_encrypted(data, &key) {
            Ok(decoded) => decoded,
            Err(err) => {
                warn!(%err, "scripted lock dropping bad encrypted frame");
                return Vec::new();
            }
        };
        debug!(%command, "scripted lock received encrypted frame");

        // Ultra pairing: encrypted authorization data, answered with the
        // short authorization id layout.
        if command == CommandId::AUTHORIZATION_DATA && self.ultra {
            let mut body = Vec::with_capacity(20);
            body.extend_from_slice(self.auth_id.as_bytes());
            body.extend_from_slice(&self.device_uuid);
            return vec![self.encrypted(&key, CommandId::AUTHORIZATION_ID, &body)];
        }

        if command == CommandId::REQUEST_DATA {
            if payload.len() < 2 {
                return Vec::new();
            }
            let requested = CommandId::from_le_bytes([payload[0], payload[1]]);
            if requested == CommandId::CHALLENGE {
                let challenge: [u8; 32] = generate_nonce();
                *self.user_challenge.lock().unwrap() = Some(challenge);
                return vec![self.encrypted(&key, CommandId::CHALLENGE, &challenge)];
            }
            return self.play_script(&key, requested, &[]);
        }

        // Challenge-bound command: the last 32 payload bytes (before an
        // optional PIN) must echo the issued nonce.
        if let Some(expected) = *self.user_challenge.lock().unwrap() {
            if !payload
                .windows(32)
                .any(|window| window == expected.as_slice())
            {
                warn!(%command, "scripted lock: challenge nonce missing from command");
                return Vec::new();
            }
        }
        *self.user_challenge.lock().unwrap() = None;

        self.play_script(&key, command, &payload)
    }

    fn play_script(
        &self,
        key: &SharedKey,
        command: CommandId,
        _payload: &[u8],
    ) -> Vec<(OutChannel, Vec<u8>)> {
        let Some(replies) = self.next_scripted(command) else {
            warn!(%command, "scripted lock: no response scripted, staying silent");
            return Vec::new();
        };

        replies
            .into_iter()
            .filter_map(|reply| match reply {
                Reply::Message(command, payload) => {
                    Some(self.encrypted(key, command, &payload))
                }
                Reply::Error(code, offending) => {
                    let mut payload = vec![code];
                    payload.extend_from_slice(&offending.to_le_bytes());
                    Some(self.encrypted(key, CommandId::ERROR_REPORT, &payload))
                }
                Reply::Status(status) => {
                    Some(self.encrypted(key, CommandId::STATUS, &[status]))
                }
                Reply::Silence => None,
            })
            .collect()
    }

    fn encrypted(
        &self,
        key: &SharedKey,
        command: CommandId,
        payload: &[u8],
    ) -> (OutChannel, Vec<u8>) {
        let frame = frame::encode_encrypted(command, payload, self.auth_id, key)
            .expect("encrypting scripted reply");
        (OutChannel::Usdio, frame)
    }
}

impl Default for ScriptedLock {
    fn default() -> Self {
        Self::new()
    }
}

fn plain(command: CommandId, payload: &[u8]) -> (OutChannel, Vec<u8>) {
    (OutChannel::Gdio, frame::encode_plain(command, payload))
}
