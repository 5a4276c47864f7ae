//! Pairing handshake
//!
//! Drives the authorization handshake against a device in pairing mode:
//! Curve25519 key agreement, HSalsa20 key derivation and the HMAC-SHA256
//! challenge exchanges. Classic devices run the three-round authorization
//! dance over the plaintext channel; ultra devices send a single encrypted
//! authorization message carrying the preconfigured PIN.
//!
//! The engine is a polling state machine with one overall deadline. Send
//! failures do not abort it: the peer simply never answers and the
//! deadline converts that into [`PairingResult::Timeout`].

use std::sync::Mutex;
use std::time::Instant;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::{DeviceIdentity, NukiConfig};
use crate::crypto::{generate_nonce, hmac_sha256, PairingKeypair};
use crate::dispatch::RxState;
use crate::types::{AuthorizationId, CommandId, SharedKey};

// ----------------------------------------------------------------------------
// Types
// ----------------------------------------------------------------------------

/// Who this authorization represents, sent in the classic handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IdType {
    App = 0,
    Bridge = 1,
    Fob = 2,
    Keypad = 3,
}

/// Phases of the pairing handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingState {
    InitPairing,
    ReqRemPubKey,
    RecRemPubKey,
    SendPubKey,
    GenKeyPair,
    CalculateAuth,
    SendAuth,
    SendAuthData,
    SendAuthIdConf,
    RecStatus,
    Success,
    Timeout,
}

/// Everything the engine produces on success
#[derive(Debug, Clone, Copy)]
pub(crate) struct PairingOutput {
    pub shared_key: SharedKey,
    pub auth_id: AuthorizationId,
}

/// Inputs for one pairing run
pub(crate) struct PairingParams<'a> {
    pub identity: &'a DeviceIdentity,
    pub id_type: IdType,
    /// Ultra devices take the encrypted authorization-data shortcut
    pub is_ultra: bool,
    /// 6-digit passkey, required for the ultra flow
    pub ultra_pin: u32,
}

// ----------------------------------------------------------------------------
// Link seam
// ----------------------------------------------------------------------------

/// Wire access the pairing engine needs. The encrypted variant is only
/// exercised by the ultra authorization message.
#[async_trait]
pub(crate) trait PairingLink: Send + Sync {
    async fn send_plain(&self, command: CommandId, payload: &[u8]) -> bool;
    async fn send_encrypted(&self, command: CommandId, payload: &[u8]) -> bool;
    /// Make the freshly derived key visible to the frame router so inbound
    /// encrypted frames (ultra) and authenticator checks can use it.
    fn publish_shared_key(&self, key: SharedKey);
}

// ----------------------------------------------------------------------------
// Engine
// ----------------------------------------------------------------------------

pub(crate) async fn run_pairing<I: Send>(
    link: &dyn PairingLink,
    rx: &Mutex<RxState<I>>,
    config: &NukiConfig,
    params: PairingParams<'_>,
) -> Result<PairingOutput, PairingState> {
    let deadline = Instant::now() + config.pairing_timeout;
    let mut state = PairingState::InitPairing;
    debug!(?state, ultra = params.is_ultra, "starting pairing handshake");

    // InitPairing: scratch state from any earlier attempt is discarded and
    // a fresh ephemeral keypair is minted.
    {
        let mut rx = rx.lock().unwrap();
        rx.remote_public_key = None;
        rx.challenge_nonce = None;
        rx.received_status = None;
        rx.auth_id = None;
        rx.device_uuid = None;
    }
    let keypair = PairingKeypair::generate();
    enter(&mut state, PairingState::ReqRemPubKey);

    // Request the device's public key.
    link.send_plain(CommandId::REQUEST_DATA, &CommandId::PUBLIC_KEY.to_le_bytes())
        .await;
    enter(&mut state, PairingState::RecRemPubKey);

    let remote_public = match wait(rx, config, deadline, |rx| rx.remote_public_key).await {
        Some(key) => key,
        None => return Err(timed_out(state)),
    };

    // Answer with ours.
    enter(&mut state, PairingState::SendPubKey);
    link.send_plain(CommandId::PUBLIC_KEY, &keypair.public_bytes())
        .await;

    // Key agreement and KDF.
    enter(&mut state, PairingState::GenKeyPair);
    let shared_key = keypair.derive_shared_key(&remote_public);
    link.publish_shared_key(shared_key);
    debug!("derived long-term shared key");

    // First challenge binds both public keys to the new key.
    enter(&mut state, PairingState::CalculateAuth);
    let challenge = match wait(rx, config, deadline, |rx| rx.take_challenge()).await {
        Some(nonce) => nonce,
        None => return Err(timed_out(state)),
    };
    let mut auth_input = Vec::with_capacity(96);
    auth_input.extend_from_slice(&keypair.public_bytes());
    auth_input.extend_from_slice(&remote_public);
    auth_input.extend_from_slice(&challenge);
    let authenticator = hmac_sha256(&shared_key, &auth_input);

    enter(&mut state, PairingState::SendAuth);
    link.send_plain(CommandId::AUTHORIZATION_AUTHENTICATOR, &authenticator)
        .await;

    enter(&mut state, PairingState::SendAuthData);
    if params.is_ultra {
        // Ultra: one encrypted message with id, name and the 4-byte PIN;
        // the authorization id response completes the handshake.
        let mut message = Vec::with_capacity(40);
        message.extend_from_slice(&params.identity.device_id.to_le_bytes());
        message.extend_from_slice(&params.identity.name_bytes());
        message.extend_from_slice(&params.ultra_pin.to_le_bytes());
        link.send_encrypted(CommandId::AUTHORIZATION_DATA, &message)
            .await;
    } else {
        // Classic: a second challenge authenticates the authorization data.
        let challenge = match wait(rx, config, deadline, |rx| rx.take_challenge()).await {
            Some(nonce) => nonce,
            None => return Err(timed_out(state)),
        };

        let client_nonce: [u8; 32] = generate_nonce();
        let mut auth_data = Vec::with_capacity(69);
        auth_data.push(params.id_type as u8);
        auth_data.extend_from_slice(&params.identity.device_id.to_le_bytes());
        auth_data.extend_from_slice(&params.identity.name_bytes());
        auth_data.extend_from_slice(&client_nonce);

        let mut mac_input = auth_data.clone();
        mac_input.extend_from_slice(&challenge);
        let authenticator = hmac_sha256(&shared_key, &mac_input);

        let mut message = Vec::with_capacity(101);
        message.extend_from_slice(&authenticator);
        message.extend_from_slice(&auth_data);
        link.send_plain(CommandId::AUTHORIZATION_DATA, &message).await;

        // The authorization id arrives with a third challenge, confirmed
        // with one last authenticator.
        enter(&mut state, PairingState::SendAuthIdConf);
        let auth_id = match wait(rx, config, deadline, |rx| rx.auth_id).await {
            Some(id) => id,
            None => return Err(timed_out(state)),
        };
        let challenge = match wait(rx, config, deadline, |rx| rx.take_challenge()).await {
            Some(nonce) => nonce,
            None => return Err(timed_out(state)),
        };

        let mut confirm_input = Vec::with_capacity(36);
        confirm_input.extend_from_slice(auth_id.as_bytes());
        confirm_input.extend_from_slice(&challenge);
        let authenticator = hmac_sha256(&shared_key, &confirm_input);

        let mut message = Vec::with_capacity(36);
        message.extend_from_slice(&authenticator);
        message.extend_from_slice(auth_id.as_bytes());
        link.send_plain(CommandId::AUTHORIZATION_ID_CONFIRMATION, &message)
            .await;
    }

    // Final status from the device closes the handshake.
    enter(&mut state, PairingState::RecStatus);
    let complete =
        wait(rx, config, deadline, |rx| (rx.received_status == Some(0)).then_some(())).await;
    if complete.is_none() {
        return Err(timed_out(state));
    }

    let auth_id = match rx.lock().unwrap().auth_id {
        Some(id) => id,
        None => return Err(timed_out(state)),
    };

    enter(&mut state, PairingState::Success);
    debug!(%auth_id, "pairing complete");
    Ok(PairingOutput {
        shared_key,
        auth_id,
    })
}

fn enter(state: &mut PairingState, next: PairingState) {
    debug!(from = ?*state, to = ?next, "pairing state");
    *state = next;
}

fn timed_out(state: PairingState) -> PairingState {
    warn!(?state, "pairing timed out");
    PairingState::Timeout
}

async fn wait<I, T>(
    rx: &Mutex<RxState<I>>,
    config: &NukiConfig,
    deadline: Instant,
    mut pred: impl FnMut(&mut RxState<I>) -> Option<T>,
) -> Option<T> {
    loop {
        if let Some(value) = pred(&mut rx.lock().unwrap()) {
            return Some(value);
        }
        if Instant::now() >= deadline {
            return None;
        }
        sleep(config.pairing_poll_interval).await;
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    /// Link that plays the device side far enough to exercise the engine
    struct FakeLink {
        rx: Arc<Mutex<RxState<()>>>,
        device_key: PairingKeypair,
        published: Mutex<Option<SharedKey>>,
        /// Messages captured as (command, payload)
        sent: Mutex<Vec<(CommandId, Vec<u8>)>>,
    }

    impl FakeLink {
        fn new(rx: Arc<Mutex<RxState<()>>>) -> Self {
            Self {
                rx,
                device_key: PairingKeypair::generate(),
                published: Mutex::new(None),
                sent: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PairingLink for FakeLink {
        async fn send_plain(&self, command: CommandId, payload: &[u8]) -> bool {
            self.sent.lock().unwrap().push((command, payload.to_vec()));
            let mut rx = self.rx.lock().unwrap();
            match command {
                CommandId::REQUEST_DATA => {
                    rx.remote_public_key = Some(self.device_key.public_bytes());
                }
                CommandId::PUBLIC_KEY => {
                    rx.challenge_nonce = Some([0xC1; 32]);
                }
                CommandId::AUTHORIZATION_AUTHENTICATOR => {
                    rx.challenge_nonce = Some([0xC2; 32]);
                }
                CommandId::AUTHORIZATION_DATA => {
                    rx.auth_id = Some(AuthorizationId::from_u32(0x0102_0304));
                    rx.challenge_nonce = Some([0xC3; 32]);
                }
                CommandId::AUTHORIZATION_ID_CONFIRMATION => {
                    rx.received_status = Some(0);
                }
                _ => {}
            }
            true
        }

        async fn send_encrypted(&self, _command: CommandId, _payload: &[u8]) -> bool {
            // Ultra path: the device answers with the authorization id.
            let mut rx = self.rx.lock().unwrap();
            rx.auth_id = Some(AuthorizationId::from_u32(0x0A0B_0C0D));
            rx.received_status = Some(0);
            true
        }

        fn publish_shared_key(&self, key: SharedKey) {
            *self.published.lock().unwrap() = Some(key);
        }
    }

    fn config() -> NukiConfig {
        let mut config = NukiConfig::new().with_pairing_timeout(Duration::from_millis(300));
        config.pairing_poll_interval = Duration::from_millis(5);
        config
    }

    fn identity() -> DeviceIdentity {
        DeviceIdentity::new("bridge", 0xDEAD_BEEF, "nuki")
    }

    #[tokio::test]
    async fn test_classic_pairing_happy_path() {
        let rx = Arc::new(Mutex::new(RxState::<()>::default()));
        let link = FakeLink::new(rx.clone());
        let identity = identity();
        let params = PairingParams {
            identity: &identity,
            id_type: IdType::Bridge,
            is_ultra: false,
            ultra_pin: 0,
        };

        let output = run_pairing(&link, &rx, &config(), params).await.unwrap();
        assert_eq!(output.auth_id, AuthorizationId::from_u32(0x0102_0304));
        assert!(!output.shared_key.is_zero());
        // The key handed to the router is the one returned.
        assert_eq!(
            link.published.lock().unwrap().unwrap().as_bytes(),
            output.shared_key.as_bytes()
        );

        // The device saw exactly the classic five-message sequence.
        let sent = link.sent.lock().unwrap();
        let commands: Vec<CommandId> = sent.iter().map(|(c, _)| *c).collect();
        assert_eq!(
            commands,
            vec![
                CommandId::REQUEST_DATA,
                CommandId::PUBLIC_KEY,
                CommandId::AUTHORIZATION_AUTHENTICATOR,
                CommandId::AUTHORIZATION_DATA,
                CommandId::AUTHORIZATION_ID_CONFIRMATION,
            ]
        );

        // The confirmation authenticates auth id + final challenge.
        let (_, confirmation) = &sent[4];
        assert_eq!(confirmation.len(), 36);
        let expected_mac = {
            let mut input = Vec::new();
            input.extend_from_slice(&[0x04, 0x03, 0x02, 0x01]);
            input.extend_from_slice(&[0xC3; 32]);
            hmac_sha256(&output.shared_key, &input)
        };
        assert_eq!(&confirmation[..32], &expected_mac);
        assert_eq!(&confirmation[32..], &[0x04, 0x03, 0x02, 0x01]);
    }

    #[tokio::test]
    async fn test_ultra_pairing_skips_confirmation() {
        let rx = Arc::new(Mutex::new(RxState::<()>::default()));
        let link = FakeLink::new(rx.clone());
        let identity = identity();
        let params = PairingParams {
            identity: &identity,
            id_type: IdType::Bridge,
            is_ultra: true,
            ultra_pin: 123_456,
        };

        let output = run_pairing(&link, &rx, &config(), params).await.unwrap();
        assert_eq!(output.auth_id, AuthorizationId::from_u32(0x0A0B_0C0D));

        let sent = link.sent.lock().unwrap();
        assert!(!sent
            .iter()
            .any(|(c, _)| *c == CommandId::AUTHORIZATION_ID_CONFIRMATION));
    }

    #[tokio::test]
    async fn test_silent_device_times_out() {
        struct DeafLink;

        #[async_trait]
        impl PairingLink for DeafLink {
            async fn send_plain(&self, _: CommandId, _: &[u8]) -> bool {
                true
            }
            async fn send_encrypted(&self, _: CommandId, _: &[u8]) -> bool {
                true
            }
            fn publish_shared_key(&self, _: SharedKey) {}
        }

        let rx = Mutex::new(RxState::<()>::default());
        let identity = identity();
        let params = PairingParams {
            identity: &identity,
            id_type: IdType::App,
            is_ultra: false,
            ultra_pin: 0,
        };
        let result = run_pairing(&DeafLink, &rx, &config(), params).await;
        assert_eq!(result.unwrap_err(), PairingState::Timeout);
    }
}
