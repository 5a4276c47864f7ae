//! On-wire frame codecs
//!
//! Two frame formats exist. The pairing channel (GDIO) carries plain
//! frames:
//!
//! ```text
//! | command id (2, LE) | payload (N) | CRC-16 over the first 2+N (2, LE) |
//! ```
//!
//! The user channel (USDIO) carries authenticated frames:
//!
//! ```text
//! | nonce (24) | auth id (4, LE) | cipher len (2, LE) | ciphertext |
//! ```
//!
//! where the ciphertext is an XSalsa20-Poly1305 secretbox (16-byte tag
//! prepended) over:
//!
//! ```text
//! | auth id (4, LE) | command id (2, LE) | payload (N) | CRC-16 (2, LE) |
//! ```
//!
//! The CRC is CCITT-FALSE: poly 0x1021, init 0xFFFF, no reflection,
//! xorout 0x0000.

use crypto_secretbox::aead::{Aead, KeyInit};
use crypto_secretbox::{Key, Nonce, XSalsa20Poly1305};
use tracing::warn;

use crate::crypto::{generate_nonce, NONCE_LEN};
use crate::errors::{CryptoError, FrameError};
use crate::types::{AuthorizationId, CommandId, SharedKey};

/// Poly1305 tag length prepended to the secretbox ciphertext
const TAG_LEN: usize = 16;
/// Unencrypted header of an authenticated frame: nonce + auth id + length
const ENCRYPTED_HEADER_LEN: usize = NONCE_LEN + 4 + 2;

// ----------------------------------------------------------------------------
// CRC-16/CCITT-FALSE
// ----------------------------------------------------------------------------

/// CRC-16/CCITT-FALSE over `data`
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// Check the trailing little-endian CRC of `data`
fn crc_valid(data: &[u8]) -> bool {
    if data.len() < 2 {
        return false;
    }
    let (body, tail) = data.split_at(data.len() - 2);
    let received = u16::from_le_bytes([tail[0], tail[1]]);
    received == crc16(body)
}

// ----------------------------------------------------------------------------
// Plain Frames (pairing channel)
// ----------------------------------------------------------------------------

/// Build a plain pairing-channel frame
pub fn encode_plain(command: CommandId, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(2 + payload.len() + 2);
    frame.extend_from_slice(&command.to_le_bytes());
    frame.extend_from_slice(payload);
    let crc = crc16(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    frame
}

/// Parse a plain pairing-channel frame into command id and payload
pub fn decode_plain(frame: &[u8]) -> Result<(CommandId, Vec<u8>), FrameError> {
    if frame.len() < 4 {
        return Err(FrameError::BadFrame("plain frame shorter than 4 bytes"));
    }
    if !crc_valid(frame) {
        warn!(len = frame.len(), "dropping plain frame with bad CRC");
        return Err(FrameError::CrcInvalid);
    }
    let command = CommandId::from_le_bytes([frame[0], frame[1]]);
    let payload = frame[2..frame.len() - 2].to_vec();
    Ok((command, payload))
}

// ----------------------------------------------------------------------------
// Encrypted Frames (user channel)
// ----------------------------------------------------------------------------

/// Build an authenticated user-channel frame with a fresh random nonce
pub fn encode_encrypted(
    command: CommandId,
    payload: &[u8],
    auth_id: AuthorizationId,
    key: &SharedKey,
) -> Result<Vec<u8>, CryptoError> {
    let nonce: [u8; NONCE_LEN] = generate_nonce();
    encode_encrypted_with_nonce(command, payload, auth_id, key, nonce)
}

/// Build an authenticated frame with a caller-supplied nonce.
///
/// Only the harness and tests pick the nonce; production traffic goes
/// through [`encode_encrypted`].
pub fn encode_encrypted_with_nonce(
    command: CommandId,
    payload: &[u8],
    auth_id: AuthorizationId,
    key: &SharedKey,
    nonce: [u8; NONCE_LEN],
) -> Result<Vec<u8>, CryptoError> {
    // Inner plaintext: auth id, command id, payload, CRC over all of it.
    let mut plain = Vec::with_capacity(6 + payload.len() + 2);
    plain.extend_from_slice(auth_id.as_bytes());
    plain.extend_from_slice(&command.to_le_bytes());
    plain.extend_from_slice(payload);
    let crc = crc16(&plain);
    plain.extend_from_slice(&crc.to_le_bytes());

    let cipher = XSalsa20Poly1305::new(Key::from_slice(key.as_bytes()));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plain.as_slice())
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut frame = Vec::with_capacity(ENCRYPTED_HEADER_LEN + ciphertext.len());
    frame.extend_from_slice(&nonce);
    frame.extend_from_slice(auth_id.as_bytes());
    frame.extend_from_slice(&(ciphertext.len() as u16).to_le_bytes());
    frame.extend_from_slice(&ciphertext);
    Ok(frame)
}

/// Decrypt and validate an inbound user-channel frame
pub fn decode_encrypted(
    frame: &[u8],
    key: &SharedKey,
) -> Result<(CommandId, Vec<u8>), FrameError> {
    if frame.len() < ENCRYPTED_HEADER_LEN + TAG_LEN {
        return Err(FrameError::BadFrame("encrypted frame header truncated"));
    }

    let nonce = &frame[..NONCE_LEN];
    let cipher_len =
        u16::from_le_bytes([frame[NONCE_LEN + 4], frame[NONCE_LEN + 5]]) as usize;
    let ciphertext = &frame[ENCRYPTED_HEADER_LEN..];
    if ciphertext.len() != cipher_len {
        return Err(FrameError::BadFrame("cipher length field mismatch"));
    }

    let cipher = XSalsa20Poly1305::new(Key::from_slice(key.as_bytes()));
    let plain = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| {
            warn!(len = frame.len(), "dropping frame that failed authentication");
            FrameError::DecryptFailed
        })?;

    // auth id (4) + command (2) + crc (2) is the minimum inner message
    if plain.len() < 8 {
        return Err(FrameError::BadFrame("decrypted message too short"));
    }
    if !crc_valid(&plain) {
        warn!("dropping decrypted frame with bad CRC");
        return Err(FrameError::CrcInvalid);
    }

    let command = CommandId::from_le_bytes([plain[4], plain[5]]);
    let payload = plain[6..plain.len() - 2].to_vec();
    Ok((command, payload))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
