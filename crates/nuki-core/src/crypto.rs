//! Cryptographic primitives for pairing and the authenticated channel
//!
//! The protocol follows the NaCl construction end to end: a Curve25519 key
//! agreement produces the raw shared secret `s`, the HSalsa20 core turns it
//! into the long-term secretbox key `k`, and HMAC-SHA256 under `k`
//! authenticates the pairing exchanges. Frame-level encryption lives in
//! [`crate::frame`].

use hmac::{Hmac, Mac};
use rand_core::{OsRng, RngCore};
use salsa20::cipher::consts::{U10, U16};
use salsa20::cipher::generic_array::GenericArray;
use salsa20::hsalsa;
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::types::SharedKey;

/// Byte length of the nonce prefixed to every encrypted frame
pub const NONCE_LEN: usize = 24;
/// Byte length of the challenge nonce minted by the device
pub const CHALLENGE_LEN: usize = 32;

// ----------------------------------------------------------------------------
// Pairing Key Pair
// ----------------------------------------------------------------------------

/// Ephemeral Curve25519 key pair used for a single pairing attempt.
///
/// A fresh pair is generated per attempt and never persisted; the private
/// half is scrubbed when the value drops.
pub struct PairingKeypair {
    secret: StaticSecret,
    public: PublicKey,
}

impl PairingKeypair {
    /// Generate a fresh key pair from the OS CSPRNG
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Build from raw private key bytes (test vectors)
    pub fn from_private_bytes(private: [u8; 32]) -> Self {
        let secret = StaticSecret::from(private);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Our public key as sent in the `PublicKey` pairing message
    pub fn public_bytes(&self) -> [u8; 32] {
        self.public.to_bytes()
    }

    /// Run the key agreement against the device's public key and derive the
    /// long-term shared key `k`
    pub fn derive_shared_key(&self, remote_public: &[u8; 32]) -> SharedKey {
        let shared = Zeroizing::new(
            self.secret
                .diffie_hellman(&PublicKey::from(*remote_public))
                .to_bytes(),
        );
        kdf_hsalsa20(&shared)
    }
}

impl core::fmt::Debug for PairingKeypair {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PairingKeypair")
            .field("public", &hex::encode(self.public.as_bytes()))
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Key Derivation
// ----------------------------------------------------------------------------

/// Derive the secretbox key `k` from a Curve25519 shared secret.
///
/// `k = HSalsa20(key = s, in = 0^16)` with the "expand 32-byte k" sigma
/// constant. This is the NaCl convention for turning a `crypto_scalarmult`
/// output into a `crypto_secretbox` key.
pub fn kdf_hsalsa20(shared_secret: &[u8; 32]) -> SharedKey {
    let key = GenericArray::from_slice(shared_secret);
    let input = GenericArray::<u8, U16>::default();
    let derived = hsalsa::<U10>(key, &input);
    SharedKey::new(derived.into())
}

// ----------------------------------------------------------------------------
// HMAC-SHA256
// ----------------------------------------------------------------------------

/// HMAC-SHA256 of `message` under `key`
pub fn hmac_sha256(key: &SharedKey, message: &[u8]) -> [u8; 32] {
    // HMAC accepts keys of any length, new_from_slice cannot fail for 32 bytes.
    let mut mac = Hmac::<Sha256>::new_from_slice(key.as_bytes())
        .expect("HMAC accepts 32-byte keys");
    mac.update(message);
    mac.finalize().into_bytes().into()
}

// ----------------------------------------------------------------------------
// Nonce Generation
// ----------------------------------------------------------------------------

/// Fill an array of any size with bytes from the OS CSPRNG
pub fn generate_nonce<const N: usize>() -> [u8; N] {
    let mut nonce = [0u8; N];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
