//! Credential persistence
//!
//! Pairing produces a small set of records that must survive restarts: the
//! peer address, the derived shared key, the authorization id, the device
//! variant and the security PIN. The [`CredentialStore`] trait is the
//! narrow key/value seam the host provides (NVS, a file, ...); the
//! [`CredentialVault`] implements the load/save/clear semantics on top.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::types::{AuthorizationId, BleAddress, SecurityPin, SharedKey};

// Record names are part of the persisted format and stable across upgrades.
pub const BLE_ADDRESS_KEY: &str = "bleAddress";
pub const SECRET_KEY_KEY: &str = "secretKey";
pub const AUTH_ID_KEY: &str = "authorizationId";
pub const SECURITY_PIN_KEY: &str = "securityPin";
pub const ULTRA_PIN_KEY: &str = "ultraPin";
pub const IS_ULTRA_KEY: &str = "isUltra";

// ----------------------------------------------------------------------------
// Store Trait
// ----------------------------------------------------------------------------

/// Key/value persistence consumed by the engine.
///
/// Implementations must be crash-consistent at the level of individual
/// records. `get_bytes` returns the number of bytes copied into `buf`
/// (0 when the record does not exist).
pub trait CredentialStore: Send {
    /// Open the given namespace; all subsequent accesses are scoped to it
    fn begin(&mut self, namespace: &str);
    fn get_bytes(&self, name: &str, buf: &mut [u8]) -> usize;
    fn put_bytes(&mut self, name: &str, value: &[u8]) -> usize;
    fn get_bool(&self, name: &str, default: bool) -> bool;
    fn put_bool(&mut self, name: &str, value: bool);
}

// ----------------------------------------------------------------------------
// Credentials
// ----------------------------------------------------------------------------

/// The persisted pairing state for one device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credentials {
    pub address: BleAddress,
    pub shared_key: SharedKey,
    pub auth_id: AuthorizationId,
    pub is_ultra: bool,
    pub pin: SecurityPin,
}

impl Credentials {
    /// "Paired" means neither the shared key nor the authorization id is
    /// all-zero.
    pub fn is_paired(&self) -> bool {
        !self.shared_key.is_zero() && !self.auth_id.is_zero()
    }
}

// ----------------------------------------------------------------------------
// Vault
// ----------------------------------------------------------------------------

/// Load/save/clear semantics over a [`CredentialStore`]
pub struct CredentialVault {
    store: Box<dyn CredentialStore>,
}

impl CredentialVault {
    pub fn new(mut store: Box<dyn CredentialStore>, namespace: &str) -> Self {
        store.begin(namespace);
        Self { store }
    }

    /// Load stored credentials. Returns `None` when no valid pairing is
    /// stored (missing records, or all-zero shared key / authorization id).
    pub fn load(&self) -> Option<Credentials> {
        let mut addr = [0u8; 6];
        let mut key = [0u8; 32];
        let mut auth = [0u8; 4];

        if self.store.get_bytes(BLE_ADDRESS_KEY, &mut addr) != 6
            || self.store.get_bytes(SECRET_KEY_KEY, &mut key) != 32
            || self.store.get_bytes(AUTH_ID_KEY, &mut auth) != 4
        {
            debug!("no stored credentials found");
            return None;
        }

        let shared_key = SharedKey::new(key);
        let auth_id = AuthorizationId::new(auth);
        if shared_key.is_zero() || auth_id.is_zero() {
            debug!("stored shared key or authorization id is empty, not paired");
            return None;
        }

        let is_ultra = self.store.get_bool(IS_ULTRA_KEY, false);
        let pin = if is_ultra {
            let mut raw = [0u8; 4];
            self.store.get_bytes(ULTRA_PIN_KEY, &mut raw);
            SecurityPin::Ultra(u32::from_le_bytes(raw))
        } else {
            let mut raw = [0u8; 2];
            self.store.get_bytes(SECURITY_PIN_KEY, &mut raw);
            SecurityPin::Classic(u16::from_le_bytes(raw))
        };
        if matches!(pin, SecurityPin::Classic(0) | SecurityPin::Ultra(0)) {
            warn!("stored security PIN is 0, probably not configured");
        }

        Some(Credentials {
            address: BleAddress::from_stored_bytes(addr),
            shared_key,
            auth_id,
            is_ultra,
            pin,
        })
    }

    /// Persist credentials.
    ///
    /// When the address differs from the previously stored one this is a
    /// binding to a new device: both PIN records are reset to zero so the
    /// old PIN never carries over.
    pub fn save(&mut self, credentials: &Credentials) {
        let stored_addr = credentials.address.to_stored_bytes();
        let mut previous = [0u8; 6];
        let had_previous = self.store.get_bytes(BLE_ADDRESS_KEY, &mut previous) == 6;

        if had_previous && previous == stored_addr {
            match credentials.pin {
                SecurityPin::Classic(pin) => {
                    self.store.put_bytes(SECURITY_PIN_KEY, &pin.to_le_bytes());
                }
                SecurityPin::Ultra(pin) => {
                    self.store.put_bytes(ULTRA_PIN_KEY, &pin.to_le_bytes());
                }
            }
        } else {
            self.store.put_bytes(SECURITY_PIN_KEY, &0u16.to_le_bytes());
            self.store.put_bytes(ULTRA_PIN_KEY, &0u32.to_le_bytes());
        }

        self.store.put_bytes(BLE_ADDRESS_KEY, &stored_addr);
        self.store
            .put_bytes(SECRET_KEY_KEY, credentials.shared_key.as_bytes());
        self.store.put_bytes(AUTH_ID_KEY, credentials.auth_id.as_bytes());
        self.store.put_bool(IS_ULTRA_KEY, credentials.is_ultra);
        debug!(address = %credentials.address, auth_id = %credentials.auth_id, "credentials saved");
    }

    /// Forget the pairing. Only the key material is wiped; the stored
    /// address and PIN records remain for a later re-pairing with the same
    /// device.
    pub fn clear(&mut self) {
        self.store.put_bytes(SECRET_KEY_KEY, &[0u8; 32]);
        self.store.put_bytes(AUTH_ID_KEY, &[0u8; 4]);
        self.store.put_bool(IS_ULTRA_KEY, false);
        debug!("credentials cleared");
    }

    /// Overwrite just the PIN record for the given variant
    pub fn save_pin(&mut self, pin: SecurityPin) {
        match pin {
            SecurityPin::Classic(value) => {
                self.store.put_bytes(SECURITY_PIN_KEY, &value.to_le_bytes());
            }
            SecurityPin::Ultra(value) => {
                self.store.put_bytes(ULTRA_PIN_KEY, &value.to_le_bytes());
            }
        }
    }

    /// The stored peer address, if any
    pub fn stored_address(&self) -> Option<BleAddress> {
        let mut raw = [0u8; 6];
        if self.store.get_bytes(BLE_ADDRESS_KEY, &mut raw) == 6 {
            Some(BleAddress::from_stored_bytes(raw))
        } else {
            None
        }
    }

    /// The stored PIN for the given variant (0 when absent)
    pub fn stored_pin(&self, ultra: bool) -> SecurityPin {
        if ultra {
            let mut raw = [0u8; 4];
            self.store.get_bytes(ULTRA_PIN_KEY, &mut raw);
            SecurityPin::Ultra(u32::from_le_bytes(raw))
        } else {
            let mut raw = [0u8; 2];
            self.store.get_bytes(SECURITY_PIN_KEY, &mut raw);
            SecurityPin::Classic(u16::from_le_bytes(raw))
        }
    }
}

// ----------------------------------------------------------------------------
// In-Memory Store
// ----------------------------------------------------------------------------

/// Map-backed store for tests and hosts without dedicated flash storage
#[derive(Debug, Default)]
pub struct MemoryStore {
    namespace: String,
    bytes: HashMap<String, Vec<u8>>,
    bools: HashMap<String, bool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(&self, name: &str) -> String {
        format!("{}/{}", self.namespace, name)
    }
}

impl CredentialStore for MemoryStore {
    fn begin(&mut self, namespace: &str) {
        self.namespace = namespace.to_string();
    }

    fn get_bytes(&self, name: &str, buf: &mut [u8]) -> usize {
        match self.bytes.get(&self.key(name)) {
            Some(value) => {
                let len = value.len().min(buf.len());
                buf[..len].copy_from_slice(&value[..len]);
                len
            }
            None => 0,
        }
    }

    fn put_bytes(&mut self, name: &str, value: &[u8]) -> usize {
        self.bytes.insert(self.key(name), value.to_vec());
        value.len()
    }

    fn get_bool(&self, name: &str, default: bool) -> bool {
        self.bools.get(&self.key(name)).copied().unwrap_or(default)
    }

    fn put_bool(&mut self, name: &str, value: bool) {
        self.bools.insert(self.key(name), value);
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
