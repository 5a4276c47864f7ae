//! Engine configuration
//!
//! All timing behavior of the engine is collected here so tests can run the
//! state machines against a scripted peer with tight deadlines.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Configuration for a Nuki client instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NukiConfig {
    /// Per-step deadline inside the command state machines
    pub command_timeout: Duration,
    /// Overall deadline for one pairing run
    pub pairing_timeout: Duration,
    /// Deadline for bulk list collection (keypad codes, log entries, ...)
    pub general_timeout: Duration,
    /// How long `execute_action` waits for the single-flight permit
    pub semaphore_timeout: Duration,
    /// Commands fail fast when nothing was heard from the device for this long
    pub heartbeat_timeout: Duration,
    /// Idle period after which the link is torn down
    pub disconnect_timeout: Duration,
    /// Per-attempt BLE connect timeout
    pub connect_timeout: Duration,
    /// Number of connect attempts before giving up
    pub connect_retries: u8,
    /// Poll interval of the command state machines
    pub command_poll_interval: Duration,
    /// Poll interval of the pairing state machine
    pub pairing_poll_interval: Duration,
    /// Poll interval while waiting for a disconnect to take effect
    pub disconnect_poll_interval: Duration,
    /// How long a pairing advertisement stays valid
    pub pairing_offer_expiry: Duration,
    /// Alt-connect mode: connect per command, disconnect eagerly on error,
    /// no heartbeat precondition
    pub alt_connect: bool,
}

impl Default for NukiConfig {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(30),
            pairing_timeout: Duration::from_secs(30),
            general_timeout: Duration::from_secs(20),
            semaphore_timeout: Duration::from_secs(1),
            heartbeat_timeout: Duration::from_secs(30),
            disconnect_timeout: Duration::from_secs(20),
            connect_timeout: Duration::from_secs(3),
            connect_retries: 5,
            command_poll_interval: Duration::from_millis(10),
            pairing_poll_interval: Duration::from_millis(50),
            disconnect_poll_interval: Duration::from_millis(100),
            pairing_offer_expiry: Duration::from_secs(2),
            alt_connect: false,
        }
    }
}

impl NukiConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-step command deadline
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Set the overall pairing deadline
    pub fn with_pairing_timeout(mut self, timeout: Duration) -> Self {
        self.pairing_timeout = timeout;
        self
    }

    /// Set the bulk-collection deadline
    pub fn with_general_timeout(mut self, timeout: Duration) -> Self {
        self.general_timeout = timeout;
        self
    }

    /// Set the per-attempt connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the number of connect attempts
    pub fn with_connect_retries(mut self, retries: u8) -> Self {
        self.connect_retries = retries;
        self
    }

    /// Set the idle disconnect timeout
    pub fn with_disconnect_timeout(mut self, timeout: Duration) -> Self {
        self.disconnect_timeout = timeout;
        self
    }

    /// Enable or disable alt-connect mode
    pub fn with_alt_connect(mut self, enabled: bool) -> Self {
        self.alt_connect = enabled;
        self
    }
}

// ----------------------------------------------------------------------------
// Device Identity
// ----------------------------------------------------------------------------

/// Constant identity this client presents to devices while pairing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Human-readable client name, at most 32 bytes on the wire
    pub name: String,
    /// 32-bit app/device id chosen by the integrator
    pub device_id: u32,
    /// Namespace under which credentials are persisted
    pub preferences_id: String,
}

impl DeviceIdentity {
    pub fn new(name: impl Into<String>, device_id: u32, preferences_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            device_id,
            preferences_id: preferences_id.into(),
        }
    }

    /// Name padded/truncated to the fixed 32-byte wire field
    pub fn name_bytes(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        let src = self.name.as_bytes();
        let len = src.len().min(32);
        out[..len].copy_from_slice(&src[..len]);
        out
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_chain() {
        let config = NukiConfig::new()
            .with_command_timeout(Duration::from_millis(200))
            .with_connect_retries(2)
            .with_alt_connect(true);
        assert_eq!(config.command_timeout, Duration::from_millis(200));
        assert_eq!(config.connect_retries, 2);
        assert!(config.alt_connect);
    }

    #[test]
    fn test_identity_name_padding() {
        let identity = DeviceIdentity::new("bridge", 42, "nuki");
        let name = identity.name_bytes();
        assert_eq!(&name[..6], b"bridge");
        assert_eq!(&name[6..], &[0u8; 26]);
    }

    #[test]
    fn test_identity_name_truncation() {
        let identity = DeviceIdentity::new("x".repeat(40), 42, "nuki");
        assert_eq!(identity.name_bytes(), [b'x'; 32]);
    }
}
