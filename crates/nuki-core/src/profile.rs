//! Device profiles
//!
//! The engine is generic over the device kind it drives. A profile
//! contributes the BLE identifiers of the two I/O channels (with ultra
//! alternates where they differ), and the decoding of device-specific
//! records the generic dispatcher does not understand.

use uuid::Uuid;

use crate::types::CommandId;

/// Per-device-kind plumbing consumed by the engine.
///
/// Lock and Opener are two implementations over the same engine; a profile
/// carries no mutable state of its own.
pub trait DeviceProfile: Send + Sync + 'static {
    /// Device-specific decoded state (last key turner state, config, ...),
    /// filled in by [`DeviceProfile::dispatch`].
    type Inbox: Default + Send + 'static;

    /// Service advertised and used while in pairing mode
    fn pairing_service(&self, ultra: bool) -> Uuid;

    /// Pairing-channel (GDIO) characteristic
    fn gdio_characteristic(&self, ultra: bool) -> Uuid;

    /// Service carrying operational data
    fn data_service(&self) -> Uuid;

    /// Authenticated-channel (USDIO) characteristic
    fn usdio_characteristic(&self) -> Uuid;

    /// Decode a device-specific record into the inbox.
    ///
    /// Returns `true` when the command was consumed; the generic dispatcher
    /// handles everything else.
    fn dispatch(&self, inbox: &mut Self::Inbox, command: CommandId, payload: &[u8]) -> bool;
}
