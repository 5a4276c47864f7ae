//! External seams: BLE transport, scanner and event sink
//!
//! The engine never touches a BLE stack directly. The host supplies a
//! [`BleTransport`] for the link and a [`ScanPublisher`] for advertising
//! reports; the engine feeds status changes back through an
//! [`EventHandler`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::types::BleAddress;

// ----------------------------------------------------------------------------
// Indications
// ----------------------------------------------------------------------------

/// Callback invoked by the transport for every received indication.
///
/// Called with the characteristic the indication arrived on and the raw
/// frame bytes, from whatever task the transport processes indications on.
pub type IndicationSink = Arc<dyn Fn(Uuid, &[u8]) + Send + Sync>;

// ----------------------------------------------------------------------------
// BLE Transport
// ----------------------------------------------------------------------------

/// The narrow link interface the engine drives.
///
/// All methods report plain success/failure; retry policy lives in the
/// engine's connection manager, not in the transport.
#[async_trait]
pub trait BleTransport: Send + Sync {
    /// Connect to the peer. `refresh_services` forces a fresh GATT
    /// discovery instead of using cached services.
    async fn connect(&self, address: BleAddress, refresh_services: bool) -> bool;

    async fn disconnect(&self);

    async fn is_connected(&self) -> bool;

    /// RSSI of the active connection
    async fn rssi(&self) -> i16;

    async fn write_characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
        with_response: bool,
    ) -> bool;

    /// Subscribe to indications on a characteristic and route them into
    /// `sink`
    async fn subscribe_indications(
        &self,
        service: Uuid,
        characteristic: Uuid,
        sink: IndicationSink,
    ) -> bool;

    /// Prepare SMP bonding with a keyboard-only passkey (ultra pairing).
    /// Removes any existing bond for the address first.
    async fn prepare_passkey_bonding(&self, address: BleAddress, passkey: u32) -> bool;
}

// ----------------------------------------------------------------------------
// Scanner
// ----------------------------------------------------------------------------

/// One advertising report as delivered by the scanner
#[derive(Debug, Clone, Default)]
pub struct Advertisement {
    pub address: BleAddress,
    pub rssi: i16,
    /// Raw manufacturer-specific data, company id included
    pub manufacturer_data: Vec<u8>,
    /// Service data entries keyed by service UUID
    pub service_data: HashMap<Uuid, Vec<u8>>,
    /// Advertised service UUIDs
    pub service_uuids: Vec<Uuid>,
}

impl Advertisement {
    /// Service data payload for a given service id, if advertised
    pub fn service_data_for(&self, service: &Uuid) -> Option<&[u8]> {
        self.service_data.get(service).map(Vec::as_slice)
    }

    /// Whether the advertisement mentions the given service id at all
    pub fn mentions_service(&self, service: &Uuid) -> bool {
        self.service_uuids.contains(service) || self.service_data.contains_key(service)
    }
}

/// Consumer side of the scanner
pub trait ScanListener: Send + Sync {
    fn on_advertisement(&self, advertisement: &Advertisement);
}

/// Publisher side of the scanner, owned by the host.
///
/// The listener only holds this borrowing seam for registration; the
/// publisher calls back through the [`ScanListener`] interface, which keeps
/// the object graph acyclic.
pub trait ScanPublisher: Send + Sync {
    fn subscribe(&self, listener: Arc<dyn ScanListener>);
    fn unsubscribe(&self, listener: &Arc<dyn ScanListener>);
    /// Pause or resume scanning (paused around connection attempts)
    fn enable_scanning(&self, enable: bool);
}

// ----------------------------------------------------------------------------
// Events
// ----------------------------------------------------------------------------

/// Asynchronous events emitted by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NukiEvent {
    /// The status-change beacon signalled new device state
    KeyTurnerStatusUpdated,
    /// The status-change beacon returned to its idle level
    KeyTurnerStatusReset,
    /// The link did not come down within the disconnect grace period
    BleErrorOnDisconnect,
    /// The device rejected the supplied PIN (`ErrorReport` 0x21)
    ErrorBadPin,
}

/// Host-provided event sink
pub trait EventHandler: Send + Sync {
    fn notify(&self, event: NukiEvent);
}
