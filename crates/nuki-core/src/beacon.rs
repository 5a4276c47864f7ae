//! Advertising observation
//!
//! Two jobs, depending on pairing state. While paired, the device's
//! iBeacon-format advertisements carry an out-of-band "something changed"
//! signal: the least significant bit of the measured-power byte toggles
//! with every lock event. While unpaired, service-data advertisements on
//! the pairing service id announce a device waiting to be paired.

use std::time::{Duration, Instant};

use tracing::debug;
use uuid::Uuid;

use crate::transport::{Advertisement, NukiEvent};
use crate::types::BleAddress;

/// Apple manufacturer id + iBeacon type/length prefix
const IBEACON_PREFIX: [u8; 4] = [0x4C, 0x00, 0x02, 0x15];
/// Full iBeacon manufacturer payload length
const IBEACON_LEN: usize = 25;

// ----------------------------------------------------------------------------
// iBeacon parsing
// ----------------------------------------------------------------------------

/// Parsed iBeacon manufacturer payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IBeacon {
    pub proximity_uuid: [u8; 16],
    pub major: u16,
    pub minor: u16,
    /// Measured power byte; its LSB is the status-changed flag
    pub signal_power: i8,
}

impl IBeacon {
    /// Parse a 25-byte `4C 00 02 15 …` manufacturer payload
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() != IBEACON_LEN || data[..4] != IBEACON_PREFIX {
            return None;
        }
        Some(Self {
            proximity_uuid: data[4..20].try_into().unwrap(),
            major: u16::from_be_bytes([data[20], data[21]]),
            minor: u16::from_be_bytes([data[22], data[23]]),
            signal_power: data[24] as i8,
        })
    }

    /// Status-changed flag carried in the power byte
    pub fn status_flag(&self) -> bool {
        (self.signal_power as u8) & 0x01 != 0
    }
}

// ----------------------------------------------------------------------------
// Pairing offers
// ----------------------------------------------------------------------------

/// A device seen advertising its pairing service
#[derive(Debug, Clone, Copy)]
pub(crate) struct PairingOffer {
    pub address: BleAddress,
    pub is_ultra: bool,
    pub seen: Instant,
}

// ----------------------------------------------------------------------------
// Monitor
// ----------------------------------------------------------------------------

/// What one paired-mode observation produced
#[derive(Debug, Default)]
pub(crate) struct BeaconObservation {
    /// Status edge event to deliver, if any
    pub event: Option<NukiEvent>,
    /// A valid status beacon counts as device liveness
    pub heartbeat: bool,
}

/// Rolling beacon state for one device
#[derive(Debug, Default)]
pub(crate) struct BeaconMonitor {
    pub rssi: i16,
    pub last_beacon: Option<Instant>,
    status_updated: bool,
    offer: Option<PairingOffer>,
}

impl BeaconMonitor {
    /// Feed an advertisement from the paired device.
    ///
    /// The caller has already matched the advertiser address. Only
    /// advertisements mentioning the data service and carrying a
    /// well-formed iBeacon payload count; the status events fire on the
    /// edges of the power-byte LSB.
    pub fn observe_paired(
        &mut self,
        advertisement: &Advertisement,
        data_service: &Uuid,
    ) -> BeaconObservation {
        self.rssi = advertisement.rssi;
        self.last_beacon = Some(Instant::now());

        if !advertisement.mentions_service(data_service) {
            return BeaconObservation::default();
        }
        let beacon = match IBeacon::parse(&advertisement.manufacturer_data) {
            Some(beacon) => beacon,
            None => return BeaconObservation::default(),
        };

        let event = if beacon.status_flag() && !self.status_updated {
            self.status_updated = true;
            debug!("status beacon flagged an update");
            Some(NukiEvent::KeyTurnerStatusUpdated)
        } else if !beacon.status_flag() && self.status_updated {
            self.status_updated = false;
            Some(NukiEvent::KeyTurnerStatusReset)
        } else {
            None
        };

        BeaconObservation {
            event,
            heartbeat: true,
        }
    }

    /// Feed an advertisement while unpaired; watches for the pairing
    /// service on either variant. Returns the offer when one was recorded.
    pub fn observe_unpaired(
        &mut self,
        advertisement: &Advertisement,
        classic_service: &Uuid,
        ultra_service: &Uuid,
        ultra_pin_configured: bool,
    ) -> Option<PairingOffer> {
        let is_ultra = if advertisement.service_data_for(classic_service).is_some() {
            false
        } else if advertisement.service_data_for(ultra_service).is_some() {
            // Ultra pairing needs the passkey up front; without one the
            // offer is ignored entirely.
            if !ultra_pin_configured {
                debug!("ignoring ultra pairing advertisement, no pairing PIN set");
                return None;
            }
            true
        } else {
            return None;
        };

        debug!(address = %advertisement.address, is_ultra, "device in pairing mode found");
        let offer = PairingOffer {
            address: advertisement.address,
            is_ultra,
            seen: Instant::now(),
        };
        self.offer = Some(offer);
        Some(offer)
    }

    /// The current pairing offer, if it has not expired
    pub fn current_offer(&mut self, expiry: Duration) -> Option<PairingOffer> {
        match self.offer {
            Some(offer) if offer.seen.elapsed() <= expiry => Some(offer),
            _ => {
                self.offer = None;
                None
            }
        }
    }

    /// Drop the recorded offer (a pairing attempt is consuming it)
    pub fn clear_offer(&mut self) {
        self.offer = None;
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
