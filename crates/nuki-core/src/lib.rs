//! Nuki BLE protocol engine
//!
//! This crate implements the client side of the Nuki Smart Lock API v2.x
//! over Bluetooth Low Energy: the pairing handshake (Curve25519 key
//! agreement, HSalsa20 key derivation, HMAC-SHA256 challenge
//! authentication), the two on-wire frame formats (plaintext pairing
//! channel and XSalsa20-Poly1305 user channel with CRC-16/CCITT-FALSE
//! framing), the command state machines, credential persistence and the
//! beacon-driven status notifications.
//!
//! ## Architecture
//!
//! The engine is headless and transport-agnostic. The host supplies three
//! seams:
//!
//! - a [`transport::BleTransport`] for the BLE link (connect, write,
//!   subscribe indications),
//! - a [`transport::ScanPublisher`] delivering advertising reports,
//! - a [`credentials::CredentialStore`] for persisted pairing state.
//!
//! [`client::NukiClient`] ties everything together and is generic over a
//! [`profile::DeviceProfile`]; [`lock::LockProfile`] and
//! [`opener::OpenerProfile`] instantiate it for the two device families:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use nuki_core::{DeviceIdentity, NukiClient, NukiConfig};
//! use nuki_core::credentials::MemoryStore;
//! use nuki_core::lock::{LockAction, LockProfile};
//! use nuki_core::pairing::IdType;
//!
//! # async fn example(transport: Arc<dyn nuki_core::transport::BleTransport>) {
//! let client = NukiClient::new(
//!     LockProfile,
//!     DeviceIdentity::new("bridge", 0x4242_4242, "nuki"),
//!     NukiConfig::default(),
//!     transport,
//!     Box::new(MemoryStore::new()),
//! );
//!
//! // scanner feeds advertisements; once a device offers pairing:
//! client.pair(IdType::Bridge).await;
//! client.lock_action(LockAction::Unlock, 0, 0, None).await;
//! # }
//! ```
//!
//! All operations return result sums ([`CmdResult`], [`PairingResult`])
//! rather than errors: protocol-level failures (dropped frames, bad CRC,
//! failed decryption) are logged and surface as timeouts, per the
//! deadline-driven design of the device protocol.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod beacon;
pub mod client;
pub mod command;
pub mod config;
pub mod credentials;
pub mod crypto;
pub mod errors;
pub mod frame;
pub mod lock;
pub mod opener;
pub mod pairing;
pub mod profile;
pub mod records;
pub mod transport;
pub mod types;

mod connection;
mod dispatch;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use client::NukiClient;
pub use command::{Action, ActionKind, CommandState};
pub use config::{DeviceIdentity, NukiConfig};
pub use credentials::{CredentialStore, Credentials};
pub use errors::{CmdResult, NukiError, PairingResult, Result};
pub use pairing::{IdType, PairingState};
pub use profile::DeviceProfile;
pub use transport::{Advertisement, BleTransport, EventHandler, NukiEvent, ScanPublisher};
pub use types::{AuthorizationId, BleAddress, CommandId, SecurityPin, SharedKey};
