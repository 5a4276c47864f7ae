//! Error and result types for the Nuki BLE protocol
//!
//! Two layers coexist here. Internal fallible operations (framing, crypto)
//! return `Result` with the error enums below. Caller-visible operation
//! outcomes are result sums (`CmdResult`, `PairingResult`): protocol-level
//! failures such as a dropped frame never surface as errors, they surface
//! as a timeout once the relevant deadline elapses.

use thiserror::Error;

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Cryptographic failures
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("decryption or authentication failed")]
    DecryptionFailed,
    #[error("key derivation failed")]
    KeyDerivationFailed,
}

/// Frame parsing failures
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("CRC check failed")]
    CrcInvalid,
    #[error("malformed frame: {0}")]
    BadFrame(&'static str),
    #[error("decryption or authentication failed")]
    DecryptFailed,
}

/// Unified error type for the crate
#[derive(Debug, Error)]
pub enum NukiError {
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("credential store error: {0}")]
    Store(&'static str),

    #[error("not paired")]
    NotPaired,
}

pub type Result<T> = core::result::Result<T, NukiError>;

// ----------------------------------------------------------------------------
// Operation Outcomes
// ----------------------------------------------------------------------------

/// Outcome of a command execution.
///
/// `Working` is internal to the state machines and never returned to
/// callers; `execute_action` keeps polling while a machine reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdResult {
    /// The command completed and any returned records are valid
    Success,
    /// The device reported an error, or a local invariant was violated
    Failed,
    /// A per-step or bulk-collection deadline elapsed
    TimeOut,
    /// The state machine has not reached a terminal state yet
    Working,
    /// No valid credentials are stored
    NotPaired,
    /// The device reported it is busy (`ErrorReport` 0x45)
    LockBusy,
    /// Precondition failure: heartbeat guard tripped
    Error,
}

/// Outcome of a pairing attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingResult {
    /// Paired; credentials persisted
    Success,
    /// No device in pairing mode was seen, or the link could not be set up
    Pairing,
    /// The pairing deadline elapsed
    Timeout,
}
