//! Opener device profile
//!
//! The Opener speaks the same protocol with its own service ids, action
//! dictionary and state record. Everything else rides on the generic
//! engine.

use uuid::Uuid;

use crate::client::NukiClient;
use crate::command::{Action, ActionKind};
use crate::errors::{CmdResult, FrameError};
use crate::profile::DeviceProfile;
use crate::records::{Reader, TimeValue};
use crate::types::CommandId;

// ----------------------------------------------------------------------------
// BLE identifiers
// ----------------------------------------------------------------------------

pub const PAIRING_SERVICE_UUID: Uuid = Uuid::from_u128(0xa92ae100_5501_11e4_916c_0800200c9a66);
pub const PAIRING_GDIO_UUID: Uuid = Uuid::from_u128(0xa92ae101_5501_11e4_916c_0800200c9a66);
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0xa92ae200_5501_11e4_916c_0800200c9a66);
pub const USDIO_UUID: Uuid = Uuid::from_u128(0xa92ae202_5501_11e4_916c_0800200c9a66);

// ----------------------------------------------------------------------------
// Opener actions
// ----------------------------------------------------------------------------

/// High-level verbs the opener executes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpenerAction {
    /// Activate ring-to-open
    ActivateRto = 0x01,
    /// Deactivate ring-to-open
    DeactivateRto = 0x02,
    /// Actuate the electric strike
    ElectricStrikeActuation = 0x03,
    /// Activate continuous mode
    ActivateContinuousMode = 0x04,
    /// Deactivate continuous mode
    DeactivateContinuousMode = 0x05,
    FobAction1 = 0x81,
    FobAction2 = 0x82,
    FobAction3 = 0x83,
}

// ----------------------------------------------------------------------------
// Records
// ----------------------------------------------------------------------------

/// Opener state record (`KeyturnerStates` equivalent)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OpenerState {
    pub nuki_state: u8,
    pub lock_state: u8,
    pub trigger: u8,
    pub current_time: TimeValue,
    pub timezone_offset: i16,
    pub critical_battery_state: u8,
    pub config_update_count: u8,
    pub ring_to_open_timer: u8,
    pub last_lock_action: u8,
    pub last_lock_action_trigger: u8,
    pub last_lock_action_completion_status: u8,
    pub door_sensor_state: u8,
}

impl OpenerState {
    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        let mut r = Reader::new(data);
        Ok(Self {
            nuki_state: r.u8()?,
            lock_state: r.u8()?,
            trigger: r.u8()?,
            current_time: TimeValue::decode(&mut r)?,
            timezone_offset: r.i16_le()?,
            critical_battery_state: r.u8()?,
            config_update_count: r.u8()?,
            ring_to_open_timer: r.u8()?,
            last_lock_action: r.u8()?,
            last_lock_action_trigger: r.u8()?,
            last_lock_action_completion_status: r.u8()?,
            door_sensor_state: r.u8().unwrap_or(0),
        })
    }
}

// ----------------------------------------------------------------------------
// Profile
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct OpenerInbox {
    pub opener_state: Option<OpenerState>,
}

/// Profile for Nuki Opener devices
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenerProfile;

impl DeviceProfile for OpenerProfile {
    type Inbox = OpenerInbox;

    fn pairing_service(&self, _ultra: bool) -> Uuid {
        // No ultra variant of the opener exists; both ids are the same.
        PAIRING_SERVICE_UUID
    }

    fn gdio_characteristic(&self, _ultra: bool) -> Uuid {
        PAIRING_GDIO_UUID
    }

    fn data_service(&self) -> Uuid {
        SERVICE_UUID
    }

    fn usdio_characteristic(&self) -> Uuid {
        USDIO_UUID
    }

    fn dispatch(&self, inbox: &mut OpenerInbox, command: CommandId, payload: &[u8]) -> bool {
        match command {
            CommandId::KEYTURNER_STATES => {
                match OpenerState::decode(payload) {
                    Ok(state) => inbox.opener_state = Some(state),
                    Err(err) => {
                        tracing::warn!(%err, "dropping malformed opener state");
                    }
                }
                true
            }
            _ => false,
        }
    }
}

// ----------------------------------------------------------------------------
// Opener operations
// ----------------------------------------------------------------------------

impl NukiClient<OpenerProfile> {
    /// Execute an opener action
    pub async fn opener_action(
        &self,
        action: OpenerAction,
        app_id: u32,
        flags: u8,
    ) -> CmdResult {
        let mut payload = vec![action as u8];
        payload.extend_from_slice(&app_id.to_le_bytes());
        payload.push(flags);
        self.execute_action(Action::new(
            ActionKind::CommandWithChallengeAndAccept,
            CommandId::LOCK_ACTION,
            payload,
        ))
        .await
    }

    /// Read the opener state; kept for [`NukiClient::opener_state`]
    pub async fn request_opener_state(&self) -> CmdResult {
        self.execute_action(Action::request(CommandId::KEYTURNER_STATES))
            .await
    }

    pub fn opener_state(&self) -> Option<OpenerState> {
        self.with_inbox(|inbox| inbox.opener_state)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opener_state_decode() {
        let mut wire = vec![0x02, 0x01, 0x06];
        TimeValue::default().encode(&mut wire);
        wire.extend_from_slice(&(-120i16).to_le_bytes());
        wire.extend_from_slice(&[0, 3, 30, 1, 2, 0, 0]);

        let state = OpenerState::decode(&wire).unwrap();
        assert_eq!(state.lock_state, 0x01);
        assert_eq!(state.timezone_offset, -120);
        assert_eq!(state.ring_to_open_timer, 30);
    }

    #[test]
    fn test_opener_profile_dispatch() {
        let profile = OpenerProfile;
        let mut inbox = OpenerInbox::default();
        let mut wire = vec![0x02, 0x03, 0x00];
        TimeValue::default().encode(&mut wire);
        wire.extend_from_slice(&0i16.to_le_bytes());
        wire.extend_from_slice(&[0, 0, 0, 0, 0, 0]);
        assert!(profile.dispatch(&mut inbox, CommandId::KEYTURNER_STATES, &wire));
        assert_eq!(inbox.opener_state.unwrap().lock_state, 0x03);
        assert!(!profile.dispatch(&mut inbox, CommandId::ERROR_REPORT, &[0x10]));
    }
}
