//! Smart Lock device profile
//!
//! BLE identifiers, the lock action dictionary, the lock's state and
//! configuration records, and the high-level operations layered on the
//! generic client. Configuration mutators follow the device's
//! read-modify-write contract: fetch the current config, change one field,
//! write the whole record back.

use uuid::Uuid;

use crate::client::NukiClient;
use crate::command::{Action, ActionKind};
use crate::errors::{CmdResult, FrameError};
use crate::profile::DeviceProfile;
use crate::records::{put_name, Reader, TimeValue};
use crate::types::CommandId;

// ----------------------------------------------------------------------------
// BLE identifiers
// ----------------------------------------------------------------------------

pub const PAIRING_SERVICE_UUID: Uuid = Uuid::from_u128(0xa92ee100_5501_11e4_916c_0800200c9a66);
pub const PAIRING_GDIO_UUID: Uuid = Uuid::from_u128(0xa92ee101_5501_11e4_916c_0800200c9a66);
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0xa92ee200_5501_11e4_916c_0800200c9a66);
pub const USDIO_UUID: Uuid = Uuid::from_u128(0xa92ee202_5501_11e4_916c_0800200c9a66);
/// Ultra devices advertise a separate pairing service
pub const ULTRA_PAIRING_SERVICE_UUID: Uuid =
    Uuid::from_u128(0xa92ee300_5501_11e4_916c_0800200c9a66);
pub const ULTRA_PAIRING_GDIO_UUID: Uuid =
    Uuid::from_u128(0xa92ee301_5501_11e4_916c_0800200c9a66);

// ----------------------------------------------------------------------------
// Lock actions
// ----------------------------------------------------------------------------

/// High-level verbs the lock executes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LockAction {
    Unlock = 0x01,
    Lock = 0x02,
    Unlatch = 0x03,
    LockNgo = 0x04,
    LockNgoUnlatch = 0x05,
    FullLock = 0x06,
    FobAction1 = 0x81,
    FobAction2 = 0x82,
    FobAction3 = 0x83,
}

// ----------------------------------------------------------------------------
// Records
// ----------------------------------------------------------------------------

/// Key turner state record (`KeyturnerStates`)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct KeyTurnerState {
    pub nuki_state: u8,
    pub lock_state: u8,
    pub trigger: u8,
    pub current_time: TimeValue,
    pub timezone_offset: i16,
    pub critical_battery_state: u8,
    pub config_update_count: u8,
    pub lock_n_go_timer: u8,
    pub last_lock_action: u8,
    pub last_lock_action_trigger: u8,
    pub last_lock_action_completion_status: u8,
    pub door_sensor_state: u8,
    pub nightmode_active: u16,
    pub accessory_battery_state: u8,
}

impl KeyTurnerState {
    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        let mut r = Reader::new(data);
        let mut state = Self {
            nuki_state: r.u8()?,
            lock_state: r.u8()?,
            trigger: r.u8()?,
            current_time: TimeValue::decode(&mut r)?,
            timezone_offset: r.i16_le()?,
            critical_battery_state: r.u8()?,
            config_update_count: r.u8()?,
            lock_n_go_timer: r.u8()?,
            last_lock_action: r.u8()?,
            last_lock_action_trigger: r.u8()?,
            last_lock_action_completion_status: r.u8()?,
            door_sensor_state: r.u8()?,
            ..Self::default()
        };
        // Trailing fields were added over firmware generations.
        state.nightmode_active = r.u16_le().unwrap_or(0);
        state.accessory_battery_state = r.u8().unwrap_or(0);
        Ok(state)
    }
}

/// Battery report record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatteryReport {
    pub battery_drain: u16,
    pub battery_voltage: u16,
    pub critical_battery_state: u8,
    pub lock_action: u8,
    pub start_voltage: u16,
    pub lowest_voltage: u16,
    pub lock_distance: u16,
    pub start_temperature: i8,
    pub max_turn_current: u16,
    pub battery_resistance: u16,
}

impl BatteryReport {
    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        let mut r = Reader::new(data);
        Ok(Self {
            battery_drain: r.u16_le()?,
            battery_voltage: r.u16_le()?,
            critical_battery_state: r.u8()?,
            lock_action: r.u8()?,
            start_voltage: r.u16_le()?,
            lowest_voltage: r.u16_le()?,
            lock_distance: r.u16_le()?,
            start_temperature: r.u8()? as i8,
            max_turn_current: r.u16_le()?,
            battery_resistance: r.u16_le()?,
        })
    }
}

/// Main configuration record
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    pub nuki_id: u32,
    pub name: String,
    pub latitude: f32,
    pub longitude: f32,
    pub auto_unlatch: bool,
    pub pairing_enabled: bool,
    pub button_enabled: bool,
    pub led_enabled: bool,
    pub led_brightness: u8,
    pub current_time: TimeValue,
    pub timezone_offset: i16,
    pub dst_mode: u8,
    pub has_fob: bool,
    pub fob_action_1: u8,
    pub fob_action_2: u8,
    pub fob_action_3: u8,
    pub single_lock: bool,
    pub advertising_mode: u8,
    pub has_keypad: bool,
    pub firmware_version: [u8; 3],
    pub hardware_revision: [u8; 2],
    pub homekit_status: u8,
    pub timezone_id: u16,
}

impl Config {
    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        let mut r = Reader::new(data);
        Ok(Self {
            nuki_id: r.u32_le()?,
            name: r.name(32)?,
            latitude: r.f32_le()?,
            longitude: r.f32_le()?,
            auto_unlatch: r.u8()? != 0,
            pairing_enabled: r.u8()? != 0,
            button_enabled: r.u8()? != 0,
            led_enabled: r.u8()? != 0,
            led_brightness: r.u8()?,
            current_time: TimeValue::decode(&mut r)?,
            timezone_offset: r.i16_le()?,
            dst_mode: r.u8()?,
            has_fob: r.u8()? != 0,
            fob_action_1: r.u8()?,
            fob_action_2: r.u8()?,
            fob_action_3: r.u8()?,
            single_lock: r.u8()? != 0,
            advertising_mode: r.u8()?,
            has_keypad: r.u8()? != 0,
            firmware_version: r.take(3)?.try_into().unwrap(),
            hardware_revision: r.take(2)?.try_into().unwrap(),
            homekit_status: r.u8()?,
            timezone_id: r.u16_le()?,
        })
    }
}

/// Writable subset of [`Config`], the `SetConfig` payload
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewConfig {
    pub name: String,
    pub latitude: f32,
    pub longitude: f32,
    pub auto_unlatch: bool,
    pub pairing_enabled: bool,
    pub button_enabled: bool,
    pub led_enabled: bool,
    pub led_brightness: u8,
    pub timezone_offset: i16,
    pub dst_mode: u8,
    pub fob_action_1: u8,
    pub fob_action_2: u8,
    pub fob_action_3: u8,
    pub single_lock: bool,
    pub advertising_mode: u8,
    pub timezone_id: u16,
}

impl NewConfig {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(53);
        put_name(&mut out, &self.name, 32);
        out.extend_from_slice(&self.latitude.to_le_bytes());
        out.extend_from_slice(&self.longitude.to_le_bytes());
        out.push(self.auto_unlatch as u8);
        out.push(self.pairing_enabled as u8);
        out.push(self.button_enabled as u8);
        out.push(self.led_enabled as u8);
        out.push(self.led_brightness);
        out.extend_from_slice(&self.timezone_offset.to_le_bytes());
        out.push(self.dst_mode);
        out.push(self.fob_action_1);
        out.push(self.fob_action_2);
        out.push(self.fob_action_3);
        out.push(self.single_lock as u8);
        out.push(self.advertising_mode);
        out.extend_from_slice(&self.timezone_id.to_le_bytes());
        out
    }
}

impl From<&Config> for NewConfig {
    fn from(config: &Config) -> Self {
        Self {
            name: config.name.clone(),
            latitude: config.latitude,
            longitude: config.longitude,
            auto_unlatch: config.auto_unlatch,
            pairing_enabled: config.pairing_enabled,
            button_enabled: config.button_enabled,
            led_enabled: config.led_enabled,
            led_brightness: config.led_brightness,
            timezone_offset: config.timezone_offset,
            dst_mode: config.dst_mode,
            fob_action_1: config.fob_action_1,
            fob_action_2: config.fob_action_2,
            fob_action_3: config.fob_action_3,
            single_lock: config.single_lock,
            advertising_mode: config.advertising_mode,
            timezone_id: config.timezone_id,
        }
    }
}

/// Advanced configuration record; also the `SetAdvancedConfig` payload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdvancedConfig {
    pub total_degrees: u16,
    pub unlocked_position_offset_degrees: i16,
    pub locked_position_offset_degrees: i16,
    pub single_locked_position_offset_degrees: i16,
    pub unlocked_to_locked_transition_offset_degrees: i16,
    pub lock_n_go_timeout: u8,
    pub single_button_press_action: u8,
    pub double_button_press_action: u8,
    pub detached_cylinder: bool,
    pub battery_type: u8,
    pub automatic_battery_type_detection: bool,
    pub unlatch_duration: u8,
    pub auto_lock_timeout: u16,
    pub auto_unlock_disabled: bool,
    pub nightmode_enabled: bool,
    pub nightmode_start_time: [u8; 2],
    pub nightmode_end_time: [u8; 2],
    pub nightmode_auto_lock_enabled: bool,
    pub nightmode_auto_unlock_disabled: bool,
    pub nightmode_immediate_lock_on_start: bool,
    pub auto_lock_enabled: bool,
    pub immediate_auto_lock_enabled: bool,
    pub auto_update_enabled: bool,
}

impl AdvancedConfig {
    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        let mut r = Reader::new(data);
        Ok(Self {
            total_degrees: r.u16_le()?,
            unlocked_position_offset_degrees: r.i16_le()?,
            locked_position_offset_degrees: r.i16_le()?,
            single_locked_position_offset_degrees: r.i16_le()?,
            unlocked_to_locked_transition_offset_degrees: r.i16_le()?,
            lock_n_go_timeout: r.u8()?,
            single_button_press_action: r.u8()?,
            double_button_press_action: r.u8()?,
            detached_cylinder: r.u8()? != 0,
            battery_type: r.u8()?,
            automatic_battery_type_detection: r.u8()? != 0,
            unlatch_duration: r.u8()?,
            auto_lock_timeout: r.u16_le()?,
            auto_unlock_disabled: r.u8()? != 0,
            nightmode_enabled: r.u8()? != 0,
            nightmode_start_time: r.take(2)?.try_into().unwrap(),
            nightmode_end_time: r.take(2)?.try_into().unwrap(),
            nightmode_auto_lock_enabled: r.u8()? != 0,
            nightmode_auto_unlock_disabled: r.u8()? != 0,
            nightmode_immediate_lock_on_start: r.u8()? != 0,
            auto_lock_enabled: r.u8()? != 0,
            immediate_auto_lock_enabled: r.u8()? != 0,
            auto_update_enabled: r.u8()? != 0,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(29);
        out.extend_from_slice(&self.total_degrees.to_le_bytes());
        out.extend_from_slice(&self.unlocked_position_offset_degrees.to_le_bytes());
        out.extend_from_slice(&self.locked_position_offset_degrees.to_le_bytes());
        out.extend_from_slice(&self.single_locked_position_offset_degrees.to_le_bytes());
        out.extend_from_slice(&self.unlocked_to_locked_transition_offset_degrees.to_le_bytes());
        out.push(self.lock_n_go_timeout);
        out.push(self.single_button_press_action);
        out.push(self.double_button_press_action);
        out.push(self.detached_cylinder as u8);
        out.push(self.battery_type);
        out.push(self.automatic_battery_type_detection as u8);
        out.push(self.unlatch_duration);
        out.extend_from_slice(&self.auto_lock_timeout.to_le_bytes());
        out.push(self.auto_unlock_disabled as u8);
        out.push(self.nightmode_enabled as u8);
        out.extend_from_slice(&self.nightmode_start_time);
        out.extend_from_slice(&self.nightmode_end_time);
        out.push(self.nightmode_auto_lock_enabled as u8);
        out.push(self.nightmode_auto_unlock_disabled as u8);
        out.push(self.nightmode_immediate_lock_on_start as u8);
        out.push(self.auto_lock_enabled as u8);
        out.push(self.immediate_auto_lock_enabled as u8);
        out.push(self.auto_update_enabled as u8);
        out
    }
}

// ----------------------------------------------------------------------------
// Profile
// ----------------------------------------------------------------------------

/// Device-specific records decoded from lock responses
#[derive(Debug, Default)]
pub struct LockInbox {
    pub key_turner_state: Option<KeyTurnerState>,
    pub battery_report: Option<BatteryReport>,
    pub config: Option<Config>,
    pub advanced_config: Option<AdvancedConfig>,
}

/// Profile for Nuki Smart Lock devices
#[derive(Debug, Clone, Copy, Default)]
pub struct LockProfile;

impl DeviceProfile for LockProfile {
    type Inbox = LockInbox;

    fn pairing_service(&self, ultra: bool) -> Uuid {
        if ultra {
            ULTRA_PAIRING_SERVICE_UUID
        } else {
            PAIRING_SERVICE_UUID
        }
    }

    fn gdio_characteristic(&self, ultra: bool) -> Uuid {
        if ultra {
            ULTRA_PAIRING_GDIO_UUID
        } else {
            PAIRING_GDIO_UUID
        }
    }

    fn data_service(&self) -> Uuid {
        SERVICE_UUID
    }

    fn usdio_characteristic(&self) -> Uuid {
        USDIO_UUID
    }

    fn dispatch(&self, inbox: &mut LockInbox, command: CommandId, payload: &[u8]) -> bool {
        let decoded = match command {
            CommandId::KEYTURNER_STATES => KeyTurnerState::decode(payload)
                .map(|state| inbox.key_turner_state = Some(state)),
            CommandId::BATTERY_REPORT => BatteryReport::decode(payload)
                .map(|report| inbox.battery_report = Some(report)),
            CommandId::CONFIG => Config::decode(payload).map(|config| inbox.config = Some(config)),
            CommandId::ADVANCED_CONFIG => AdvancedConfig::decode(payload)
                .map(|config| inbox.advanced_config = Some(config)),
            _ => return false,
        };
        if let Err(err) = decoded {
            tracing::warn!(%command, %err, "dropping malformed lock record");
        }
        true
    }
}

// ----------------------------------------------------------------------------
// Lock operations
// ----------------------------------------------------------------------------

impl NukiClient<LockProfile> {
    /// Execute a lock action. `name_suffix` (≤ 19 bytes) is appended to the
    /// log entry the device writes for this action.
    pub async fn lock_action(
        &self,
        action: LockAction,
        app_id: u32,
        flags: u8,
        name_suffix: Option<&str>,
    ) -> CmdResult {
        let mut payload = vec![action as u8];
        payload.extend_from_slice(&app_id.to_le_bytes());
        payload.push(flags);
        if let Some(suffix) = name_suffix {
            let bytes = suffix.as_bytes();
            payload.extend_from_slice(&bytes[..bytes.len().min(19)]);
        }
        self.execute_action(Action::new(
            ActionKind::CommandWithChallengeAndAccept,
            CommandId::LOCK_ACTION,
            payload,
        ))
        .await
    }

    /// Read the key turner state; the record is kept for
    /// [`NukiClient::key_turner_state`]
    pub async fn request_key_turner_state(&self) -> CmdResult {
        self.execute_action(Action::request(CommandId::KEYTURNER_STATES))
            .await
    }

    /// Last key turner state received, if any
    pub fn key_turner_state(&self) -> Option<KeyTurnerState> {
        self.with_inbox(|inbox| inbox.key_turner_state)
    }

    pub async fn request_battery_report(&self) -> CmdResult {
        self.execute_action(Action::request(CommandId::BATTERY_REPORT))
            .await
    }

    pub fn battery_report(&self) -> Option<BatteryReport> {
        self.with_inbox(|inbox| inbox.battery_report)
    }

    pub async fn request_config(&self) -> CmdResult {
        self.execute_action(Action::new(
            ActionKind::CommandWithChallenge,
            CommandId::REQUEST_CONFIG,
            Vec::new(),
        ))
        .await
    }

    pub fn config(&self) -> Option<Config> {
        self.with_inbox(|inbox| inbox.config.clone())
    }

    pub async fn request_advanced_config(&self) -> CmdResult {
        self.execute_action(Action::new(
            ActionKind::CommandWithChallenge,
            CommandId::REQUEST_ADVANCED_CONFIG,
            Vec::new(),
        ))
        .await
    }

    pub fn advanced_config(&self) -> Option<AdvancedConfig> {
        self.with_inbox(|inbox| inbox.advanced_config)
    }

    /// Write a full configuration record
    pub async fn set_config(&self, config: NewConfig) -> CmdResult {
        self.execute_action(Action::new(
            ActionKind::CommandWithChallengeAndPin,
            CommandId::SET_CONFIG,
            config.encode(),
        ))
        .await
    }

    /// Write a full advanced configuration record
    pub async fn set_advanced_config(&self, config: AdvancedConfig) -> CmdResult {
        self.execute_action(Action::new(
            ActionKind::CommandWithChallengeAndPin,
            CommandId::SET_ADVANCED_CONFIG,
            config.encode(),
        ))
        .await
    }

    /// Read-modify-write one field of the main configuration. Costs two
    /// challenge exchanges: the read and the write.
    pub async fn modify_config(&self, modify: impl FnOnce(&mut NewConfig)) -> CmdResult {
        let result = self.request_config().await;
        if result != CmdResult::Success {
            return result;
        }
        let Some(config) = self.config() else {
            return CmdResult::Failed;
        };
        let mut new = NewConfig::from(&config);
        modify(&mut new);
        self.set_config(new).await
    }

    /// Read-modify-write one field of the advanced configuration
    pub async fn modify_advanced_config(
        &self,
        modify: impl FnOnce(&mut AdvancedConfig),
    ) -> CmdResult {
        let result = self.request_advanced_config().await;
        if result != CmdResult::Success {
            return result;
        }
        let Some(mut config) = self.advanced_config() else {
            return CmdResult::Failed;
        };
        modify(&mut config);
        self.set_advanced_config(config).await
    }

    // ------------------------------------------------------------------
    // Main config mutators
    // ------------------------------------------------------------------

    pub async fn set_name(&self, name: &str) -> CmdResult {
        let name = name.to_string();
        self.modify_config(move |config| config.name = name).await
    }

    pub async fn set_latitude(&self, degrees: f32) -> CmdResult {
        self.modify_config(move |config| config.latitude = degrees)
            .await
    }

    pub async fn set_longitude(&self, degrees: f32) -> CmdResult {
        self.modify_config(move |config| config.longitude = degrees)
            .await
    }

    pub async fn enable_auto_unlatch(&self, enable: bool) -> CmdResult {
        self.modify_config(move |config| config.auto_unlatch = enable)
            .await
    }

    pub async fn enable_pairing(&self, enable: bool) -> CmdResult {
        self.modify_config(move |config| config.pairing_enabled = enable)
            .await
    }

    pub async fn enable_button(&self, enable: bool) -> CmdResult {
        self.modify_config(move |config| config.button_enabled = enable)
            .await
    }

    pub async fn enable_led_flash(&self, enable: bool) -> CmdResult {
        self.modify_config(move |config| config.led_enabled = enable)
            .await
    }

    pub async fn set_led_brightness(&self, level: u8) -> CmdResult {
        self.modify_config(move |config| config.led_brightness = level)
            .await
    }

    pub async fn enable_dst(&self, enable: bool) -> CmdResult {
        self.modify_config(move |config| config.dst_mode = enable as u8)
            .await
    }

    pub async fn set_timezone_offset(&self, minutes: i16) -> CmdResult {
        self.modify_config(move |config| config.timezone_offset = minutes)
            .await
    }

    pub async fn set_timezone_id(&self, timezone_id: u16) -> CmdResult {
        self.modify_config(move |config| config.timezone_id = timezone_id)
            .await
    }

    /// Set one of the three fob action slots (1-based)
    pub async fn set_fob_action(&self, slot: u8, action: u8) -> CmdResult {
        self.modify_config(move |config| match slot {
            1 => config.fob_action_1 = action,
            2 => config.fob_action_2 = action,
            3 => config.fob_action_3 = action,
            _ => {}
        })
        .await
    }

    pub async fn enable_single_lock(&self, enable: bool) -> CmdResult {
        self.modify_config(move |config| config.single_lock = enable)
            .await
    }

    pub async fn set_advertising_mode(&self, mode: u8) -> CmdResult {
        self.modify_config(move |config| config.advertising_mode = mode)
            .await
    }

    // ------------------------------------------------------------------
    // Advanced config mutators
    // ------------------------------------------------------------------

    pub async fn set_unlatch_duration(&self, seconds: u8) -> CmdResult {
        self.modify_advanced_config(move |config| config.unlatch_duration = seconds)
            .await
    }

    pub async fn set_auto_lock_timeout(&self, seconds: u16) -> CmdResult {
        self.modify_advanced_config(move |config| config.auto_lock_timeout = seconds)
            .await
    }

    pub async fn enable_auto_lock(&self, enable: bool) -> CmdResult {
        self.modify_advanced_config(move |config| config.auto_lock_enabled = enable)
            .await
    }

    pub async fn enable_immediate_auto_lock(&self, enable: bool) -> CmdResult {
        self.modify_advanced_config(move |config| config.immediate_auto_lock_enabled = enable)
            .await
    }

    pub async fn disable_auto_unlock(&self, disable: bool) -> CmdResult {
        self.modify_advanced_config(move |config| config.auto_unlock_disabled = disable)
            .await
    }

    pub async fn enable_auto_update(&self, enable: bool) -> CmdResult {
        self.modify_advanced_config(move |config| config.auto_update_enabled = enable)
            .await
    }

    pub async fn set_lock_n_go_timeout(&self, seconds: u8) -> CmdResult {
        self.modify_advanced_config(move |config| config.lock_n_go_timeout = seconds)
            .await
    }

    pub async fn enable_detached_cylinder(&self, enable: bool) -> CmdResult {
        self.modify_advanced_config(move |config| config.detached_cylinder = enable)
            .await
    }

    pub async fn set_single_button_press_action(&self, action: u8) -> CmdResult {
        self.modify_advanced_config(move |config| config.single_button_press_action = action)
            .await
    }

    pub async fn set_double_button_press_action(&self, action: u8) -> CmdResult {
        self.modify_advanced_config(move |config| config.double_button_press_action = action)
            .await
    }

    pub async fn set_battery_type(&self, battery_type: u8) -> CmdResult {
        self.modify_advanced_config(move |config| config.battery_type = battery_type)
            .await
    }

    pub async fn enable_auto_battery_type_detection(&self, enable: bool) -> CmdResult {
        self.modify_advanced_config(move |config| {
            config.automatic_battery_type_detection = enable
        })
        .await
    }

    pub async fn set_unlocked_position_offset_degrees(&self, degrees: i16) -> CmdResult {
        self.modify_advanced_config(move |config| {
            config.unlocked_position_offset_degrees = degrees
        })
        .await
    }

    pub async fn set_locked_position_offset_degrees(&self, degrees: i16) -> CmdResult {
        self.modify_advanced_config(move |config| {
            config.locked_position_offset_degrees = degrees
        })
        .await
    }

    pub async fn set_single_locked_position_offset_degrees(&self, degrees: i16) -> CmdResult {
        self.modify_advanced_config(move |config| {
            config.single_locked_position_offset_degrees = degrees
        })
        .await
    }

    pub async fn set_unlocked_to_locked_transition_offset_degrees(
        &self,
        degrees: i16,
    ) -> CmdResult {
        self.modify_advanced_config(move |config| {
            config.unlocked_to_locked_transition_offset_degrees = degrees
        })
        .await
    }

    pub async fn enable_night_mode(&self, enable: bool) -> CmdResult {
        self.modify_advanced_config(move |config| config.nightmode_enabled = enable)
            .await
    }

    pub async fn set_night_mode_start_time(&self, time: [u8; 2]) -> CmdResult {
        self.modify_advanced_config(move |config| config.nightmode_start_time = time)
            .await
    }

    pub async fn set_night_mode_end_time(&self, time: [u8; 2]) -> CmdResult {
        self.modify_advanced_config(move |config| config.nightmode_end_time = time)
            .await
    }

    pub async fn enable_night_mode_auto_lock(&self, enable: bool) -> CmdResult {
        self.modify_advanced_config(move |config| config.nightmode_auto_lock_enabled = enable)
            .await
    }

    pub async fn disable_night_mode_auto_unlock(&self, disable: bool) -> CmdResult {
        self.modify_advanced_config(move |config| {
            config.nightmode_auto_unlock_disabled = disable
        })
        .await
    }

    pub async fn enable_night_mode_immediate_lock_on_start(&self, enable: bool) -> CmdResult {
        self.modify_advanced_config(move |config| {
            config.nightmode_immediate_lock_on_start = enable
        })
        .await
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
