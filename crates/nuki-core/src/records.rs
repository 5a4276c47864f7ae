//! Shared wire records
//!
//! Record layouts used by both the lock and the opener: keypad codes,
//! authorization entries, log entries and time-control entries. Everything
//! is decoded field by field with explicit little-endian rules; record
//! layouts are never read by casting buffers.

use serde::{Deserialize, Serialize};

use crate::errors::FrameError;

// ----------------------------------------------------------------------------
// Cursor helpers
// ----------------------------------------------------------------------------

/// Byte cursor for field-by-field record decoding
pub(crate) struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], FrameError> {
        if self.pos + n > self.data.len() {
            return Err(FrameError::BadFrame("record truncated"));
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, FrameError> {
        Ok(self.take(1)?[0])
    }

    pub fn u16_le(&mut self) -> Result<u16, FrameError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn i16_le(&mut self) -> Result<i16, FrameError> {
        let b = self.take(2)?;
        Ok(i16::from_le_bytes([b[0], b[1]]))
    }

    pub fn u32_le(&mut self) -> Result<u32, FrameError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn f32_le(&mut self) -> Result<f32, FrameError> {
        let b = self.take(4)?;
        Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Fixed-size NUL-padded name field
    pub fn name(&mut self, n: usize) -> Result<String, FrameError> {
        let raw = self.take(n)?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(n);
        Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
    }

    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }
}

/// Write a string into a fixed-size NUL-padded field
pub(crate) fn put_name(out: &mut Vec<u8>, name: &str, n: usize) {
    let bytes = name.as_bytes();
    let len = bytes.len().min(n);
    out.extend_from_slice(&bytes[..len]);
    out.resize(out.len() + (n - len), 0);
}

// ----------------------------------------------------------------------------
// Time Value
// ----------------------------------------------------------------------------

/// 7-byte wire datetime: year (LE), month, day, hour, minute, second
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TimeValue {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl TimeValue {
    pub const WIRE_LEN: usize = 7;

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.year.to_le_bytes());
        out.extend_from_slice(&[self.month, self.day, self.hour, self.minute, self.second]);
    }

    pub(crate) fn decode(r: &mut Reader<'_>) -> Result<Self, FrameError> {
        Ok(Self {
            year: r.u16_le()?,
            month: r.u8()?,
            day: r.u8()?,
            hour: r.u8()?,
            minute: r.u8()?,
            second: r.u8()?,
        })
    }
}

// ----------------------------------------------------------------------------
// Keypad Entries
// ----------------------------------------------------------------------------

/// Keypad code entry as reported by the device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeypadEntry {
    pub code_id: u16,
    pub code: u32,
    pub name: String,
    pub enabled: bool,
    pub date_created: TimeValue,
    pub date_last_active: TimeValue,
    pub lock_count: u16,
    pub time_limited: bool,
    pub allowed_from: TimeValue,
    pub allowed_until: TimeValue,
    pub allowed_weekdays: u8,
    pub allowed_from_time: [u8; 2],
    pub allowed_until_time: [u8; 2],
}

impl KeypadEntry {
    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        let mut r = Reader::new(data);
        Ok(Self {
            code_id: r.u16_le()?,
            code: r.u32_le()?,
            name: r.name(20)?,
            enabled: r.u8()? != 0,
            date_created: TimeValue::decode(&mut r)?,
            date_last_active: TimeValue::decode(&mut r)?,
            lock_count: r.u16_le()?,
            time_limited: r.u8()? != 0,
            allowed_from: TimeValue::decode(&mut r)?,
            allowed_until: TimeValue::decode(&mut r)?,
            allowed_weekdays: r.u8()?,
            allowed_from_time: [r.u8()?, r.u8()?],
            allowed_until_time: [r.u8()?, r.u8()?],
        })
    }
}

/// Payload of an `AddKeypadCode` command
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewKeypadEntry {
    pub code: u32,
    pub name: String,
    pub time_limited: bool,
    pub allowed_from: TimeValue,
    pub allowed_until: TimeValue,
    pub allowed_weekdays: u8,
    pub allowed_from_time: [u8; 2],
    pub allowed_until_time: [u8; 2],
}

impl NewKeypadEntry {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(43);
        out.extend_from_slice(&self.code.to_le_bytes());
        put_name(&mut out, &self.name, 20);
        out.push(self.time_limited as u8);
        self.allowed_from.encode(&mut out);
        self.allowed_until.encode(&mut out);
        out.push(self.allowed_weekdays);
        out.extend_from_slice(&self.allowed_from_time);
        out.extend_from_slice(&self.allowed_until_time);
        out
    }
}

/// Payload of an `UpdateKeypadCode` command
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdatedKeypadEntry {
    pub code_id: u16,
    pub code: u32,
    pub name: String,
    pub enabled: bool,
    pub time_limited: bool,
    pub allowed_from: TimeValue,
    pub allowed_until: TimeValue,
    pub allowed_weekdays: u8,
    pub allowed_from_time: [u8; 2],
    pub allowed_until_time: [u8; 2],
}

impl UpdatedKeypadEntry {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(46);
        out.extend_from_slice(&self.code_id.to_le_bytes());
        out.extend_from_slice(&self.code.to_le_bytes());
        put_name(&mut out, &self.name, 20);
        out.push(self.enabled as u8);
        out.push(self.time_limited as u8);
        self.allowed_from.encode(&mut out);
        self.allowed_until.encode(&mut out);
        out.push(self.allowed_weekdays);
        out.extend_from_slice(&self.allowed_from_time);
        out.extend_from_slice(&self.allowed_until_time);
        out
    }
}

// ----------------------------------------------------------------------------
// Authorization Entries
// ----------------------------------------------------------------------------

/// Authorization entry as reported by the device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationEntry {
    pub auth_id: u32,
    pub id_type: u8,
    pub name: String,
    pub enabled: bool,
    pub remote_allowed: bool,
    pub date_created: TimeValue,
    pub date_last_active: TimeValue,
    pub lock_count: u16,
    pub time_limited: bool,
    pub allowed_from: TimeValue,
    pub allowed_until: TimeValue,
    pub allowed_weekdays: u8,
    pub allowed_from_time: [u8; 2],
    pub allowed_until_time: [u8; 2],
}

impl AuthorizationEntry {
    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        let mut r = Reader::new(data);
        Ok(Self {
            auth_id: r.u32_le()?,
            id_type: r.u8()?,
            name: r.name(32)?,
            enabled: r.u8()? != 0,
            remote_allowed: r.u8()? != 0,
            date_created: TimeValue::decode(&mut r)?,
            date_last_active: TimeValue::decode(&mut r)?,
            lock_count: r.u16_le()?,
            time_limited: r.u8()? != 0,
            allowed_from: TimeValue::decode(&mut r)?,
            allowed_until: TimeValue::decode(&mut r)?,
            allowed_weekdays: r.u8()?,
            allowed_from_time: [r.u8()?, r.u8()?],
            allowed_until_time: [r.u8()?, r.u8()?],
        })
    }
}

/// Payload of an `AuthorizationDataInvite` command
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewAuthorizationEntry {
    pub name: String,
    pub id_type: u8,
    pub remote_allowed: bool,
    pub time_limited: bool,
    pub allowed_from: TimeValue,
    pub allowed_until: TimeValue,
    pub allowed_weekdays: u8,
    pub allowed_from_time: [u8; 2],
    pub allowed_until_time: [u8; 2],
}

impl NewAuthorizationEntry {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(54);
        put_name(&mut out, &self.name, 32);
        out.push(self.id_type);
        out.push(self.remote_allowed as u8);
        out.push(self.time_limited as u8);
        self.allowed_from.encode(&mut out);
        self.allowed_until.encode(&mut out);
        out.push(self.allowed_weekdays);
        out.extend_from_slice(&self.allowed_from_time);
        out.extend_from_slice(&self.allowed_until_time);
        out
    }
}

/// Payload of an `UpdateAuthorizationEntry` command
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdatedAuthorizationEntry {
    pub auth_id: u32,
    pub name: String,
    pub enabled: bool,
    pub remote_allowed: bool,
    pub time_limited: bool,
    pub allowed_from: TimeValue,
    pub allowed_until: TimeValue,
    pub allowed_weekdays: u8,
    pub allowed_from_time: [u8; 2],
    pub allowed_until_time: [u8; 2],
}

impl UpdatedAuthorizationEntry {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(57);
        out.extend_from_slice(&self.auth_id.to_le_bytes());
        put_name(&mut out, &self.name, 32);
        out.push(self.enabled as u8);
        out.push(self.remote_allowed as u8);
        out.push(self.time_limited as u8);
        self.allowed_from.encode(&mut out);
        self.allowed_until.encode(&mut out);
        out.push(self.allowed_weekdays);
        out.extend_from_slice(&self.allowed_from_time);
        out.extend_from_slice(&self.allowed_until_time);
        out
    }
}

// ----------------------------------------------------------------------------
// Log Entries
// ----------------------------------------------------------------------------

/// Activity log entry. The payload after the type byte is device- and
/// type-specific; it is kept raw and interpreted by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub index: u32,
    pub timestamp: TimeValue,
    pub auth_id: u32,
    pub name: String,
    pub log_type: u8,
    pub data: Vec<u8>,
}

impl LogEntry {
    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        let mut r = Reader::new(data);
        Ok(Self {
            index: r.u32_le()?,
            timestamp: TimeValue::decode(&mut r)?,
            auth_id: r.u32_le()?,
            name: r.name(32)?,
            log_type: r.u8()?,
            data: r.remaining().to_vec(),
        })
    }
}

// ----------------------------------------------------------------------------
// Time Control Entries
// ----------------------------------------------------------------------------

/// Scheduled action entry as reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeControlEntry {
    pub entry_id: u8,
    pub enabled: bool,
    pub weekdays: u8,
    pub hour: u8,
    pub minute: u8,
    pub lock_action: u8,
}

impl TimeControlEntry {
    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        let mut r = Reader::new(data);
        Ok(Self {
            entry_id: r.u8()?,
            enabled: r.u8()? != 0,
            weekdays: r.u8()?,
            hour: r.u8()?,
            minute: r.u8()?,
            lock_action: r.u8()?,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        vec![
            self.entry_id,
            self.enabled as u8,
            self.weekdays,
            self.hour,
            self.minute,
            self.lock_action,
        ]
    }
}

/// Payload of an `AddTimeControlEntry` command
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct NewTimeControlEntry {
    pub weekdays: u8,
    pub hour: u8,
    pub minute: u8,
    pub lock_action: u8,
}

impl NewTimeControlEntry {
    pub fn encode(&self) -> Vec<u8> {
        vec![self.weekdays, self.hour, self.minute, self.lock_action]
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
