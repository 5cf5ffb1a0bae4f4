// ── Protocol codec ──
//
// The messages exchanged between zmon actors over the broker. A message is
// one of three kinds (DEVICE, OK, ERROR); device records carry an open map
// of string extensions used for batch metadata and caller-defined tags.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::error::{Error, Result};

/// Conventional stream on which device changes are published.
pub const DEVICE_STREAM: &str = "_DEVICES";

// ── MessageKind ──────────────────────────────────────────────────────

/// Discriminant of a [`ProtoMessage`], as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    Device,
    Ok,
    Error,
}

// ── Device ───────────────────────────────────────────────────────────

/// A monitored device, identified by its unique name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Unique device name (registry key).
    pub name: String,
    /// Timestamp of the last report, in milliseconds.
    pub time: u64,
    /// Capability / status value reported by the device.
    pub status: u32,
    /// Open extension fields.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub ext: BTreeMap<String, String>,
}

impl Device {
    pub fn new(name: impl Into<String>, time: u64, status: u32) -> Self {
        Self {
            name: name.into(),
            time,
            status,
            ext: BTreeMap::new(),
        }
    }

    /// Set an extension field, replacing any previous value.
    pub fn ext_set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.ext.insert(key.into(), value.into());
    }

    pub fn ext_get(&self, key: &str) -> Option<&str> {
        self.ext.get(key).map(String::as_str)
    }

    /// Set an integer extension field (stored in decimal).
    pub fn ext_set_int(&mut self, key: impl Into<String>, value: u64) {
        self.ext.insert(key.into(), value.to_string());
    }

    /// Read an integer extension field, falling back to `default` when the
    /// key is absent or does not hold an integer.
    pub fn ext_int(&self, key: &str, default: i64) -> i64 {
        self.ext
            .get(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }
}

// ── ProtoMessage ─────────────────────────────────────────────────────

/// A single protocol message.
///
/// Serialized as a JSON object tagged by `kind`:
///
/// ```json
/// {"kind":"DEVICE","name":"device1","time":1700000000000,"status":1024}
/// {"kind":"OK"}
/// {"kind":"ERROR","code":404,"reason":"No devices"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProtoMessage {
    Device(Device),
    Ok,
    Error { code: u16, reason: String },
}

impl ProtoMessage {
    /// Generic success reply.
    pub fn ok() -> Self {
        Self::Ok
    }

    /// Structured error reply.
    pub fn error(code: u16, reason: impl Into<String>) -> Self {
        Self::Error {
            code,
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Device(_) => MessageKind::Device,
            Self::Ok => MessageKind::Ok,
            Self::Error { .. } => MessageKind::Error,
        }
    }

    /// Name of the carried device, if this is a DEVICE message.
    pub fn device_name(&self) -> Option<&str> {
        match self {
            Self::Device(device) => Some(&device.name),
            _ => None,
        }
    }

    pub fn as_device(&self) -> Option<&Device> {
        match self {
            Self::Device(device) => Some(device),
            _ => None,
        }
    }

    pub fn into_device(self) -> Option<Device> {
        match self {
            Self::Device(device) => Some(device),
            _ => None,
        }
    }

    /// Error code, if this is an ERROR message.
    pub fn error_code(&self) -> Option<u16> {
        match self {
            Self::Error { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Integer extension lookup. Non-device messages carry no extensions
    /// and always yield `default`.
    pub fn ext_int(&self, key: &str, default: i64) -> i64 {
        self.as_device()
            .map_or(default, |device| device.ext_int(key, default))
    }

    // ── Wire encoding ────────────────────────────────────────────────

    pub fn encode(&self) -> Result<Bytes> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(Error::Encode)
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).map_err(Error::Decode)
    }
}

impl From<Device> for ProtoMessage {
    fn from(device: Device) -> Self {
        Self::Device(device)
    }
}

// ── Tests ────────────────────────────────────────────────────────────
