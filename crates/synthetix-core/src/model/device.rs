// ── Device domain types ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use synthetix_api::types::DeviceRecord;

use super::state::DeviceState;

/// Opaque stable device identifier. Unique within a session, never
/// reused while the device exists.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for DeviceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

/// Device kind tag. Only used to interpret the shape of `state`; the
/// engine itself treats all devices identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum DeviceType {
    #[serde(alias = "virtual_light")]
    Light,
    Socket,
    Thermostat,
    #[serde(other)]
    Generic,
}

impl DeviceType {
    /// Normalize a wire tag. Older hubs report lights as
    /// `virtual_light`; anything unrecognized maps to `Generic`.
    pub fn from_tag(tag: Option<&str>) -> Self {
        match tag {
            Some("light" | "virtual_light") => Self::Light,
            Some("socket") => Self::Socket,
            Some("thermostat") => Self::Thermostat,
            _ => Self::Generic,
        }
    }
}

/// The canonical device type held in the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    pub device_type: DeviceType,
    pub state: DeviceState,

    /// Controlling account. Informational — authorization is enforced
    /// hub-side.
    pub owner_id: Option<String>,

    /// Last time the hub heard from the physical device.
    pub last_seen: Option<DateTime<Utc>>,
}

impl From<DeviceRecord> for Device {
    fn from(record: DeviceRecord) -> Self {
        Self {
            id: DeviceId::from(record.id),
            name: record.name,
            device_type: DeviceType::from_tag(record.device_type.as_deref()),
            state: DeviceState::from_wire(&record.state),
            owner_id: record.user_id,
            last_seen: record.last_seen,
        }
    }
}
