// Wire types for the hub's REST surface.
//
// These mirror the JSON the hub sends verbatim. Canonical domain types
// (typed capability state, device-type tags) live in `synthetix-core`,
// which converts from these records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A raw state bag as it appears on the wire: capability key -> value.
pub type StateMap = serde_json::Map<String, serde_json::Value>;

/// A device record as returned by `GET /devices` and in command
/// responses.
///
/// Uses `#[serde(flatten)]` to capture fields beyond the core set, so
/// nothing from the hub is silently dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Opaque stable identifier, unique within a session.
    pub id: String,

    /// Display label.
    pub name: String,

    /// Device kind tag, e.g. `"light"`, `"socket"`, `"thermostat"`.
    #[serde(default)]
    pub device_type: Option<String>,

    /// Capability state bag, e.g. `{"on": true, "brightness": 50}`.
    #[serde(default)]
    pub state: StateMap,

    /// Controlling account. Authorization is enforced hub-side.
    #[serde(default)]
    pub user_id: Option<String>,

    /// Last time the hub heard from the physical device.
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,

    /// All remaining fields the hub sends.
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

/// Body of `POST /devices/{id}/command`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRequest {
    /// Command name. The hub currently only understands `"set_state"`.
    pub command: String,

    /// Partial state patch to apply.
    pub params: StateMap,
}

impl CommandRequest {
    /// A `set_state` command carrying the given state patch.
    pub fn set_state(params: StateMap) -> Self {
        Self {
            command: "set_state".into(),
            params,
        }
    }
}
