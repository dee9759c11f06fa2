// ── Capability state ──
//
// A device's `state` is an open bag of capability key -> value. Keys
// the engine knows about (`on`, `brightness`, `temperature`) parse to
// typed values; everything else is carried opaquely so new hub
// capabilities flow through older clients untouched.

use indexmap::IndexMap;
use serde::de::{Deserialize, Deserializer};
use serde::ser::{Serialize, SerializeMap, Serializer};

use synthetix_api::types::StateMap;

/// A single capability value.
#[derive(Debug, Clone, PartialEq)]
pub enum CapabilityValue {
    /// Power state (`on`).
    On(bool),
    /// Dimmer level 0–100 (`brightness`).
    Brightness(u8),
    /// Temperature in degrees (`temperature`).
    Temperature(f64),
    /// Any capability the engine doesn't interpret.
    Other(serde_json::Value),
}

impl CapabilityValue {
    /// Parse a wire value for the given capability key.
    ///
    /// Values that don't fit the known shape (e.g. a string under
    /// `brightness`) fall back to [`Other`](Self::Other) rather than
    /// failing — the engine neither validates nor interprets state
    /// beyond merging it.
    pub fn from_wire(key: &str, value: &serde_json::Value) -> Self {
        match key {
            "on" => value
                .as_bool()
                .map_or_else(|| Self::Other(value.clone()), Self::On),
            "brightness" => value
                .as_u64()
                .and_then(|v| u8::try_from(v).ok())
                .filter(|v| *v <= 100)
                .map_or_else(|| Self::Other(value.clone()), Self::Brightness),
            "temperature" => value
                .as_f64()
                .map_or_else(|| Self::Other(value.clone()), Self::Temperature),
            _ => Self::Other(value.clone()),
        }
    }

    /// The wire representation of this value.
    pub fn to_wire(&self) -> serde_json::Value {
        match self {
            Self::On(v) => serde_json::Value::from(*v),
            Self::Brightness(v) => serde_json::Value::from(*v),
            Self::Temperature(v) => serde_json::Value::from(*v),
            Self::Other(v) => v.clone(),
        }
    }

    pub fn as_on(&self) -> Option<bool> {
        match self {
            Self::On(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_brightness(&self) -> Option<u8> {
        match self {
            Self::Brightness(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_temperature(&self) -> Option<f64> {
        match self {
            Self::Temperature(v) => Some(*v),
            _ => None,
        }
    }
}

/// An ordered capability map.
///
/// Also serves as the *patch* type: a partial state carries only the
/// keys it wants to change. Merging is shallow — an incoming patch
/// overwrites exactly the keys it names and nothing else.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceState {
    values: IndexMap<String, CapabilityValue>,
}

/// A partial state update. Same shape as a full state.
pub type StatePatch = DeviceState;

impl DeviceState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a wire state bag.
    pub fn from_wire(map: &StateMap) -> Self {
        let values = map
            .iter()
            .map(|(k, v)| (k.clone(), CapabilityValue::from_wire(k, v)))
            .collect();
        Self { values }
    }

    /// Convert back to the wire shape.
    pub fn to_wire(&self) -> StateMap {
        self.values
            .iter()
            .map(|(k, v)| (k.clone(), v.to_wire()))
            .collect()
    }

    pub fn get(&self, key: &str) -> Option<&CapabilityValue> {
        self.values.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: CapabilityValue) -> &mut Self {
        self.values.insert(key.into(), value);
        self
    }

    pub fn remove(&mut self, key: &str) {
        self.values.shift_remove(key);
    }

    /// Shallow merge: overwrite exactly the keys `patch` names, leave
    /// every other key untouched.
    pub fn merge(&mut self, patch: &StatePatch) {
        for (key, value) in &patch.values {
            self.values.insert(key.clone(), value.clone());
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CapabilityValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromIterator<(String, CapabilityValue)> for DeviceState {
    fn from_iter<I: IntoIterator<Item = (String, CapabilityValue)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

impl Serialize for DeviceState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (key, value) in &self.values {
            map.serialize_entry(key, &value.to_wire())?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for DeviceState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = StateMap::deserialize(deserializer)?;
        Ok(Self::from_wire(&raw))
    }
}
