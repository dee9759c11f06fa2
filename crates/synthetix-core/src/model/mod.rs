//! Canonical domain model.
//!
//! Wire records (`synthetix_api::types`) are converted into these
//! types at the engine boundary; presentation code only ever sees the
//! canonical shapes.

pub mod device;
pub mod state;

pub use device::{Device, DeviceId, DeviceType};
pub use state::{CapabilityValue, DeviceState, StatePatch};
