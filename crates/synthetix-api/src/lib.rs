//! Async client for the Synthetix device hub API.
//!
//! Two surfaces, mirroring what the hub exposes:
//!
//! - **[`ApiClient`]** — REST client for the bulk device list
//!   (`GET /devices`) and command submission
//!   (`POST /devices/{id}/command`). Authenticates with a bearer
//!   credential attached per request.
//! - **[`PushHandle`]** — long-lived WebSocket subscription to
//!   `/ws/devices`, streaming [`PushEvent`]s through a broadcast
//!   channel with automatic fixed-delay reconnection. Connection
//!   state is observable via a `watch` channel of [`PushState`].
//!
//! This crate is wire-level only: it deserializes what the hub sends
//! and reports failures through [`Error`]. Replica state, optimistic
//! merges, and reconciliation live in `synthetix-core`.

pub mod client;
pub mod error;
pub mod push;
pub mod transport;
pub mod types;

pub use client::ApiClient;
pub use error::Error;
pub use push::{PushEvent, PushHandle, PushState, ReconnectConfig};
pub use transport::TransportConfig;
pub use types::{CommandRequest, DeviceRecord};
