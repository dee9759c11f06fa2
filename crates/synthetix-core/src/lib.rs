//! Device state synchronization engine for Synthetix clients.
//!
//! This crate owns the local replica of device state and keeps it
//! usefully correct against a hub whose only consistency channel back
//! is a best-effort push connection:
//!
//! - **[`SyncEngine`]** — Facade consumed by presentation code.
//!   [`start()`](SyncEngine::start) seeds the replica with a bulk
//!   refresh, then streams incremental updates from the push channel
//!   (or a polling fallback). [`run_command()`](SyncEngine::run_command)
//!   applies user commands optimistically and reverts them on failure.
//!
//! - **[`DeviceRegistry`]** — Insertion-ordered reactive storage for
//!   device records, with shallow per-key state merging and
//!   `tokio::sync::watch`-based snapshot broadcasting.
//!
//! - **[`DeviceStream`]** — Subscription handle vended by the engine.
//!   Exposes `current()` / `changed()` for reactive rendering.
//!
//! - **Domain model** ([`model`]) — Canonical types ([`Device`],
//!   [`DeviceType`], [`DeviceState`]) with typed capability values
//!   ([`CapabilityValue`]) and an opaque fallback for capabilities the
//!   engine doesn't know about.
//!
//! One engine instance serves one session. Construct it at the
//! composition root, [`stop()`](SyncEngine::stop) it on logout, and
//! build a fresh one for the next session — replica state never leaks
//! across sessions.

pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod registry;
pub mod session;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use command::{Command, CommandName};
pub use config::EngineConfig;
pub use engine::SyncEngine;
pub use error::EngineError;
pub use registry::DeviceRegistry;
pub use session::Session;
pub use stream::DeviceStream;

// Re-export model types at the crate root for ergonomics.
pub use model::{CapabilityValue, Device, DeviceId, DeviceState, DeviceType, StatePatch};

// The push channel state machine is part of the public surface:
// consumers render connection status from it.
pub use synthetix_api::push::PushState;
