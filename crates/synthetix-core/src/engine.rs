//! The synchronization engine facade.
//!
//! [`SyncEngine`] ties the pieces together for presentation code:
//! session-scoped start/stop, optimistic command dispatch with revert,
//! bulk refresh, and the push channel (or polling fallback) feeding the
//! registry. Consumers hold one engine per session and read device
//! state through [`snapshot`](SyncEngine::snapshot) /
//! [`subscribe`](SyncEngine::subscribe).
//!
//! Every network settlement (command acknowledgment, refresh response,
//! push merge) is guarded by a session generation counter: `stop()`
//! bumps the generation, and a settlement whose generation no longer
//! matches is discarded instead of mutating the next session's replica.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use secrecy::ExposeSecret;
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use synthetix_api::push::{PushHandle, PushState, ReconnectConfig};
use synthetix_api::{ApiClient, PushEvent};

use crate::command::Command;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::model::{Device, DeviceId, DeviceState};
use crate::registry::DeviceRegistry;
use crate::session::Session;
use crate::stream::DeviceStream;

/// Device state synchronization engine.
///
/// Cheaply cloneable; all clones share one replica. See the
/// [crate docs](crate) for the lifecycle contract.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: EngineConfig,
    session: Session,
    registry: DeviceRegistry,

    /// Bumped on every start and stop. Settlements captured under an
    /// older generation are discarded.
    generation: AtomicU64,

    /// Present between `start()` and `stop()`.
    active: Mutex<Option<ActiveSync>>,

    /// Mirror of the push channel state, valid even before `start()`.
    push_state: watch::Sender<PushState>,
}

/// Per-start state: the session-bound client plus the cancellation
/// token that owns the background tasks.
struct ActiveSync {
    client: Arc<ApiClient>,
    cancel: CancellationToken,
    generation: u64,
}

impl SyncEngine {
    /// Create an idle engine bound to a session.
    ///
    /// No network activity happens until [`start`](Self::start).
    pub fn new(config: EngineConfig, session: Session) -> Self {
        let (push_state, _) = watch::channel(PushState::Disconnected);
        Self {
            inner: Arc::new(EngineInner {
                config,
                session,
                registry: DeviceRegistry::new(),
                generation: AtomicU64::new(0),
                active: Mutex::new(None),
                push_state,
            }),
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Start synchronizing: seed the replica with a bulk refresh, then
    /// keep it current via the push channel (or polling fallback).
    ///
    /// Idempotent — calling `start` on a running engine does nothing.
    /// Requires an active session credential. A failed initial refresh
    /// is logged but does not abort the start: the replica stays empty
    /// until the first successful refresh or push reconnect heals it.
    pub async fn start(&self) -> Result<(), EngineError> {
        let mut active = self.inner.active.lock().await;
        if active.is_some() {
            debug!("engine already running, start ignored");
            return Ok(());
        }

        let Some(credential) = self.inner.session.credential() else {
            return Err(EngineError::PreconditionFailed("no active session"));
        };

        let client = Arc::new(ApiClient::new(
            self.inner.config.base_url.clone(),
            credential.clone(),
            &self.inner.config.transport,
        )?);

        // Resolve the push endpoint before any network traffic; a
        // start that fails on configuration must leave the replica
        // untouched.
        let push_url = if self.inner.config.push_enabled {
            let mut url = self.inner.config.resolve_push_url()?;
            url.query_pairs_mut()
                .append_pair("token", credential.expose_secret());
            Some(url)
        } else {
            None
        };

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();

        info!(generation, "starting sync engine");

        // Seed the replica before wiring the incremental sources so the
        // first snapshot subscribers see is the full device list.
        match client.list_devices().await {
            Ok(records) => {
                let devices: Vec<Device> = records.into_iter().map(Device::from).collect();
                info!(count = devices.len(), "initial refresh complete");
                self.inner.registry.replace_all(devices);
            }
            Err(e) => {
                warn!(error = %e, "initial refresh failed, continuing with empty replica");
            }
        }

        if let Some(push_url) = push_url {
            let handle = PushHandle::connect(
                push_url,
                ReconnectConfig {
                    delay: self.inner.config.reconnect_delay,
                },
                cancel.child_token(),
            );
            self.spawn_push_bridge(&handle, generation, &cancel);
            self.spawn_push_state_mirror(&handle, &cancel);
        } else {
            self.spawn_poll_loop(Arc::clone(&client), generation, &cancel);
        }

        self.spawn_session_watcher(&cancel);

        *active = Some(ActiveSync {
            client,
            cancel,
            generation,
        });
        Ok(())
    }

    /// Stop synchronizing and clear the replica.
    ///
    /// Idempotent. Background tasks are cancelled and the generation is
    /// bumped, so settlements still in flight cannot touch the replica
    /// of a later session.
    pub async fn stop(&self) {
        self.inner.shutdown().await;
    }

    /// Whether the engine is currently between `start` and `stop`.
    pub async fn is_running(&self) -> bool {
        self.inner.active.lock().await.is_some()
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Send a command to one device, applying it optimistically.
    ///
    /// The patch is merged into the replica immediately, then the
    /// command goes to the hub. On rejection or transport failure the
    /// touched keys are restored to their pre-command values; keys
    /// updated concurrently by other sources keep their newer values.
    ///
    /// Fails with [`EngineError::PreconditionFailed`] if the engine is
    /// not running or the device is not in the replica.
    pub async fn run_command(
        &self,
        device_id: &DeviceId,
        command: Command,
    ) -> Result<(), EngineError> {
        let (client, generation) = {
            let active = self.inner.active.lock().await;
            let Some(active) = active.as_ref() else {
                return Err(EngineError::PreconditionFailed("engine not started"));
            };
            (Arc::clone(&active.client), active.generation)
        };

        let Some(saved) = self.inner.registry.capture_state(device_id, &command.patch) else {
            return Err(EngineError::PreconditionFailed("unknown device"));
        };

        self.inner.registry.merge_state(device_id, &command.patch);
        debug!(device = %device_id, command = %command.name, "command applied optimistically");

        let result = client
            .send_command(device_id.as_str(), &command.to_request())
            .await;

        if !self.inner.generation_current(generation) {
            debug!(device = %device_id, "discarding stale command settlement");
            // Swallow the outcome entirely: the session it belonged to
            // is gone and the caller cannot act on it.
            return Ok(());
        }

        match result {
            Ok(Some(record)) => {
                // The response carries the authoritative post-command
                // state; fold it in over the optimistic guess.
                let authoritative = DeviceState::from_wire(&record.state);
                self.inner.registry.merge_state(device_id, &authoritative);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => {
                warn!(device = %device_id, error = %e, "command failed, reverting");
                self.inner.registry.restore_state(device_id, &saved);
                Err(e.into())
            }
        }
    }

    // ── Refresh ──────────────────────────────────────────────────────

    /// Re-fetch the full device list and replace the replica with it.
    ///
    /// On failure the replica is left untouched.
    pub async fn refresh(&self) -> Result<(), EngineError> {
        let (client, generation) = {
            let active = self.inner.active.lock().await;
            let Some(active) = active.as_ref() else {
                return Err(EngineError::PreconditionFailed("engine not started"));
            };
            (Arc::clone(&active.client), active.generation)
        };

        let records = client.list_devices().await?;

        if !self.inner.generation_current(generation) {
            debug!("discarding stale refresh result");
            return Ok(());
        }

        let devices: Vec<Device> = records.into_iter().map(Device::from).collect();
        debug!(count = devices.len(), "refresh applied");
        self.inner.registry.replace_all(devices);
        Ok(())
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// The current replica snapshot, in hub order.
    pub fn snapshot(&self) -> Arc<Vec<Arc<Device>>> {
        self.inner.registry.snapshot()
    }

    /// Subscribe to replica changes.
    pub fn subscribe(&self) -> DeviceStream {
        DeviceStream::new(self.inner.registry.subscribe())
    }

    /// Look up one device in the replica.
    pub fn device(&self, device_id: &DeviceId) -> Option<Arc<Device>> {
        self.inner.registry.get(device_id)
    }

    /// Observe the push channel connection state.
    ///
    /// Reports [`PushState::Disconnected`] while the engine is stopped
    /// or running in polling mode.
    pub fn push_state(&self) -> watch::Receiver<PushState> {
        self.inner.push_state.subscribe()
    }

    // ── Background tasks ─────────────────────────────────────────────

    /// Forward `device_update` events from the push channel into the
    /// registry.
    fn spawn_push_bridge(&self, handle: &PushHandle, generation: u64, cancel: &CancellationToken) {
        let mut events = handle.subscribe();
        let inner = Arc::clone(&self.inner);
        let cancel = cancel.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    event = events.recv() => match event {
                        Ok(event) => inner.apply_push_event(&event, generation),
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "push bridge lagged, events dropped");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            debug!("push bridge exiting");
        });
    }

    /// Mirror the push handle's connection state into the engine-level
    /// watch channel, which outlives individual starts.
    fn spawn_push_state_mirror(&self, handle: &PushHandle, cancel: &CancellationToken) {
        let mut state_rx = handle.state();
        let inner = Arc::clone(&self.inner);
        let cancel = cancel.clone();

        tokio::spawn(async move {
            loop {
                let state = state_rx.borrow_and_update().clone();
                inner.push_state.send_replace(state);

                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    changed = state_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            inner.push_state.send_replace(PushState::Disconnected);
        });
    }

    /// Polling fallback for environments without WebSocket support.
    fn spawn_poll_loop(&self, client: Arc<ApiClient>, generation: u64, cancel: &CancellationToken) {
        let inner = Arc::clone(&self.inner);
        let cancel = cancel.clone();
        let period = inner.config.poll_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; start() already seeded.
            ticker.tick().await;

            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        match client.list_devices().await {
                            Ok(records) if inner.generation_current(generation) => {
                                let devices: Vec<Device> =
                                    records.into_iter().map(Device::from).collect();
                                inner.registry.replace_all(devices);
                            }
                            Ok(_) => break,
                            Err(e) => {
                                warn!(error = %e, "poll refresh failed");
                            }
                        }
                    }
                }
            }
            debug!("poll loop exiting");
        });
    }

    /// Stop the engine when the session logs out.
    fn spawn_session_watcher(&self, cancel: &CancellationToken) {
        let mut credentials = self.inner.session.subscribe();
        let inner = Arc::clone(&self.inner);
        let cancel = cancel.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return,
                    changed = credentials.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        if credentials.borrow_and_update().is_none() {
                            break;
                        }
                    }
                }
            }
            info!("session logged out, stopping engine");
            inner.shutdown().await;
        });
    }
}

impl EngineInner {
    fn generation_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Merge one push event into the replica, unless it belongs to an
    /// earlier session generation.
    fn apply_push_event(&self, event: &PushEvent, generation: u64) {
        if !event.is_device_update() {
            return;
        }
        let (Some(device_id), Some(state)) = (&event.device_id, &event.state) else {
            debug!("device_update without id or state ignored");
            return;
        };
        if !self.generation_current(generation) {
            debug!("discarding stale push event");
            return;
        }

        let patch = DeviceState::from_wire(state);
        self.registry
            .merge_state(&DeviceId::from(device_id.as_str()), &patch);
    }

    /// Tear down the active sync, if any.
    async fn shutdown(&self) {
        let mut active = self.active.lock().await;
        let Some(sync) = active.take() else {
            return;
        };

        self.generation.fetch_add(1, Ordering::SeqCst);
        sync.cancel.cancel();
        self.registry.clear();
        self.push_state.send_replace(PushState::Disconnected);
        info!(generation = sync.generation, "sync engine stopped");
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("devices", &self.inner.registry.len())
            .finish_non_exhaustive()
    }
}
