//! WebSocket push subscription with auto-reconnect.
//!
//! Connects to the hub's `/ws/devices` endpoint and streams parsed
//! [`PushEvent`]s through a [`tokio::sync::broadcast`] channel. The
//! connection lifecycle is a small state machine observable through a
//! `watch` channel of [`PushState`]:
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Reconnecting { delay } -> Connecting -> ...
//! ```
//!
//! Reconnection uses a fixed delay (5s by default) after *any* close or
//! error, and retries indefinitely until the handle is shut down.
//! Cancellation moves the machine to `Disconnected` and nothing
//! reconnects afterwards.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use url::Url;

// ── Broadcast channel capacity ───────────────────────────────────────

const EVENT_CHANNEL_CAPACITY: usize = 256;

// ── PushEvent ────────────────────────────────────────────────────────

/// A parsed event from the hub's push stream.
///
/// The only event kind the engine acts on is `device_update`; other
/// kinds are forwarded as-is so consumers can ignore them (the hub may
/// grow new event types without breaking older clients).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushEvent {
    /// Event discriminator, e.g. `"device_update"`.
    pub event: String,

    /// Target device, present on `device_update`.
    #[serde(default)]
    pub device_id: Option<String>,

    /// Partial state patch, present on `device_update`.
    #[serde(default)]
    pub state: Option<serde_json::Map<String, serde_json::Value>>,

    /// All remaining fields the hub sends.
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

impl PushEvent {
    /// Returns `true` if this is a `device_update` carrying a state patch.
    pub fn is_device_update(&self) -> bool {
        self.event == "device_update"
    }
}

// ── PushState ────────────────────────────────────────────────────────

/// Connection state of the push channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { delay: Duration },
}

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Reconnection policy for the push channel.
///
/// The hub's front-ends have always used a flat 5-second retry, so the
/// delay is fixed rather than exponential. Retries continue until the
/// handle is shut down.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay between a drop and the next connection attempt. Default: 5s.
    pub delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(5),
        }
    }
}

// ── PushHandle ───────────────────────────────────────────────────────

/// Handle to a running push subscription.
///
/// Dropping the handle does not stop the background task — call
/// [`shutdown`](Self::shutdown) (or cancel the parent token) to tear it
/// down.
pub struct PushHandle {
    event_rx: broadcast::Receiver<Arc<PushEvent>>,
    state_rx: watch::Receiver<PushState>,
    cancel: CancellationToken,
}

impl PushHandle {
    /// Spawn the reconnection loop against `ws_url`.
    ///
    /// `ws_url` must carry any credential the hub expects (the engine
    /// appends `?token=...`). Returns immediately; the first connection
    /// attempt happens asynchronously.
    pub fn connect(ws_url: Url, reconnect: ReconnectConfig, cancel: CancellationToken) -> Self {
        let (event_tx, event_rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(PushState::Disconnected);

        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            push_loop(ws_url, event_tx, state_tx, reconnect, task_cancel).await;
        });

        Self {
            event_rx,
            state_rx,
            cancel,
        }
    }

    /// Get a new broadcast receiver for the event stream.
    ///
    /// Multiple consumers can subscribe concurrently. A consumer that
    /// falls behind receives [`broadcast::error::RecvError::Lagged`].
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<PushEvent>> {
        self.event_rx.resubscribe()
    }

    /// Observe connection state transitions.
    pub fn state(&self) -> watch::Receiver<PushState> {
        self.state_rx.clone()
    }

    /// Signal the background task to shut down gracefully.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

// ── Background reconnection loop ─────────────────────────────────────

/// Main loop: connect -> read -> on drop, wait the fixed delay -> reconnect.
async fn push_loop(
    ws_url: Url,
    event_tx: broadcast::Sender<Arc<PushEvent>>,
    state_tx: watch::Sender<PushState>,
    reconnect: ReconnectConfig,
    cancel: CancellationToken,
) {
    loop {
        let _ = state_tx.send(PushState::Connecting);

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = connect_and_read(&ws_url, &event_tx, &state_tx, &cancel) => {
                match result {
                    Ok(()) => {
                        if cancel.is_cancelled() {
                            break;
                        }
                        tracing::info!("push channel closed, scheduling reconnect");
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "push channel error, scheduling reconnect");
                    }
                }

                let _ = state_tx.send(PushState::Reconnecting { delay: reconnect.delay });

                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(reconnect.delay) => {}
                }
            }
        }
    }

    let _ = state_tx.send(PushState::Disconnected);
    tracing::debug!("push loop exiting");
}

// ── Single connection lifecycle ──────────────────────────────────────

/// Establish one WebSocket connection, read frames until it drops.
async fn connect_and_read(
    url: &Url,
    event_tx: &broadcast::Sender<Arc<PushEvent>>,
    state_tx: &watch::Sender<PushState>,
    cancel: &CancellationToken,
) -> Result<(), crate::error::Error> {
    tracing::debug!(host = url.host_str().unwrap_or("?"), "connecting push channel");

    let (ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .map_err(|e| crate::error::Error::PushConnect(e.to_string()))?;

    tracing::info!("push channel connected");
    let _ = state_tx.send(PushState::Connected);

    let (_write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            frame = read.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        if let Some(event) = parse_push_event(&text) {
                            // Send errors just mean no active subscribers.
                            let _ = event_tx.send(Arc::new(event));
                        }
                    }
                    Some(Ok(tungstenite::Message::Ping(_))) => {
                        // tungstenite replies with pong automatically
                        tracing::trace!("push channel ping");
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        tracing::info!(frame = ?frame, "push channel close frame");
                        return Ok(());
                    }
                    Some(Err(e)) => {
                        return Err(crate::error::Error::PushConnect(e.to_string()));
                    }
                    None => {
                        // Stream ended without a close frame
                        tracing::info!("push channel stream ended");
                        return Ok(());
                    }
                    _ => {
                        // Binary, Pong, Frame — ignore
                    }
                }
            }
        }
    }
}

// ── Frame parsing ────────────────────────────────────────────────────

/// Parse a text frame into a [`PushEvent`].
///
/// Malformed frames are logged and dropped — a bad frame must never
/// take the channel down.
fn parse_push_event(text: &str) -> Option<PushEvent> {
    match serde_json::from_str::<PushEvent>(text) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::debug!(error = %e, "ignoring unparseable push frame");
            None
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
