use thiserror::Error;

/// Top-level error type for the `synthetix-api` crate.
///
/// Covers every wire-level failure mode: transport, rejected requests,
/// session expiry, WebSocket, and payload decoding. `synthetix-core`
/// maps these into its own engine-facing taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, timeout, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // ── Session ─────────────────────────────────────────────────────
    /// The hub rejected the bearer credential (401/403).
    #[error("Session expired or credential rejected (HTTP {status})")]
    SessionExpired { status: u16 },

    // ── Requests ────────────────────────────────────────────────────
    /// Non-success status from the hub, with the response body when available.
    #[error("Request rejected (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    // ── WebSocket ───────────────────────────────────────────────────
    /// WebSocket connection could not be established.
    #[error("WebSocket connection failed: {0}")]
    PushConnect(String),

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this error means the session credential is no
    /// longer valid and re-authentication is required.
    pub fn is_session_expired(&self) -> bool {
        matches!(self, Self::SessionExpired { .. })
    }

    /// Returns `true` if this is a transient failure worth retrying
    /// (by the caller — nothing in this crate retries requests).
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::PushConnect(_) => true,
            _ => false,
        }
    }

    /// Classify an HTTP status into the right error variant.
    pub(crate) fn from_status(status: u16, message: String) -> Self {
        match status {
            401 | 403 => Self::SessionExpired { status },
            _ => Self::Rejected { status, message },
        }
    }
}
