use thiserror::Error;

/// Engine-facing error taxonomy.
///
/// Push channel drops are deliberately absent: they are handled
/// internally by the reconnect state machine and never surface as
/// errors — the device list simply stops updating until the channel
/// comes back.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The operation's preconditions were not met (engine stopped, no
    /// session credential, or unknown device). Nothing was sent.
    #[error("Precondition failed: {0}")]
    PreconditionFailed(&'static str),

    /// The request failed in transit or the response could not be
    /// decoded.
    #[error("Network failure: {0}")]
    Network(#[source] synthetix_api::Error),

    /// The hub answered with a non-success status.
    #[error("Hub rejected the request (HTTP {status})")]
    Rejected { status: u16 },

    /// The bearer credential is no longer valid.
    #[error("Session expired")]
    SessionExpired,

    /// Engine configuration could not be applied (e.g. bad push URL).
    #[error("Invalid engine configuration: {0}")]
    InvalidConfig(String),
}

impl From<synthetix_api::Error> for EngineError {
    fn from(err: synthetix_api::Error) -> Self {
        match err {
            synthetix_api::Error::Rejected { status, .. } => Self::Rejected { status },
            synthetix_api::Error::SessionExpired { .. } => Self::SessionExpired,
            other => Self::Network(other),
        }
    }
}
