// Session credential handle.
//
// The engine never authenticates — it consumes an opaque bearer
// credential owned by the application's auth layer. The handle is a
// `watch` channel so the engine can observe logout and tear itself
// down without the auth layer knowing about engine internals.

use std::sync::Arc;

use secrecy::SecretString;
use tokio::sync::watch;

/// Shared handle to the current session credential.
///
/// Cheaply cloneable; the auth layer keeps one clone and calls
/// [`log_in`](Self::log_in) / [`log_out`](Self::log_out), the engine
/// keeps another and reads / watches it.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    credential: watch::Sender<Option<SecretString>>,
}

impl Session {
    /// A logged-out session.
    pub fn new() -> Self {
        let (credential, _) = watch::channel(None);
        Self {
            inner: Arc::new(SessionInner { credential }),
        }
    }

    /// A session that starts out authenticated.
    pub fn with_credential(token: SecretString) -> Self {
        let (credential, _) = watch::channel(Some(token));
        Self {
            inner: Arc::new(SessionInner { credential }),
        }
    }

    /// Install a new bearer credential (login or token refresh).
    pub fn log_in(&self, token: SecretString) {
        let _ = self.inner.credential.send(Some(token));
    }

    /// Drop the credential. Engines watching this session stop.
    pub fn log_out(&self) {
        let _ = self.inner.credential.send(None);
    }

    /// The current bearer credential, if any.
    pub fn credential(&self) -> Option<SecretString> {
        self.inner.credential.borrow().clone()
    }

    /// Whether a credential is currently present.
    pub fn is_active(&self) -> bool {
        self.inner.credential.borrow().is_some()
    }

    /// Watch credential changes (used by the engine's session watcher).
    pub(crate) fn subscribe(&self) -> watch::Receiver<Option<SecretString>> {
        self.inner.credential.subscribe()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("active", &self.is_active())
            .finish()
    }
}
