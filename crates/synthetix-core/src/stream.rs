// Subscription handle over the registry's snapshot channel.

use std::sync::Arc;

use tokio::sync::watch;

use crate::model::Device;

/// A live view of the device list.
///
/// Vended by [`SyncEngine::subscribe`](crate::SyncEngine::subscribe).
/// [`current`](Self::current) returns the latest snapshot without
/// waiting; [`changed`](Self::changed) awaits the next mutation. The
/// stream stays valid for the lifetime of the engine that created it;
/// after the engine is dropped, `changed` returns `false`.
#[derive(Debug, Clone)]
pub struct DeviceStream {
    rx: watch::Receiver<Arc<Vec<Arc<Device>>>>,
}

impl DeviceStream {
    pub(crate) fn new(rx: watch::Receiver<Arc<Vec<Arc<Device>>>>) -> Self {
        Self { rx }
    }

    /// The latest snapshot, in registry order.
    pub fn current(&self) -> Arc<Vec<Arc<Device>>> {
        self.rx.borrow().clone()
    }

    /// Wait for the next snapshot change.
    ///
    /// Returns `false` once the registry is gone (engine dropped);
    /// callers can use that to end their render loop.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }

    /// The latest snapshot, marking it seen so the next
    /// [`changed`](Self::changed) waits for a newer one.
    pub fn current_and_mark(&mut self) -> Arc<Vec<Arc<Device>>> {
        self.rx.borrow_and_update().clone()
    }
}
