// ── Device registry ──
//
// Insertion-ordered reactive storage for the local device replica.
// Every mutation bumps a version counter and rebuilds the snapshot
// that subscribers receive. The snapshot is rebuilt while the write
// lock is held, so subscribers always observe mutations in the order
// they were applied.

use std::sync::{Arc, RwLock};

use indexmap::IndexMap;
use tokio::sync::watch;

use crate::model::{CapabilityValue, Device, DeviceId, StatePatch};

/// Pre-command values of the keys a patch touches, captured before the
/// optimistic apply. `None` marks a key that did not exist — reverting
/// removes it again.
#[derive(Debug, Clone)]
pub struct SavedState {
    entries: Vec<(String, Option<CapabilityValue>)>,
}

/// The single shared mutable resource of the engine.
///
/// Holds at most one record per device id. Ordering is the insertion
/// order of the last [`replace_all`](Self::replace_all) and is stable
/// across merges.
pub struct DeviceRegistry {
    devices: RwLock<IndexMap<DeviceId, Arc<Device>>>,

    /// Version counter, bumped on every mutation.
    version: watch::Sender<u64>,

    /// Full snapshot, rebuilt on mutation for cheap subscription.
    snapshot: watch::Sender<Arc<Vec<Arc<Device>>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0u64);
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));

        Self {
            devices: RwLock::new(IndexMap::new()),
            version,
            snapshot,
        }
    }

    /// Atomically replace the entire device set (bulk refresh).
    ///
    /// Defines snapshot ordering. Never interleaves with a partial
    /// merge — both take the write lock.
    pub fn replace_all(&self, devices: Vec<Device>) {
        let mut guard = self.devices.write().expect("registry lock poisoned");
        // Last record wins on duplicate ids, preserving "one record per id".
        *guard = devices
            .into_iter()
            .map(|d| (d.id.clone(), Arc::new(d)))
            .collect();
        self.publish(&guard);
    }

    /// Shallow-merge a state patch into the named device.
    ///
    /// Unknown devices are a silent no-op (`false`) — push events may
    /// race a device's removal, and that must not be an error.
    pub fn merge_state(&self, device_id: &DeviceId, patch: &StatePatch) -> bool {
        let mut guard = self.devices.write().expect("registry lock poisoned");
        let Some(existing) = guard.get(device_id) else {
            tracing::trace!(device = %device_id, "merge for unknown device ignored");
            return false;
        };

        let mut device = Device::clone(existing);
        device.state.merge(patch);
        guard.insert(device_id.clone(), Arc::new(device));
        self.publish(&guard);
        true
    }

    /// Capture the current values of the keys `patch` touches, for a
    /// later compensating [`restore_state`](Self::restore_state).
    /// Returns `None` if the device is unknown.
    pub fn capture_state(&self, device_id: &DeviceId, patch: &StatePatch) -> Option<SavedState> {
        let guard = self.devices.read().expect("registry lock poisoned");
        let device = guard.get(device_id)?;

        let entries = patch
            .keys()
            .map(|key| (key.to_owned(), device.state.get(key).cloned()))
            .collect();
        Some(SavedState { entries })
    }

    /// Re-merge previously captured values — the compensating action
    /// for a failed optimistic command. Restores exactly the captured
    /// keys: concurrent updates to other keys are untouched, and keys
    /// that did not exist before the command are removed again.
    pub fn restore_state(&self, device_id: &DeviceId, saved: &SavedState) {
        let mut guard = self.devices.write().expect("registry lock poisoned");
        let Some(existing) = guard.get(device_id) else {
            return;
        };

        let mut device = Device::clone(existing);
        for (key, value) in &saved.entries {
            match value {
                Some(v) => {
                    device.state.set(key.clone(), v.clone());
                }
                None => device.state.remove(key),
            }
        }
        guard.insert(device_id.clone(), Arc::new(device));
        self.publish(&guard);
    }

    /// Look up a single device.
    pub fn get(&self, device_id: &DeviceId) -> Option<Arc<Device>> {
        self.devices
            .read()
            .expect("registry lock poisoned")
            .get(device_id)
            .map(Arc::clone)
    }

    pub fn contains(&self, device_id: &DeviceId) -> bool {
        self.devices
            .read()
            .expect("registry lock poisoned")
            .contains_key(device_id)
    }

    /// Get the current snapshot (cheap `Arc` clone).
    pub fn snapshot(&self) -> Arc<Vec<Arc<Device>>> {
        self.snapshot.borrow().clone()
    }

    /// Subscribe to snapshot changes via a `watch::Receiver`.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<Arc<Device>>>> {
        self.snapshot.subscribe()
    }

    /// Remove all devices (session teardown).
    pub fn clear(&self) {
        let mut guard = self.devices.write().expect("registry lock poisoned");
        guard.clear();
        self.publish(&guard);
    }

    pub fn len(&self) -> usize {
        self.devices.read().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ── Private helpers ──────────────────────────────────────────────

    /// Rebuild the snapshot and bump the version. Called with the write
    /// lock held so publications happen in mutation order.
    fn publish(&self, guard: &IndexMap<DeviceId, Arc<Device>>) {
        let values: Vec<Arc<Device>> = guard.values().map(Arc::clone).collect();
        // `send_modify` updates unconditionally, even with zero receivers.
        self.snapshot.send_modify(|snap| *snap = Arc::new(values));
        self.version.send_modify(|v| *v += 1);
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
