//! Handles: shared accessors into the mirror arena

use std::sync::{Arc, Mutex};

use crate::common::{Error, Result};
use crate::protocol::RemoteNode;

use super::MirrorState;

/// A reference to one remote object.
///
/// Cloning a handle clones the accessor, not the state: all clones observe
/// the same slot, and every refresh updates them together. A handle whose
/// remote object vanished without a reconciliation candidate is permanently
/// stale and every id-dependent operation on it fails.
#[derive(Clone)]
pub struct Handle {
    slot: usize,
    state: Arc<Mutex<MirrorState>>,
}

impl Handle {
    pub(crate) fn new(slot: usize, state: Arc<Mutex<MirrorState>>) -> Self {
        Self { slot, state }
    }

    /// The current target id, or `HandleNoLongerValid` once permanently stale
    pub fn target_id(&self) -> Result<u64> {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).slots[self.slot]
            .target_id
            .ok_or(Error::HandleNoLongerValid)
    }

    /// Whether this handle has been marked permanently stale
    pub fn is_stale(&self) -> bool {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).slots[self.slot]
            .target_id
            .is_none()
    }

    /// The snapshot from the dump that last confirmed this handle.
    ///
    /// Reads are served from the cache; only mutations and explicit
    /// refreshes touch the wire.
    pub fn snapshot(&self) -> RemoteNode {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).slots[self.slot]
            .snapshot
            .clone()
    }

    pub fn type_name(&self) -> String {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).slots[self.slot]
            .snapshot
            .type_name
            .clone()
    }

    /// A cached property value by name
    pub fn property(&self, name: &str) -> Option<serde_json::Value> {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).slots[self.slot]
            .snapshot
            .property(name)
            .cloned()
    }
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let slot = &state.slots[self.slot];
        f.debug_struct("Handle")
            .field("target_id", &slot.target_id)
            .field("type_name", &slot.snapshot.type_name)
            .finish()
    }
}
