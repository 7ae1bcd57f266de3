//! Driver-side mirror of the remote object tree
//!
//! The mirror owns every handle's state in one arena behind one lock: a
//! handle is an index plus a shared accessor, never a bag of its own
//! mutable fields. `refresh` is the only mutation path and runs under the
//! lock from start to finish, so a dump is integrated atomically and two
//! refreshes can never interleave.
//!
//! Target ids are only stable within one dump. When an id vanishes, the
//! mirror re-derives identity from observable attributes (see [`reconcile`])
//! and either repoints the handle or marks it permanently stale.

pub mod handle;
pub mod reconcile;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::common::config::MirrorConfig;
use crate::protocol::RemoteNode;

pub use handle::Handle;

/// Caller-supplied match predicate, remembered per handle as the lowest
/// reconciliation tier
pub type Predicate = Arc<dyn Fn(&RemoteNode) -> bool + Send + Sync>;

pub(crate) struct HandleSlot {
    /// Current target id; `None` once permanently stale
    pub target_id: Option<u64>,
    /// Snapshot from the dump that last confirmed this handle
    pub snapshot: RemoteNode,
    /// The predicate that last matched this handle, if any
    pub predicate: Option<Predicate>,
}

pub(crate) struct MirrorState {
    /// Arena of handle slots; a [`Handle`] is an index in here
    pub slots: Vec<HandleSlot>,
    /// Alias map: one target id may be shared by several handles
    pub by_target: HashMap<u64, Vec<usize>>,
    /// All nodes of the most recent dump
    pub nodes: HashMap<u64, RemoteNode>,
}

impl MirrorState {
    /// An existing live slot for this id carrying the same predicate, so
    /// repeated lookups alias instead of growing the arena
    fn find_slot(&self, target_id: u64, predicate: Option<&Predicate>) -> Option<usize> {
        let aliases = self.by_target.get(&target_id)?;
        aliases.iter().copied().find(|&idx| {
            match (&self.slots[idx].predicate, predicate) {
                (None, None) => true,
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                _ => false,
            }
        })
    }
}

/// The registry of remote-object handles for one driver instance
pub struct Mirror {
    state: Arc<Mutex<MirrorState>>,
}

impl Mirror {
    pub fn new(config: &MirrorConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(MirrorState {
                slots: Vec::new(),
                by_target: HashMap::with_capacity(config.initial_capacity),
                nodes: HashMap::with_capacity(config.initial_capacity),
            })),
        }
    }

    /// Integrate a new tree dump.
    ///
    /// Existing handles whose id survived get the fresh snapshot pushed in;
    /// handles whose id vanished go through reconciliation against the
    /// surviving nodes, and are repointed or marked permanently stale.
    pub fn refresh(&self, dump: Vec<RemoteNode>) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let fresh: HashMap<u64, RemoteNode> =
            dump.into_iter().map(|n| (n.target_id, n)).collect();

        let stale_ids: Vec<u64> = state
            .by_target
            .keys()
            .filter(|id| !fresh.contains_key(id))
            .copied()
            .collect();

        // Confirmed handles: push the new snapshot into every alias.
        let confirmed: Vec<(u64, Vec<usize>)> = state
            .by_target
            .iter()
            .filter(|(id, _)| fresh.contains_key(id))
            .map(|(id, slots)| (*id, slots.clone()))
            .collect();
        for (id, slot_indices) in confirmed {
            for idx in slot_indices {
                state.slots[idx].snapshot = fresh[&id].clone();
            }
        }

        // Vanished handles: re-derive identity from the surviving nodes.
        for stale_id in stale_ids {
            let slot_indices = match state.by_target.remove(&stale_id) {
                Some(v) => v,
                None => continue,
            };
            // Aliases share an id but may carry different predicates, so
            // each slot reconciles on its own.
            for idx in slot_indices {
                let best = {
                    let slot = &state.slots[idx];
                    reconcile::best_candidate(
                        &slot.snapshot,
                        slot.predicate.as_ref(),
                        fresh.values(),
                    )
                };
                match best {
                    Some(new_id) => {
                        tracing::debug!(stale_id, new_id, "handle repointed");
                        state.slots[idx].target_id = Some(new_id);
                        state.slots[idx].snapshot = fresh[&new_id].clone();
                        state.by_target.entry(new_id).or_default().push(idx);
                    }
                    None => {
                        tracing::debug!(stale_id, "handle is permanently stale");
                        state.slots[idx].target_id = None;
                    }
                }
            }
        }

        state.nodes = fresh;
    }

    /// The handle for a target id, creating a slot on first sighting and
    /// reusing the existing predicate-free slot afterwards.
    ///
    /// Returns `None` when the id is not in the current dump.
    pub fn handle_for(&self, target_id: u64) -> Option<Handle> {
        self.handle_with(target_id, None)
    }

    fn handle_with(&self, target_id: u64, predicate: Option<&Predicate>) -> Option<Handle> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let snapshot = state.nodes.get(&target_id)?.clone();

        let idx = match state.find_slot(target_id, predicate) {
            Some(idx) => idx,
            None => {
                let idx = state.slots.len();
                state.slots.push(HandleSlot {
                    target_id: Some(target_id),
                    snapshot,
                    predicate: predicate.map(Arc::clone),
                });
                state.by_target.entry(target_id).or_default().push(idx);
                idx
            }
        };

        Some(Handle::new(idx, Arc::clone(&self.state)))
    }

    /// All current-dump handles matching a predicate, document order by id.
    ///
    /// The predicate is remembered on each returned handle as its
    /// lowest-tier reconciliation fallback.
    pub fn find_all(&self, predicate: Predicate) -> Vec<Handle> {
        let matching: Vec<u64> = {
            let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            let mut ids: Vec<u64> = state
                .nodes
                .values()
                .filter(|n| predicate(n))
                .map(|n| n.target_id)
                .collect();
            ids.sort_unstable();
            ids
        };

        matching
            .into_iter()
            .filter_map(|id| self.handle_with(id, Some(&predicate)))
            .collect()
    }

    /// Number of nodes in the current dump
    pub fn node_count(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .nodes
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::WrappedValue;
    use serde_json::json;

    fn node(id: u64, props: &[(&str, serde_json::Value)]) -> RemoteNode {
        RemoteNode {
            target_id: id,
            type_name: "widgets.Button".into(),
            parent_id: None,
            child_ids: vec![],
            properties: props
                .iter()
                .map(|(k, v)| (k.to_string(), WrappedValue::wrap("", v.clone())))
                .collect(),
        }
    }

    fn mirror() -> Mirror {
        Mirror::new(&MirrorConfig::default())
    }

    #[test]
    fn confirmed_handles_get_the_new_snapshot() {
        let m = mirror();
        m.refresh(vec![node(1, &[("Name", json!("ok"))])]);
        let h = m.handle_for(1).unwrap();
        assert_eq!(h.snapshot().property_str("Name"), Some("ok"));

        m.refresh(vec![node(1, &[("Name", json!("changed"))])]);
        assert_eq!(h.snapshot().property_str("Name"), Some("changed"));
        assert_eq!(h.target_id().unwrap(), 1);
    }

    #[test]
    fn aliases_refresh_together() {
        let m = mirror();
        m.refresh(vec![node(5, &[("Name", json!("a"))])]);
        let h1 = m.handle_for(5).unwrap();
        let h2 = m.handle_for(5).unwrap();

        m.refresh(vec![node(5, &[("Name", json!("b"))])]);
        assert_eq!(h1.snapshot().property_str("Name"), Some("b"));
        assert_eq!(h2.snapshot().property_str("Name"), Some("b"));
    }

    #[test]
    fn vanished_id_repoints_by_automation_id() {
        let m = mirror();
        m.refresh(vec![node(1, &[("AutomationId", json!("submit"))])]);
        let h = m.handle_for(1).unwrap();

        // New dump: same automation id, different target id.
        m.refresh(vec![
            node(10, &[("AutomationId", json!("cancel"))]),
            node(11, &[("AutomationId", json!("submit"))]),
        ]);

        assert_eq!(h.target_id().unwrap(), 11);
        assert!(!h.is_stale());
    }

    #[test]
    fn unmatched_vanished_id_is_permanently_stale() {
        let m = mirror();
        m.refresh(vec![node(1, &[("AutomationId", json!("submit"))])]);
        let h = m.handle_for(1).unwrap();

        m.refresh(vec![node(2, &[("AutomationId", json!("other"))])]);

        assert!(h.is_stale());
        assert!(h.target_id().is_err());
    }

    #[test]
    fn find_all_returns_matches_in_id_order_and_remembers_the_predicate() {
        let m = mirror();
        m.refresh(vec![
            node(3, &[("Role", json!("row"))]),
            node(1, &[("Role", json!("row"))]),
            node(2, &[("Role", json!("header"))]),
        ]);
        let rows = m.find_all(Arc::new(|n: &RemoteNode| {
            n.property_str("Role") == Some("row")
        }));
        let ids: Vec<u64> = rows.iter().map(|h| h.target_id().unwrap()).collect();
        assert_eq!(ids, vec![1, 3]);

        // The predicate survives as the lowest reconciliation tier: after a
        // full id reshuffle with none of the scored name properties present,
        // it still repoints.
        m.refresh(vec![node(40, &[("Role", json!("row"))])]);
        assert_eq!(rows[0].target_id().unwrap(), 40);
    }

    #[test]
    fn repeated_lookups_reuse_slots() {
        let m = mirror();
        m.refresh(vec![node(1, &[("Role", json!("row"))])]);

        // A polling lookup re-runs the same predicate many times; the arena
        // must not grow with each pass.
        let pred: Predicate = Arc::new(|n: &RemoteNode| n.property_str("Role") == Some("row"));
        for _ in 0..5 {
            let found = m.find_all(Arc::clone(&pred));
            assert_eq!(found.len(), 1);
        }

        let h1 = m.handle_for(1).unwrap();
        let h2 = m.handle_for(1).unwrap();
        assert_eq!(h1.target_id().unwrap(), h2.target_id().unwrap());

        let state = m.state.lock().unwrap();
        assert_eq!(state.slots.len(), 2, "one predicate slot, one plain slot");
        assert_eq!(state.by_target[&1].len(), 2);
    }

    #[test]
    fn handle_for_unknown_id_is_none() {
        let m = mirror();
        m.refresh(vec![node(1, &[])]);
        assert!(m.handle_for(99).is_none());
    }
}
