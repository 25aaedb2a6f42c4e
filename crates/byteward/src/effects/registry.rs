//! Listener registries keyed by direction and normalized URL.
//!
//! Registries are swappable storage strategies behind one contract. Both
//! variants hand out immutable snapshots, so a registration change during a
//! fan-out never disturbs the list being iterated.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::data::{ListenerKey, PlanKind};
use crate::effects::listener::{Listener, same_listener};

/// Storage and lookup strategy for per-URL listeners.
pub trait DispatchPlan: Send + Sync {
    /// Append `listener` under `key`. Returns `false` if it is already there.
    fn add(&self, key: ListenerKey, listener: Listener) -> bool;

    /// Remove `listener` from `key`. Returns `false` if it was not there.
    fn remove(&self, key: &ListenerKey, listener: &Listener) -> bool;

    /// Drop every listener under `key`. Returns `false` if there were none.
    fn clear(&self, key: &ListenerKey) -> bool;

    fn clear_all(&self);

    /// Listeners under `key`, in registration order.
    fn snapshot(&self, key: &ListenerKey) -> Arc<[Listener]>;

    fn len(&self, key: &ListenerKey) -> usize;

    fn is_empty(&self) -> bool;
}

impl PlanKind {
    pub fn build(self) -> Arc<dyn DispatchPlan> {
        match self {
            PlanKind::Snapshot => Arc::new(SnapshotPlan::new()),
            PlanKind::CopyOnWrite => Arc::new(CopyOnWritePlan::new()),
        }
    }
}

/// Lists kept under a lock and copied out for every fan-out.
#[derive(Default)]
pub struct SnapshotPlan {
    entries: RwLock<HashMap<ListenerKey, Vec<Listener>>>,
}

impl SnapshotPlan {
    pub fn new() -> Self { Self::default() }
}

impl DispatchPlan for SnapshotPlan {
    fn add(&self, key: ListenerKey, listener: Listener) -> bool {
        let mut entries = self.entries.write();
        let list = entries.entry(key).or_default();
        if list.iter().any(|existing| same_listener(existing, &listener)) {
            return false;
        }
        list.push(listener);
        true
    }

    fn remove(&self, key: &ListenerKey, listener: &Listener) -> bool {
        let mut entries = self.entries.write();
        let Some(list) = entries.get_mut(key) else {
            return false;
        };
        let before = list.len();
        list.retain(|existing| !same_listener(existing, listener));
        let removed = list.len() != before;
        if list.is_empty() {
            entries.remove(key);
        }
        removed
    }

    fn clear(&self, key: &ListenerKey) -> bool { self.entries.write().remove(key).is_some() }

    fn clear_all(&self) { self.entries.write().clear(); }

    fn snapshot(&self, key: &ListenerKey) -> Arc<[Listener]> {
        match self.entries.read().get(key) {
            Some(list) => Arc::from(list.as_slice()),
            None => Arc::from(Vec::new()),
        }
    }

    fn len(&self, key: &ListenerKey) -> usize { self.entries.read().get(key).map_or(0, Vec::len) }

    fn is_empty(&self) -> bool { self.entries.read().is_empty() }
}

/// Immutable per-key slices, rebuilt on every registration change.
///
/// Fan-outs only clone an `Arc`, which suits registries that change rarely
/// and dispatch often.
#[derive(Default)]
pub struct CopyOnWritePlan {
    entries: RwLock<HashMap<ListenerKey, Arc<[Listener]>>>,
}

impl CopyOnWritePlan {
    pub fn new() -> Self { Self::default() }
}

impl DispatchPlan for CopyOnWritePlan {
    fn add(&self, key: ListenerKey, listener: Listener) -> bool {
        let mut entries = self.entries.write();
        let current = entries.get(&key).map(|list| list.to_vec()).unwrap_or_default();
        if current.iter().any(|existing| same_listener(existing, &listener)) {
            return false;
        }
        let mut next = current;
        next.push(listener);
        entries.insert(key, Arc::from(next));
        true
    }

    fn remove(&self, key: &ListenerKey, listener: &Listener) -> bool {
        let mut entries = self.entries.write();
        let Some(list) = entries.get(key) else {
            return false;
        };
        if !list.iter().any(|existing| same_listener(existing, listener)) {
            return false;
        }
        let next: Vec<Listener> = list
            .iter()
            .filter(|existing| !same_listener(existing, listener))
            .cloned()
            .collect();
        if next.is_empty() {
            entries.remove(key);
        } else {
            entries.insert(key.clone(), Arc::from(next));
        }
        true
    }

    fn clear(&self, key: &ListenerKey) -> bool { self.entries.write().remove(key).is_some() }

    fn clear_all(&self) { self.entries.write().clear(); }

    fn snapshot(&self, key: &ListenerKey) -> Arc<[Listener]> {
        match self.entries.read().get(key) {
            Some(list) => Arc::clone(list),
            None => Arc::from(Vec::new()),
        }
    }

    fn len(&self, key: &ListenerKey) -> usize { self.entries.read().get(key).map_or(0, |list| list.len()) }

    fn is_empty(&self) -> bool { self.entries.read().is_empty() }
}
