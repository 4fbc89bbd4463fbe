//! Per-field subscriber registry.
//!
//! A `Dep` records which watchers currently depend on one reactive field
//! (or on one container, for structural changes). Subscription goes
//! through the watcher-side dedup protocol: a tracked read calls
//! [`Dep::depend`], which hands the registry to the running watcher; the
//! watcher decides whether it is already subscribed and calls back into
//! [`Dep::add_sub`] only for genuinely new registries.
//!
//! The registry holds weak references, so it never keeps a dropped watcher
//! alive; proactive [`Dep::remove_sub`] on watcher teardown remains the
//! protocol that keeps registries from accumulating dead entries.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use super::context;
use super::watcher::{Watcher, WatcherId, WatcherInner};

/// Unique identifier for a registry.
///
/// Watchers use these ids to deduplicate subscriptions across a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepId(u64);

impl DepId {
    /// Generate a new unique registry ID.
    ///
    /// Uses an atomic counter to ensure uniqueness across threads.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for DepId {
    fn default() -> Self {
        Self::new()
    }
}

struct Sub {
    id: WatcherId,
    watcher: Weak<WatcherInner>,
}

/// A subscriber registry for one reactive field or container.
pub struct Dep {
    id: DepId,
    /// Subscribers in subscription order. Uniqueness is enforced by the
    /// watcher-side dedup protocol, not here.
    subs: RwLock<Vec<Sub>>,
}

impl Dep {
    pub fn new() -> Self {
        Self {
            id: DepId::new(),
            subs: RwLock::new(Vec::new()),
        }
    }

    pub fn id(&self) -> DepId {
        self.id
    }

    /// Subscribe the currently tracking watcher, if any.
    ///
    /// Called from tracked reads. Goes through the watcher so duplicate
    /// subscriptions within one run collapse.
    pub fn depend(self: &Arc<Self>) {
        if let Some(watcher) = context::current_watcher() {
            watcher.record_dep(Arc::clone(self));
        }
    }

    pub(crate) fn add_sub(&self, watcher: &Watcher) {
        self.subs.write().push(Sub {
            id: watcher.id(),
            watcher: watcher.downgrade(),
        });
    }

    pub(crate) fn remove_sub(&self, id: WatcherId) {
        self.subs.write().retain(|sub| sub.id != id);
    }

    /// Invalidate every subscriber.
    ///
    /// Works against a snapshot taken up front, so subscriptions added or
    /// removed while the notification runs do not affect the current pass.
    /// Dead weak entries found along the way are pruned.
    pub fn notify(&self) {
        let mut dead = false;
        let snapshot: Vec<Watcher> = {
            let subs = self.subs.read();
            subs.iter()
                .filter_map(|sub| {
                    let upgraded = sub.watcher.upgrade().map(Watcher::from_inner);
                    if upgraded.is_none() {
                        dead = true;
                    }
                    upgraded
                })
                .collect()
        };
        if dead {
            self.subs
                .write()
                .retain(|sub| sub.watcher.strong_count() > 0);
        }
        for watcher in snapshot {
            watcher.invalidate();
        }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subs
            .read()
            .iter()
            .filter(|sub| sub.watcher.strong_count() > 0)
            .count()
    }
}

impl Default for Dep {
    fn default() -> Self {
        Self::new()
    }
}
