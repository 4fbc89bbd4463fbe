//! Owner bookkeeping for watchers.
//!
//! Every unit of composition (a component instance, in the full runtime)
//! owns the watchers it creates through a `Scope`. Destroying the owner
//! tears all of them down in one call, which is the only way subscriber
//! registries are guaranteed to shrink back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::watcher::{Watcher, WatcherId};

pub(crate) struct ScopeInner {
    watchers: Mutex<Vec<Watcher>>,
    closing: AtomicBool,
}

impl ScopeInner {
    pub(crate) fn detach(&self, id: WatcherId) {
        self.watchers.lock().retain(|w| w.id() != id);
    }

    pub(crate) fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }
}

/// An owner's watcher list.
#[derive(Clone)]
pub struct Scope {
    pub(crate) inner: Arc<ScopeInner>,
}

impl Scope {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                watchers: Mutex::new(Vec::new()),
                closing: AtomicBool::new(false),
            }),
        }
    }

    pub(crate) fn attach(&self, watcher: Watcher) {
        self.inner.watchers.lock().push(watcher);
    }

    /// Number of live watchers owned by this scope.
    pub fn watcher_count(&self) -> usize {
        self.inner.watchers.lock().len()
    }

    /// Tear down every owned watcher.
    ///
    /// Individual teardowns skip the per-watcher list removal while this
    /// runs; the whole list is dropped at once instead.
    pub fn teardown_all(&self) {
        self.inner.closing.store(true, Ordering::Release);
        let watchers = std::mem::take(&mut *self.inner.watchers.lock());
        for watcher in &watchers {
            watcher.teardown();
        }
        self.inner.closing.store(false, Ordering::Release);
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}
