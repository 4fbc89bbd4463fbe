//! Memoized derived values.
//!
//! A `Computed` wraps a lazy watcher. Invalidation only marks it dirty;
//! the formula re-runs on the next read, and clean reads return the cached
//! value without touching the formula. A read performed inside another
//! tracking computation also forwards the computed value's dependency set
//! to that outer computation, so invalidation flows through chains of
//! derived values.

use crate::error::Error;
use crate::observe::Value;

use super::context;
use super::scope::Scope;
use super::watcher::{Watcher, WatcherOptions};

/// A cached derived value, recomputed on demand.
pub struct Computed {
    watcher: Watcher,
}

impl Computed {
    /// Create a computed value. The formula does not run until the first
    /// read.
    pub fn new<F>(scope: Option<&Scope>, getter: F) -> Self
    where
        F: Fn() -> Result<Value, Error> + Send + Sync + 'static,
    {
        Self {
            watcher: Watcher::new(
                scope,
                getter,
                WatcherOptions {
                    lazy: true,
                    ..Default::default()
                },
            ),
        }
    }

    /// Read the value, recomputing only if a dependency changed since the
    /// last read.
    pub fn get(&self) -> Value {
        if self.watcher.is_dirty() {
            self.watcher.evaluate();
        }
        if context::is_tracking() {
            self.watcher.depend();
        }
        self.watcher.value()
    }

    /// The cached value as of the last recomputation, without refreshing.
    pub fn peek(&self) -> Value {
        self.watcher.value()
    }

    pub fn is_dirty(&self) -> bool {
        self.watcher.is_dirty()
    }

    pub fn teardown(&self) {
        self.watcher.teardown();
    }

    /// The underlying watcher handle.
    pub fn watcher(&self) -> &Watcher {
        &self.watcher
    }
}
