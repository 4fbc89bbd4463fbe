//! Read-tracking context.
//!
//! The context records which watcher is currently executing. Tracked reads
//! consult it to correlate the read with the computation that performed
//! it, without threading an explicit parameter through every accessor.
//!
//! # Implementation
//!
//! A thread-local stack of watcher handles. Entering a tracked run pushes
//! the watcher and returns a guard; dropping the guard pops, so the stack
//! stays balanced even when the computation panics. The stack (rather than
//! a single slot) is what makes nested observation work: a computed value
//! evaluated in the middle of a render tracks its own reads, and the outer
//! render resumes tracking when the inner guard drops.

use std::cell::RefCell;

use super::watcher::{Watcher, WatcherId};

thread_local! {
    static TRACK_STACK: RefCell<Vec<Watcher>> = const { RefCell::new(Vec::new()) };
}

/// Guard for one tracked run. Pops the stack when dropped.
pub(crate) struct TrackScope {
    id: WatcherId,
}

impl TrackScope {
    /// Push `watcher` as the currently tracking computation.
    pub(crate) fn enter(watcher: Watcher) -> Self {
        let id = watcher.id();
        TRACK_STACK.with(|stack| stack.borrow_mut().push(watcher));
        Self { id }
    }
}

impl Drop for TrackScope {
    fn drop(&mut self) {
        TRACK_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();

            // Catch mismatched push/pop pairs early.
            if let Some(watcher) = popped {
                debug_assert_eq!(
                    watcher.id(),
                    self.id,
                    "track scope mismatch: expected {:?}, got {:?}",
                    self.id,
                    watcher.id()
                );
            }
        });
    }
}

/// Whether any watcher is currently tracking reads on this thread.
pub fn is_tracking() -> bool {
    TRACK_STACK.with(|stack| !stack.borrow().is_empty())
}

/// The watcher currently tracking reads, if any.
pub fn current_watcher() -> Option<Watcher> {
    TRACK_STACK.with(|stack| stack.borrow().last().cloned())
}
