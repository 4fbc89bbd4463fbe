//! Batching scheduler.
//!
//! Invalidations arriving during one synchronous burst of mutations are
//! collected into a pending set keyed by watcher id, so each watcher is
//! queued at most once per tick. The first invalidation schedules a flush
//! on the next tick; the flush sorts pending watchers by creation id
//! (parents were created before children, so parents re-run first) and
//! runs them, re-checking the queue length on every step so that watchers
//! invalidated *during* the flush drain within the same tick.
//!
//! A cascade that keeps re-queueing the same watcher is cut off after
//! [`MAX_CASCADE_PASSES`] passes and reported through the error sink
//! instead of spinning forever.
//!
//! All scheduler state is per-thread, matching the single-threaded
//! cooperative execution model and the thread-local tracking stack.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};

use crate::error::{report_error, Error, ErrorContext};

use super::tick::next_tick;
use super::watcher::{Watcher, WatcherId};

/// Hard cap on how many times one watcher may re-enter a single flush.
pub const MAX_CASCADE_PASSES: usize = 100;

/// How `queue_watcher` triggers the flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushMode {
    /// Coalesce invalidations and flush once on the next tick.
    #[default]
    Batched,
    /// Flush synchronously as soon as anything is queued. Escape hatch for
    /// test harnesses that want fully deterministic, tick-free execution.
    Immediate,
}

#[derive(Default)]
struct SchedulerState {
    queue: Vec<Watcher>,
    has: HashSet<WatcherId>,
    circular: HashMap<WatcherId, usize>,
    on_flushed: Vec<Box<dyn FnOnce()>>,
    waiting: bool,
    flushing: bool,
    index: usize,
}

thread_local! {
    static STATE: RefCell<SchedulerState> = RefCell::new(SchedulerState::default());
    static MODE: Cell<FlushMode> = const { Cell::new(FlushMode::Batched) };
}

/// Set this thread's flush mode, returning the previous one.
pub fn set_flush_mode(mode: FlushMode) -> FlushMode {
    MODE.with(|m| m.replace(mode))
}

pub fn flush_mode() -> FlushMode {
    MODE.with(Cell::get)
}

/// Register a callback to run once the next flush has fully settled.
/// Consumed by the render engine for "wait until re-render completes"
/// semantics.
pub fn on_next_flush(callback: impl FnOnce() + 'static) {
    STATE.with(|state| state.borrow_mut().on_flushed.push(Box::new(callback)));
}

/// Add a watcher to the pending set for the current tick.
///
/// Idempotent per watcher id. During a flush, the watcher is spliced into
/// the not-yet-run portion of the queue at its id-sorted position.
pub(crate) fn queue_watcher(watcher: Watcher) {
    let trigger_flush = STATE.with(|state| {
        let mut state = state.borrow_mut();
        let id = watcher.id();
        if state.has.contains(&id) {
            return false;
        }
        state.has.insert(id);
        if !state.flushing {
            state.queue.push(watcher);
        } else {
            // Splice into the not-yet-run tail at the id-sorted position.
            // `index` already points past the running watcher.
            let mut at = state.queue.len();
            while at > state.index && state.queue[at - 1].id() > id {
                at -= 1;
            }
            state.queue.insert(at, watcher);
        }
        if !state.waiting {
            state.waiting = true;
            true
        } else {
            false
        }
    });
    if trigger_flush {
        match flush_mode() {
            FlushMode::Immediate => flush_queue(),
            FlushMode::Batched => next_tick(flush_queue),
        }
    }
}

/// Drain the pending set, running each watcher at most once unless a
/// cascade re-queues it.
fn flush_queue() {
    STATE.with(|state| {
        let mut state = state.borrow_mut();
        state.flushing = true;
        state.queue.sort_by_key(Watcher::id);
    });

    loop {
        // Re-read the length every step: runs may append to the queue.
        let next = STATE.with(|state| {
            let mut state = state.borrow_mut();
            if state.index < state.queue.len() {
                let watcher = state.queue[state.index].clone();
                state.index += 1;
                Some(watcher)
            } else {
                None
            }
        });
        let Some(watcher) = next else { break };

        watcher.call_before();
        let id = watcher.id();
        STATE.with(|state| {
            state.borrow_mut().has.remove(&id);
        });
        watcher.run();

        // If the run re-queued the same watcher, count the pass and bail
        // out once the cascade cap is hit.
        let overflow = STATE.with(|state| {
            let mut state = state.borrow_mut();
            if state.has.contains(&id) {
                let passes = state.circular.entry(id).or_insert(0);
                *passes += 1;
                *passes > MAX_CASCADE_PASSES
            } else {
                false
            }
        });
        if overflow {
            report_error(
                &Error::CascadeOverflow {
                    watcher: id,
                    limit: MAX_CASCADE_PASSES,
                },
                ErrorContext {
                    watcher: Some(id),
                    user: watcher.is_user(),
                },
            );
            break;
        }
    }

    let flushed = STATE.with(|state| {
        let mut state = state.borrow_mut();
        state.queue.clear();
        state.has.clear();
        state.circular.clear();
        state.index = 0;
        state.waiting = false;
        state.flushing = false;
        std::mem::take(&mut state.on_flushed)
    });
    for callback in flushed {
        callback();
    }
}
