//! The asynchronous task boundary.
//!
//! Mutations batch until "the next tick"; this module is that boundary.
//! [`next_tick`] queues a callback and arranges for the queue to drain
//! exactly once per turn. How the drain is deferred depends on the host:
//!
//! - With a tick driver installed ([`set_tick_driver`]), the driver is
//!   invoked once per turn and schedules [`run_tick_callbacks`] on its
//!   event loop — the microtask-equivalent path.
//! - [`install_tokio_tick_driver`] wires the driver to
//!   `tokio::task::spawn_local`, for hosts running a local task set.
//! - With no driver, the host drives the boundary itself by calling
//!   [`run_tick_callbacks`] — the fallback used when no scheduling
//!   primitive is available, and the mode the test suites run in.
//!
//! Callbacks queued while the drain is running land in the next turn, so a
//! flush that triggers further work cannot starve the host.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

type TickCallback = Box<dyn FnOnce()>;

thread_local! {
    static CALLBACKS: RefCell<Vec<TickCallback>> = const { RefCell::new(Vec::new()) };
    static PENDING: Cell<bool> = const { Cell::new(false) };
    static DRIVER: RefCell<Option<Rc<dyn Fn()>>> = const { RefCell::new(None) };
}

/// Queue `callback` for the next tick. The first callback of a turn
/// invokes the tick driver, if one is installed.
pub fn next_tick(callback: impl FnOnce() + 'static) {
    CALLBACKS.with(|callbacks| callbacks.borrow_mut().push(Box::new(callback)));
    let schedule = PENDING.with(|pending| {
        if pending.get() {
            false
        } else {
            pending.set(true);
            true
        }
    });
    if schedule {
        let driver = DRIVER.with(|driver| driver.borrow().clone());
        if let Some(driver) = driver {
            driver();
        }
    }
}

/// Drain the tick queue.
///
/// Callbacks queued during the drain go to the next turn. Safe to call
/// with an empty queue.
pub fn run_tick_callbacks() {
    PENDING.with(|pending| pending.set(false));
    let callbacks: Vec<TickCallback> =
        CALLBACKS.with(|callbacks| std::mem::take(&mut *callbacks.borrow_mut()));
    for callback in callbacks {
        callback();
    }
}

/// Whether a drain is currently scheduled.
pub fn has_pending_ticks() -> bool {
    PENDING.with(Cell::get)
}

/// Install this thread's tick driver. The driver is called once per turn
/// and must arrange for [`run_tick_callbacks`] to run later on this same
/// thread.
pub fn set_tick_driver(driver: impl Fn() + 'static) {
    DRIVER.with(|slot| *slot.borrow_mut() = Some(Rc::new(driver)));
}

/// Remove the installed driver, returning to host-driven draining.
pub fn clear_tick_driver() {
    DRIVER.with(|slot| *slot.borrow_mut() = None);
}

/// Drive ticks through `tokio::task::spawn_local`. Requires the caller to
/// be running inside a tokio `LocalSet` on this thread.
pub fn install_tokio_tick_driver() {
    set_tick_driver(|| {
        tokio::task::spawn_local(async {
            run_tick_callbacks();
        });
    });
}
