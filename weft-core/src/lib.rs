//! Weft Core
//!
//! This crate is the reactivity engine of the Weft UI runtime. Given a
//! tree of plain data and a set of derived computations — component
//! renders, computed values, explicit watchers — it detects exactly which
//! computations depend on which data fields and re-runs only the affected
//! ones, once each, after any batch of mutations. Nobody declares
//! dependencies by hand: they are recorded by running the computation and
//! watching what it reads.
//!
//! # Architecture
//!
//! The crate is organized into two modules:
//!
//! - `observe`: the tagged value tree and the instrumentation that routes
//!   every field read and write through dependency tracking
//! - `reactive`: subscriber registries, watcher computation units, the
//!   read-tracking stack, and the batching scheduler
//!
//! The template compiler, virtual-tree renderer, and component lifecycle
//! live in their own crates and consume this one through [`Watcher`],
//! [`observe`](observe()), and [`on_next_flush`].
//!
//! # Example
//!
//! ```rust,ignore
//! use weft_core::{observe, watch_path, Map, Value, WatchOptions};
//!
//! // Make a state tree reactive.
//! let state = Value::Map(Map::new().with("count", 0));
//! observe(&state);
//!
//! // Watch a field.
//! watch_path(None, &state, "count", |new, old| {
//!     println!("count: {old:?} -> {new:?}");
//! }, WatchOptions::default());
//!
//! // Mutate; the watcher re-runs after the next flush.
//! state.as_map().unwrap().set("count", 1);
//! ```

pub mod error;
pub mod observe;
pub mod reactive;

pub use error::{clear_error_hook, set_error_hook, Error, ErrorContext};
pub use observe::{
    delete_field, observe, observe_root, set_field, set_observation_enabled,
    with_observation_disabled, External, Map, Observer, Seq, Value,
};
pub use reactive::{
    next_tick, on_next_flush, run_tick_callbacks, set_flush_mode, watch, watch_path, Computed,
    FlushMode, Scope, WatchOptions, Watcher, WatcherId, WatcherOptions,
};
