//! Reactive value model.
//!
//! This module is the boundary where plain application data becomes
//! reactive state. Data enters as a [`Value`] — a tagged tree over
//! scalars, [`Seq`] sequences, [`Map`] mappings, and opaque [`External`]
//! host values — and [`observe`] instruments the containers so that every
//! field read and write flows through dependency tracking.
//!
//! # Reads and writes
//!
//! Because field access cannot be intercepted on arbitrary native structs,
//! the accessor indirection is explicit: reads go through `Map::get` /
//! `Seq::get` and register the running watcher, writes go through
//! `Map::set` and the seven sequence mutators and notify subscribers.
//! Structural changes (adding or removing fields) use [`set_field`] and
//! [`delete_field`], which announce the change on the container-level
//! registry.

mod map;
mod observer;
mod seq;
mod value;

pub use map::Map;
pub use observer::{
    delete_field, observe, observe_root, set_field, set_observation_enabled,
    with_observation_disabled, Observer,
};
pub use seq::Seq;
pub use value::{External, Value};
