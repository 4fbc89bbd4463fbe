//! Instrumentation entry points.
//!
//! [`observe`] turns a plain value tree into a reactive one. Each observed
//! container carries exactly one [`Observer`], which owns the registry for
//! container-level changes (reactive field addition/removal, sequence
//! mutation). Instrumentation is recursive and idempotent.
//!
//! [`set_field`] and [`delete_field`] are the structural mutation
//! operations: assignment through the normal accessor where the field
//! already exists, splice-path index replacement for sequences, and
//! observed field addition/removal with a container-level notification
//! otherwise. Invalid targets warn and no-op; they never panic.

use std::cell::Cell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::reactive::dep::Dep;

use super::value::Value;

/// Container-level instrumentation record.
pub struct Observer {
    dep: Arc<Dep>,
    root_refs: AtomicUsize,
}

impl Observer {
    pub(crate) fn new() -> Self {
        Self {
            dep: Arc::new(Dep::new()),
            root_refs: AtomicUsize::new(0),
        }
    }

    /// Registry for container-level changes.
    pub fn dep(&self) -> &Arc<Dep> {
        &self.dep
    }

    pub(crate) fn mark_root(&self) {
        self.root_refs.fetch_add(1, Ordering::Relaxed);
    }

    /// Whether this container serves as some owner's root state bag.
    pub fn is_root(&self) -> bool {
        self.root_refs.load(Ordering::Relaxed) > 0
    }
}

thread_local! {
    static OBSERVING: Cell<bool> = const { Cell::new(true) };
}

/// Flip the process-wide (per thread) observation flag, returning the
/// previous value. While disabled, [`observe`] refuses to instrument
/// anything new; already-instrumented containers keep working.
pub fn set_observation_enabled(enabled: bool) -> bool {
    OBSERVING.with(|flag| flag.replace(enabled))
}

pub(crate) fn observation_enabled() -> bool {
    OBSERVING.with(Cell::get)
}

/// Run `f` with observation disabled, restoring the previous flag on exit
/// even if `f` panics. Used when applying factory-produced defaults that
/// must not become reactive on their own.
pub fn with_observation_disabled<R>(f: impl FnOnce() -> R) -> R {
    struct Restore(bool);
    impl Drop for Restore {
        fn drop(&mut self) {
            set_observation_enabled(self.0);
        }
    }
    let _restore = Restore(set_observation_enabled(false));
    f()
}

/// Instrument a value tree.
///
/// Returns the container's observer, creating it on first call. No-op
/// (`None`) for scalars and externals, for sealed containers, and while
/// observation is disabled.
pub fn observe(value: &Value) -> Option<Arc<Observer>> {
    match value {
        Value::Map(map) => map.ensure_observed(),
        Value::Seq(seq) => seq.ensure_observed(),
        _ => None,
    }
}

/// Instrument a value tree and mark it as an owner's root state bag.
/// Root containers refuse late field addition/removal with a warning.
pub fn observe_root(value: &Value) -> Option<Arc<Observer>> {
    let ob = observe(value)?;
    ob.mark_root();
    Some(ob)
}

/// Add or assign a field reactively.
///
/// Existing fields go through the normal accessor (change detection
/// included). Sequences accept numeric keys through the splice path. A new
/// field on an observed map is instrumented and announced on the
/// container-level registry.
pub fn set_field(target: &Value, key: &str, value: impl Into<Value>) {
    let value = value.into();
    match target {
        Value::Seq(seq) => match key.parse::<usize>() {
            Ok(index) => seq.set(index, value),
            Err(_) => {
                tracing::warn!(key, "sequence fields must be numeric indices");
            }
        },
        Value::Map(map) => {
            if map.contains_key(key) {
                map.set(key, value);
                return;
            }
            match map.observer() {
                Some(ob) if ob.is_root() => {
                    tracing::warn!(
                        key,
                        "avoid adding reactive fields to a root state bag at runtime; declare them upfront"
                    );
                }
                Some(_) => map.add_reactive_field(key, value),
                None => map.insert(key, value),
            }
        }
        _ => {
            tracing::warn!(
                key,
                kind = target.kind(),
                "cannot set a reactive field on a primitive value"
            );
        }
    }
}

/// Remove a field reactively. No-op if the field is absent.
pub fn delete_field(target: &Value, key: &str) {
    match target {
        Value::Seq(seq) => {
            if let Ok(index) = key.parse::<usize>() {
                seq.splice(index, 1, Vec::new());
            }
        }
        Value::Map(map) => {
            if map.is_sealed() {
                tracing::warn!(key, "cannot delete a field from a sealed mapping");
                return;
            }
            if let Some(ob) = map.observer() {
                if ob.is_root() {
                    tracing::warn!(
                        key,
                        "avoid deleting fields from a root state bag; assign null instead"
                    );
                    return;
                }
            }
            if map.remove_entry(key).is_none() {
                return;
            }
            if let Some(ob) = map.observer() {
                ob.dep().notify();
            }
        }
        _ => {
            tracing::warn!(
                key,
                kind = target.kind(),
                "cannot delete a reactive field on a primitive value"
            );
        }
    }
}
