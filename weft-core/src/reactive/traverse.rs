//! Deep dependency collection.
//!
//! A deep watcher must re-run when anything reachable from its value
//! changes, not just the fields its getter touched. After the getter
//! returns, the result graph is walked through the tracked accessors so
//! every field read registers the watcher along the way. A seen-set keyed
//! by observer registry id keeps cyclic graphs from recursing forever.

use std::collections::HashSet;

use crate::observe::Value;

use super::dep::DepId;

/// Touch every field reachable from `value` while a watcher is tracking.
pub(crate) fn traverse(value: &Value) {
    let mut seen = HashSet::new();
    traverse_value(value, &mut seen);
}

fn traverse_value(value: &Value, seen: &mut HashSet<DepId>) {
    if let Some(ob) = value.observer() {
        if !seen.insert(ob.dep().id()) {
            return;
        }
    }
    match value {
        Value::Map(map) => {
            for key in map.keys_untracked() {
                if let Some(child) = map.get(&key) {
                    traverse_value(&child, seen);
                }
            }
        }
        Value::Seq(seq) => {
            for index in 0..seq.len_untracked() {
                if let Some(child) = seq.get(index) {
                    traverse_value(&child, seen);
                }
            }
        }
        _ => {}
    }
}
