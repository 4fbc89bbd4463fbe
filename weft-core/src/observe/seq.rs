//! Reactive sequence container.
//!
//! `Seq` wraps a vector behind a cheap-clone handle and exposes exactly the
//! mutating operations the engine can instrument: `push`, `pop`, `shift`,
//! `unshift`, `splice`, `sort_by`, and `reverse`, plus index replacement
//! built on the splice path. Each mutator runs the underlying operation
//! first, instruments any newly inserted elements, then notifies the
//! container-level registry exactly once.
//!
//! There is no per-index registry; index reads register against the
//! container registry, and [`depend_seq`] compensates by registering the
//! reading watcher with every element's own registry when a sequence is
//! read through a mapping field.

use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use crate::reactive::context;

use super::observer::{observation_enabled, observe, Observer};
use super::value::Value;

struct SeqInner {
    items: RwLock<Vec<Value>>,
    observer: OnceLock<Arc<Observer>>,
    sealed: AtomicBool,
}

/// A reactive-capable sequence.
#[derive(Clone)]
pub struct Seq {
    inner: Arc<SeqInner>,
}

impl Seq {
    pub fn new() -> Self {
        Self::from_vec(Vec::new())
    }

    pub fn from_vec(items: Vec<Value>) -> Self {
        Self {
            inner: Arc::new(SeqInner {
                items: RwLock::new(items),
                observer: OnceLock::new(),
                sealed: AtomicBool::new(false),
            }),
        }
    }

    /// Tracked index read, registered against the container registry.
    pub fn get(&self, index: usize) -> Option<Value> {
        let value = self.inner.items.read().get(index).cloned()?;
        if context::is_tracking() {
            if let Some(ob) = self.observer() {
                ob.dep().depend();
            }
            if let Some(child) = value.observer() {
                child.dep().depend();
                if let Value::Seq(seq) = &value {
                    depend_seq(seq);
                }
            }
        }
        Some(value)
    }

    pub fn get_untracked(&self, index: usize) -> Option<Value> {
        self.inner.items.read().get(index).cloned()
    }

    /// Tracked length read.
    pub fn len(&self) -> usize {
        if context::is_tracking() {
            if let Some(ob) = self.observer() {
                ob.dep().depend();
            }
        }
        self.inner.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn len_untracked(&self) -> usize {
        self.inner.items.read().len()
    }

    /// Tracked full read: registers the container registry plus every
    /// element's own registry.
    pub fn snapshot(&self) -> Vec<Value> {
        if context::is_tracking() {
            if let Some(ob) = self.observer() {
                ob.dep().depend();
            }
            depend_seq(self);
        }
        self.snapshot_untracked()
    }

    pub fn snapshot_untracked(&self) -> Vec<Value> {
        self.inner.items.read().clone()
    }

    /// Append at the end.
    pub fn push(&self, value: impl Into<Value>) {
        if self.reject_sealed("push") {
            return;
        }
        let value = value.into();
        self.inner.items.write().push(value.clone());
        self.notify_mutation(std::slice::from_ref(&value));
    }

    /// Remove from the end.
    pub fn pop(&self) -> Option<Value> {
        if self.reject_sealed("pop") {
            return None;
        }
        let removed = self.inner.items.write().pop();
        self.notify_mutation(&[]);
        removed
    }

    /// Remove from the front.
    pub fn shift(&self) -> Option<Value> {
        if self.reject_sealed("shift") {
            return None;
        }
        let removed = {
            let mut items = self.inner.items.write();
            if items.is_empty() {
                None
            } else {
                Some(items.remove(0))
            }
        };
        self.notify_mutation(&[]);
        removed
    }

    /// Prepend at the front.
    pub fn unshift(&self, value: impl Into<Value>) {
        if self.reject_sealed("unshift") {
            return;
        }
        let value = value.into();
        self.inner.items.write().insert(0, value.clone());
        self.notify_mutation(std::slice::from_ref(&value));
    }

    /// Replace `delete_count` elements starting at `start` with
    /// `new_items`, returning the removed elements. Out-of-range indices
    /// are clamped.
    pub fn splice(&self, start: usize, delete_count: usize, new_items: Vec<Value>) -> Vec<Value> {
        if self.reject_sealed("splice") {
            return Vec::new();
        }
        let removed: Vec<Value> = {
            let mut items = self.inner.items.write();
            let start = start.min(items.len());
            let end = (start + delete_count).min(items.len());
            items.splice(start..end, new_items.iter().cloned()).collect()
        };
        self.notify_mutation(&new_items);
        removed
    }

    /// Sort with a caller-supplied comparator. The comparator runs against
    /// a detached copy, so it may freely read other reactive state.
    pub fn sort_by(&self, compare: impl FnMut(&Value, &Value) -> CmpOrdering) {
        if self.reject_sealed("sort_by") {
            return;
        }
        let mut items = self.inner.items.read().clone();
        items.sort_by(compare);
        *self.inner.items.write() = items;
        self.notify_mutation(&[]);
    }

    /// Reverse in place.
    pub fn reverse(&self) {
        if self.reject_sealed("reverse") {
            return;
        }
        self.inner.items.write().reverse();
        self.notify_mutation(&[]);
    }

    /// Index replacement through the splice path. Writing past the end
    /// pads the gap with nulls, matching sparse assignment semantics.
    pub fn set(&self, index: usize, value: impl Into<Value>) {
        let value = value.into();
        let len = self.len_untracked();
        if index < len {
            self.splice(index, 1, vec![value]);
        } else {
            let mut tail = vec![Value::Null; index - len];
            tail.push(value);
            self.splice(len, 0, tail);
        }
    }

    fn notify_mutation(&self, inserted: &[Value]) {
        if let Some(ob) = self.observer() {
            for value in inserted {
                observe(value);
            }
            ob.dep().notify();
        }
    }

    fn reject_sealed(&self, op: &'static str) -> bool {
        if self.is_sealed() {
            tracing::warn!(op, "cannot mutate a sealed sequence");
            return true;
        }
        false
    }

    /// Size of the container-level subscriber registry.
    pub fn subscriber_count(&self) -> usize {
        self.observer().map_or(0, |ob| ob.dep().subscriber_count())
    }

    pub fn seal(&self) {
        self.inner.sealed.store(true, Ordering::Release);
    }

    pub fn is_sealed(&self) -> bool {
        self.inner.sealed.load(Ordering::Acquire)
    }

    pub fn observer(&self) -> Option<Arc<Observer>> {
        self.inner.observer.get().cloned()
    }

    pub fn is_observed(&self) -> bool {
        self.inner.observer.get().is_some()
    }

    /// Instrument this sequence (idempotent); tag first, then walk.
    pub(crate) fn ensure_observed(&self) -> Option<Arc<Observer>> {
        if let Some(ob) = self.inner.observer.get() {
            return Some(Arc::clone(ob));
        }
        if !observation_enabled() || self.is_sealed() {
            return None;
        }
        let ob = Arc::new(Observer::new());
        let ob = match self.inner.observer.set(Arc::clone(&ob)) {
            Ok(()) => ob,
            Err(_) => Arc::clone(self.inner.observer.get()?),
        };
        let children = self.snapshot_untracked();
        for child in &children {
            observe(child);
        }
        Some(ob)
    }

    pub fn ptr_eq(&self, other: &Seq) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Register the running watcher with every element's container registry,
/// recursively through nested sequences. Element access cannot be
/// registered per index, so a read of the sequence subscribes to all of
/// its current elements.
pub(crate) fn depend_seq(seq: &Seq) {
    for item in seq.snapshot_untracked() {
        if let Some(ob) = item.observer() {
            ob.dep().depend();
        }
        if let Value::Seq(nested) = &item {
            depend_seq(nested);
        }
    }
}

impl Default for Seq {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Into<Value>> FromIterator<V> for Seq {
    fn from_iter<I: IntoIterator<Item = V>>(iter: I) -> Self {
        Self::from_vec(iter.into_iter().map(Into::into).collect())
    }
}

impl fmt::Debug for Seq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.snapshot_untracked()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observe::Map;

    #[test]
    fn push_pop_shift_unshift() {
        let seq: Seq = [1, 2].into_iter().collect();
        seq.push(3);
        assert_eq!(seq.len_untracked(), 3);
        assert_eq!(seq.pop(), Some(Value::from(3)));
        seq.unshift(0);
        assert_eq!(seq.get_untracked(0), Some(Value::from(0)));
        assert_eq!(seq.shift(), Some(Value::from(0)));
        assert_eq!(seq.len_untracked(), 2);
    }

    #[test]
    fn splice_replaces_and_returns_removed() {
        let seq: Seq = [1, 2, 3, 4].into_iter().collect();
        let removed = seq.splice(1, 2, vec![Value::from(9)]);
        assert_eq!(removed, vec![Value::from(2), Value::from(3)]);
        assert_eq!(
            seq.snapshot_untracked(),
            vec![Value::from(1), Value::from(9), Value::from(4)]
        );
    }

    #[test]
    fn splice_clamps_out_of_range() {
        let seq: Seq = [1].into_iter().collect();
        let removed = seq.splice(5, 10, vec![Value::from(2)]);
        assert!(removed.is_empty());
        assert_eq!(seq.len_untracked(), 2);
    }

    #[test]
    fn set_pads_sparse_writes_with_null() {
        let seq = Seq::new();
        seq.set(2, 7);
        assert_eq!(
            seq.snapshot_untracked(),
            vec![Value::Null, Value::Null, Value::from(7)]
        );
        seq.set(0, 1);
        assert_eq!(seq.get_untracked(0), Some(Value::from(1)));
    }

    #[test]
    fn sort_and_reverse() {
        let seq: Seq = [3, 1, 2].into_iter().collect();
        seq.sort_by(|a, b| a.as_f64().partial_cmp(&b.as_f64()).unwrap());
        assert_eq!(
            seq.snapshot_untracked(),
            vec![Value::from(1), Value::from(2), Value::from(3)]
        );
        seq.reverse();
        assert_eq!(seq.get_untracked(0), Some(Value::from(3)));
    }

    #[test]
    fn observed_seq_instruments_inserted_elements() {
        let seq = Seq::new();
        observe(&Value::Seq(seq.clone()));
        let element = Map::new().with("x", 1);
        seq.push(element.clone());
        assert!(element.is_observed());
    }

    #[test]
    fn unobserved_seq_leaves_elements_plain() {
        let seq = Seq::new();
        let element = Map::new().with("x", 1);
        seq.push(element.clone());
        assert!(!element.is_observed());
    }

    #[test]
    fn sealed_seq_rejects_mutation() {
        let seq: Seq = [1].into_iter().collect();
        seq.seal();
        seq.push(2);
        assert_eq!(seq.pop(), None);
        assert_eq!(seq.len_untracked(), 1);
    }
}
