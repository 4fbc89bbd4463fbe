//! Reactive mapping container.
//!
//! A `Map` stores string-keyed fields in insertion order. Every field owns
//! one dependency registry; tracked reads go through [`Map::get`] and
//! register the running watcher, writes go through [`Map::set`] and notify
//! the field's registry after the unchanged-write check.
//!
//! A `Map` is a cheap-clone handle: clones share the same underlying
//! fields, which is what makes container identity meaningful for change
//! detection.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::reactive::context;
use crate::reactive::dep::Dep;

use super::observer::{observation_enabled, observe, Observer};
use super::seq::depend_seq;
use super::value::{unchanged_write, Value};

pub(crate) struct FieldEntry {
    pub(crate) value: Value,
    pub(crate) dep: Arc<Dep>,
}

impl FieldEntry {
    fn new(value: Value) -> Self {
        Self {
            value,
            dep: Arc::new(Dep::new()),
        }
    }
}

struct MapInner {
    fields: RwLock<IndexMap<String, FieldEntry>>,
    observer: OnceLock<Arc<Observer>>,
    sealed: AtomicBool,
}

/// An insertion-ordered, reactive-capable mapping.
#[derive(Clone)]
pub struct Map {
    inner: Arc<MapInner>,
}

impl Map {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MapInner {
                fields: RwLock::new(IndexMap::new()),
                observer: OnceLock::new(),
                sealed: AtomicBool::new(false),
            }),
        }
    }

    pub fn from_entries<K, V, I>(entries: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        let map = Self::new();
        {
            let mut fields = map.inner.fields.write();
            for (key, value) in entries {
                fields.insert(key.into(), FieldEntry::new(value.into()));
            }
        }
        map
    }

    /// Builder-style [`Map::insert`].
    pub fn with(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert a field through the plain path: no instrumentation of the
    /// value, no notification. Fields added this way to an observed map
    /// are change-tracked on subsequent reads/writes, but nobody learns
    /// about the addition itself; use `set_field` for a reactive add.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        if self.is_sealed() {
            tracing::warn!(%key, "cannot add a field to a sealed mapping");
            return;
        }
        self.inner
            .fields
            .write()
            .insert(key, FieldEntry::new(value.into()));
    }

    /// Tracked read. Registers the running watcher with the field's
    /// registry and, when the value is itself an observed container, with
    /// the container-level registry (recursively across sequence elements,
    /// since element access is not individually registered).
    pub fn get(&self, key: &str) -> Option<Value> {
        let (value, dep) = {
            let fields = self.inner.fields.read();
            let entry = fields.get(key)?;
            (entry.value.clone(), Arc::clone(&entry.dep))
        };
        if self.is_observed() && context::is_tracking() {
            dep.depend();
            if let Some(child) = value.observer() {
                child.dep().depend();
                if let Value::Seq(seq) = &value {
                    depend_seq(seq);
                }
            }
        }
        Some(value)
    }

    /// Read without establishing a dependency.
    pub fn get_untracked(&self, key: &str) -> Option<Value> {
        self.inner.fields.read().get(key).map(|e| e.value.clone())
    }

    /// Tracked write to an existing field. Unchanged writes (strict
    /// equality, NaN-over-NaN) are suppressed entirely. A write to a
    /// missing key falls back to the plain insert path.
    pub fn set(&self, key: &str, value: impl Into<Value>) {
        let value = value.into();
        if self.is_sealed() {
            tracing::warn!(key, "cannot assign a field on a sealed mapping");
            return;
        }
        let dep = {
            let mut fields = self.inner.fields.write();
            match fields.get_mut(key) {
                Some(entry) => {
                    if unchanged_write(&entry.value, &value) {
                        return;
                    }
                    entry.value = value.clone();
                    Some(Arc::clone(&entry.dep))
                }
                None => {
                    fields.insert(key.to_owned(), FieldEntry::new(value.clone()));
                    None
                }
            }
        };
        if let Some(dep) = dep {
            if self.is_observed() {
                observe(&value);
                dep.notify();
            }
        }
    }

    /// Reactive field addition: instrument the value and notify the
    /// container-level registry. Only called on observed maps.
    pub(crate) fn add_reactive_field(&self, key: &str, value: Value) {
        self.inner
            .fields
            .write()
            .insert(key.to_owned(), FieldEntry::new(value.clone()));
        observe(&value);
        if let Some(ob) = self.observer() {
            ob.dep().notify();
        }
    }

    pub(crate) fn remove_entry(&self, key: &str) -> Option<Value> {
        self.inner
            .fields
            .write()
            .shift_remove(key)
            .map(|entry| entry.value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.fields.read().contains_key(key)
    }

    /// Field count. Tracked against the container-level registry, so a
    /// watcher enumerating the map re-runs on reactive adds/removes.
    pub fn len(&self) -> usize {
        self.depend_container();
        self.inner.fields.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Field names in insertion order. Tracked like [`Map::len`].
    pub fn keys(&self) -> Vec<String> {
        self.depend_container();
        self.inner.fields.read().keys().cloned().collect()
    }

    pub(crate) fn keys_untracked(&self) -> Vec<String> {
        self.inner.fields.read().keys().cloned().collect()
    }

    pub(crate) fn entries_untracked(&self) -> Vec<(String, Value)> {
        self.inner
            .fields
            .read()
            .iter()
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect()
    }

    fn depend_container(&self) {
        if context::is_tracking() {
            if let Some(ob) = self.observer() {
                ob.dep().depend();
            }
        }
    }

    /// Size of one field's subscriber registry. `None` if the field does
    /// not exist.
    pub fn subscriber_count(&self, key: &str) -> Option<usize> {
        self.inner
            .fields
            .read()
            .get(key)
            .map(|e| e.dep.subscriber_count())
    }

    /// Forbid further observation and structural mutation.
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

    /// Instrument this map (idempotent). The observer tag is placed before
    /// walking children so cyclic graphs terminate.
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
        let children: Vec<Value> = self
            .inner
            .fields
            .read()
            .values()
            .map(|e| e.value.clone())
            .collect();
        for child in &children {
            observe(child);
        }
        Some(ob)
    }

    pub fn ptr_eq(&self, other: &Map) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for Map {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Map {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_map();
        for (key, value) in self.entries_untracked() {
            out.entry(&key, &value);
        }
        out.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observe::observe;

    #[test]
    fn insert_and_get() {
        let map = Map::new().with("a", 1).with("b", "two");
        assert_eq!(map.get("a"), Some(Value::from(1)));
        assert_eq!(map.get("b"), Some(Value::from("two")));
        assert_eq!(map.get("missing"), None);
    }

    #[test]
    fn keys_preserve_insertion_order() {
        let map = Map::new().with("z", 1).with("a", 2).with("m", 3);
        assert_eq!(map.keys(), vec!["z", "a", "m"]);
    }

    #[test]
    fn set_on_missing_key_inserts_plainly() {
        let map = Map::new();
        map.set("fresh", 5);
        assert_eq!(map.get_untracked("fresh"), Some(Value::from(5)));
    }

    #[test]
    fn clones_share_fields() {
        let a = Map::new().with("x", 1);
        let b = a.clone();
        b.set("x", 2);
        assert_eq!(a.get_untracked("x"), Some(Value::from(2)));
        assert!(a.ptr_eq(&b));
    }

    #[test]
    fn sealed_map_rejects_writes() {
        let map = Map::new().with("x", 1);
        map.seal();
        map.set("x", 2);
        map.insert("y", 3);
        assert_eq!(map.get_untracked("x"), Some(Value::from(1)));
        assert!(map.get_untracked("y").is_none());
    }

    #[test]
    fn observing_instruments_nested_containers() {
        let nested = Map::new().with("inner", 1);
        let map = Map::new().with("child", nested.clone());
        observe(&Value::Map(map.clone()));
        assert!(map.is_observed());
        assert!(nested.is_observed());
    }

    #[test]
    fn subscriber_count_reports_per_field() {
        let map = Map::new().with("a", 1);
        assert_eq!(map.subscriber_count("a"), Some(0));
        assert_eq!(map.subscriber_count("nope"), None);
    }
}
