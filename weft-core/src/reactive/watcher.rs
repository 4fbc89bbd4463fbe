//! Watcher: one derived computation.
//!
//! A watcher wraps a getter — a render body, a computed value's formula,
//! or an explicit watch expression — and knows how to re-run it while
//! recording every reactive field the run touches. Between runs it holds
//! two generations of subscribed registries: the set collected last run
//! (`deps`) and the set being collected right now (`new_deps`). After each
//! run the generations are reconciled, so a registry read last time but
//! not this time (a branch not taken anymore) drops its subscription.
//!
//! # Modes
//!
//! - `lazy`: invalidation only marks the watcher dirty; callers refresh
//!   on demand through [`Watcher::evaluate`]. This is the memoization
//!   substrate for computed values.
//! - `sync`: invalidation re-runs immediately instead of batching.
//! - `deep`: after each run, the resulting value graph is traversed so the
//!   watcher subscribes to every nested registry, not just the fields the
//!   getter touched.
//! - `user`: the getter is user-supplied code; its errors carry the `user`
//!   flag into the error sink.
//!
//! Getter errors never unwind out of a run: they are routed to the global
//! error sink and the watcher keeps its previous value.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;

use crate::error::{report_error, Error, ErrorContext};
use crate::observe::Value;

use super::context::TrackScope;
use super::dep::{Dep, DepId};
use super::scheduler;
use super::scope::{Scope, ScopeInner};
use super::traverse::traverse;

/// Unique, monotonically increasing watcher identifier.
///
/// Creation order doubles as flush order: owners create parent watchers
/// before child watchers, so running the queue in id order re-runs parents
/// first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatcherId(u64);

impl WatcherId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Getter signature: a no-argument run function producing the watched
/// value.
pub type GetterFn = dyn Fn() -> Result<Value, Error> + Send + Sync;
/// Completion callback signature: `(new_value, old_value)`.
pub type CallbackFn = dyn Fn(&Value, &Value) + Send + Sync;
/// Pre-flush hook signature.
pub type BeforeFn = dyn Fn() + Send + Sync;

/// Creation options for a watcher.
#[derive(Clone, Default)]
pub struct WatcherOptions {
    /// Compute only on demand; invalidation just marks dirty.
    pub lazy: bool,
    /// Run immediately on invalidation instead of batching.
    pub sync: bool,
    /// Subscribe to the whole nested value graph of the result.
    pub deep: bool,
    /// The getter (and callback) run user-supplied code.
    pub user: bool,
    /// Invoked by the scheduler right before a batched re-run.
    pub before: Option<Arc<BeforeFn>>,
}

#[derive(Default)]
struct DepTracking {
    deps: SmallVec<[Arc<Dep>; 8]>,
    dep_ids: HashSet<DepId>,
    new_deps: SmallVec<[Arc<Dep>; 8]>,
    new_dep_ids: HashSet<DepId>,
}

pub(crate) struct WatcherInner {
    id: WatcherId,
    getter: Arc<GetterFn>,
    cb: Option<Arc<CallbackFn>>,
    before: Option<Arc<BeforeFn>>,
    lazy: bool,
    sync: bool,
    deep: bool,
    user: bool,
    active: AtomicBool,
    dirty: AtomicBool,
    value: RwLock<Value>,
    tracking: Mutex<DepTracking>,
    scope: Option<Weak<ScopeInner>>,
}

/// Handle to one derived computation. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Watcher {
    inner: Arc<WatcherInner>,
}

impl Watcher {
    /// Create a watcher. Runs the getter immediately unless `lazy`, so the
    /// initial dependency set is collected up front.
    pub fn new<F>(scope: Option<&Scope>, getter: F, options: WatcherOptions) -> Self
    where
        F: Fn() -> Result<Value, Error> + Send + Sync + 'static,
    {
        Self::build(scope, Arc::new(getter), None, options)
    }

    /// Create a watcher with a completion callback, fired on re-runs whose
    /// result is reference-distinct from the previous value (or a
    /// container, or under `deep`).
    pub fn with_callback<F, C>(
        scope: Option<&Scope>,
        getter: F,
        cb: C,
        options: WatcherOptions,
    ) -> Self
    where
        F: Fn() -> Result<Value, Error> + Send + Sync + 'static,
        C: Fn(&Value, &Value) + Send + Sync + 'static,
    {
        Self::build(scope, Arc::new(getter), Some(Arc::new(cb)), options)
    }

    pub(crate) fn build(
        scope: Option<&Scope>,
        getter: Arc<GetterFn>,
        cb: Option<Arc<CallbackFn>>,
        options: WatcherOptions,
    ) -> Self {
        let watcher = Watcher {
            inner: Arc::new(WatcherInner {
                id: WatcherId::next(),
                getter,
                cb,
                before: options.before,
                lazy: options.lazy,
                sync: options.sync,
                deep: options.deep,
                user: options.user,
                active: AtomicBool::new(true),
                dirty: AtomicBool::new(options.lazy),
                value: RwLock::new(Value::Null),
                tracking: Mutex::new(DepTracking::default()),
                scope: scope.map(|s| Arc::downgrade(&s.inner)),
            }),
        };
        if let Some(scope) = scope {
            scope.attach(watcher.clone());
        }
        if !watcher.inner.lazy {
            let value = watcher.run_tracked();
            *watcher.inner.value.write() = value;
        }
        watcher
    }

    pub(crate) fn from_inner(inner: Arc<WatcherInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<WatcherInner> {
        Arc::downgrade(&self.inner)
    }

    pub fn id(&self) -> WatcherId {
        self.inner.id
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.load(Ordering::Acquire)
    }

    pub(crate) fn is_user(&self) -> bool {
        self.inner.user
    }

    /// The cached value from the most recent run.
    pub fn value(&self) -> Value {
        self.inner.value.read().clone()
    }

    /// Number of registries this watcher is currently subscribed to.
    pub fn dep_count(&self) -> usize {
        self.inner.tracking.lock().deps.len()
    }

    /// Run the getter with read tracking and reconcile subscriptions.
    fn run_tracked(&self) -> Value {
        let scope = TrackScope::enter(self.clone());
        let value = match (self.inner.getter)() {
            Ok(value) => value,
            Err(err) => {
                report_error(
                    &err,
                    ErrorContext {
                        watcher: Some(self.id()),
                        user: self.inner.user,
                    },
                );
                self.inner.value.read().clone()
            }
        };
        // Deep traversal must happen while this watcher is still the
        // tracking target, so the whole subtree subscribes to it.
        if self.inner.deep {
            traverse(&value);
        }
        drop(scope);
        self.cleanup_deps();
        value
    }

    /// Record a registry read during the current run.
    ///
    /// Deduplicates within the run, and only subscribes to registries this
    /// watcher was not already subscribed to last run.
    pub(crate) fn record_dep(&self, dep: Arc<Dep>) {
        if !self.is_active() {
            return;
        }
        let subscribe = {
            let mut tracking = self.inner.tracking.lock();
            let id = dep.id();
            if tracking.new_dep_ids.contains(&id) {
                false
            } else {
                tracking.new_dep_ids.insert(id);
                tracking.new_deps.push(Arc::clone(&dep));
                !tracking.dep_ids.contains(&id)
            }
        };
        if subscribe {
            dep.add_sub(self);
        }
    }

    /// Drop subscriptions not re-collected this run, then promote the new
    /// generation to current.
    fn cleanup_deps(&self) {
        let stale: SmallVec<[Arc<Dep>; 8]> = {
            let mut tracking = self.inner.tracking.lock();
            let stale = tracking
                .deps
                .iter()
                .filter(|dep| !tracking.new_dep_ids.contains(&dep.id()))
                .cloned()
                .collect();
            let DepTracking {
                deps,
                dep_ids,
                new_deps,
                new_dep_ids,
            } = &mut *tracking;
            std::mem::swap(deps, new_deps);
            std::mem::swap(dep_ids, new_dep_ids);
            new_deps.clear();
            new_dep_ids.clear();
            stale
        };
        for dep in stale {
            dep.remove_sub(self.id());
        }
    }

    /// Staleness callback, invoked by registries on change.
    ///
    /// Lazy watchers only flip their dirty flag. Sync watchers re-run on
    /// the spot. Everything else is handed to the scheduler, which
    /// deduplicates per tick.
    pub fn invalidate(&self) {
        if self.inner.lazy {
            self.inner.dirty.store(true, Ordering::Release);
        } else if self.inner.sync {
            self.run();
        } else {
            scheduler::queue_watcher(self.clone());
        }
    }

    /// Re-run and fire the completion callback when warranted.
    ///
    /// The callback fires only if the new value is reference-distinct from
    /// the old one, or is a container (in-place mutation leaves identity
    /// unchanged but the contents may differ), or the watcher is `deep`.
    pub(crate) fn run(&self) {
        if !self.is_active() {
            return;
        }
        let value = self.run_tracked();
        let old = self.inner.value.read().clone();
        if !value.strict_eq(&old) || value.is_container() || self.inner.deep {
            *self.inner.value.write() = value.clone();
            if let Some(cb) = &self.inner.cb {
                cb(&value, &old);
            }
        }
    }

    /// Refresh a lazy watcher's cached value and clear its dirty flag.
    pub fn evaluate(&self) {
        if !self.is_active() {
            return;
        }
        let value = self.run_tracked();
        *self.inner.value.write() = value;
        self.inner.dirty.store(false, Ordering::Release);
    }

    /// Propagate this watcher's dependency set onto the watcher currently
    /// tracking reads. Lets a computation that reads a lazy watcher's
    /// cached value inherit the lazy watcher's dependencies, so
    /// derived-of-derived invalidation flows through.
    pub fn depend(&self) {
        let deps: SmallVec<[Arc<Dep>; 8]> = self.inner.tracking.lock().deps.clone();
        for dep in deps {
            dep.depend();
        }
    }

    pub(crate) fn call_before(&self) {
        if let Some(before) = &self.inner.before {
            before();
        }
    }

    /// Unsubscribe from every registry and mark inactive. Idempotent; an
    /// inactive watcher never runs or re-subscribes again.
    pub fn teardown(&self) {
        if !self.inner.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(scope) = self.inner.scope.as_ref().and_then(Weak::upgrade) {
            // Skip the list removal while the whole scope is going away.
            if !scope.is_closing() {
                scope.detach(self.id());
            }
        }
        let deps: SmallVec<[Arc<Dep>; 8]> = {
            let mut tracking = self.inner.tracking.lock();
            tracking.dep_ids.clear();
            tracking.new_deps.clear();
            tracking.new_dep_ids.clear();
            std::mem::take(&mut tracking.deps)
        };
        for dep in deps {
            dep.remove_sub(self.id());
        }
    }
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("id", &self.id())
            .field("active", &self.is_active())
            .field("dirty", &self.is_dirty())
            .field("dep_count", &self.dep_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observe::{observe, Map};
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering::SeqCst;

    fn observed_map(entries: &[(&str, f64)]) -> Map {
        let map = Map::new();
        for (key, value) in entries {
            map.insert(*key, *value);
        }
        observe(&Value::Map(map.clone()));
        map
    }

    #[test]
    fn runs_once_on_creation() {
        let runs = Arc::new(AtomicUsize::new(0));
        let runs_clone = runs.clone();
        let _watcher = Watcher::new(
            None,
            move || {
                runs_clone.fetch_add(1, SeqCst);
                Ok(Value::Null)
            },
            WatcherOptions::default(),
        );
        assert_eq!(runs.load(SeqCst), 1);
    }

    #[test]
    fn lazy_watcher_defers_first_run() {
        let runs = Arc::new(AtomicUsize::new(0));
        let runs_clone = runs.clone();
        let watcher = Watcher::new(
            None,
            move || {
                runs_clone.fetch_add(1, SeqCst);
                Ok(Value::from(3))
            },
            WatcherOptions {
                lazy: true,
                ..Default::default()
            },
        );
        assert_eq!(runs.load(SeqCst), 0);
        assert!(watcher.is_dirty());

        watcher.evaluate();
        assert_eq!(runs.load(SeqCst), 1);
        assert!(!watcher.is_dirty());
        assert_eq!(watcher.value(), Value::from(3));
    }

    #[test]
    fn sync_watcher_reruns_on_field_write() {
        let map = observed_map(&[("x", 1.0)]);
        let runs = Arc::new(AtomicUsize::new(0));
        let runs_clone = runs.clone();
        let map_clone = map.clone();
        let _watcher = Watcher::new(
            None,
            move || {
                runs_clone.fetch_add(1, SeqCst);
                Ok(map_clone.get("x").unwrap_or(Value::Null))
            },
            WatcherOptions {
                sync: true,
                ..Default::default()
            },
        );
        assert_eq!(runs.load(SeqCst), 1);

        map.set("x", 2.0);
        assert_eq!(runs.load(SeqCst), 2);
    }

    #[test]
    fn callback_sees_new_and_old_values() {
        let map = observed_map(&[("x", 1.0)]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let map_clone = map.clone();
        let _watcher = Watcher::with_callback(
            None,
            move || Ok(map_clone.get("x").unwrap_or(Value::Null)),
            move |new, old| {
                seen_clone
                    .lock()
                    .push((new.as_f64().unwrap(), old.as_f64().unwrap()));
            },
            WatcherOptions {
                sync: true,
                ..Default::default()
            },
        );

        map.set("x", 2.0);
        map.set("x", 5.0);
        assert_eq!(*seen.lock(), [(2.0, 1.0), (5.0, 2.0)]);
    }

    #[test]
    fn branch_flip_drops_the_untaken_side() {
        let map = observed_map(&[("cond", 1.0), ("a", 10.0), ("b", 20.0)]);
        let runs = Arc::new(AtomicUsize::new(0));
        let runs_clone = runs.clone();
        let map_clone = map.clone();
        let watcher = Watcher::new(
            None,
            move || {
                runs_clone.fetch_add(1, SeqCst);
                let cond = map_clone.get("cond").and_then(|v| v.as_f64()).unwrap();
                let key = if cond != 0.0 { "a" } else { "b" };
                Ok(map_clone.get(key).unwrap_or(Value::Null))
            },
            WatcherOptions {
                sync: true,
                ..Default::default()
            },
        );

        // cond + a read; b untouched.
        assert_eq!(map.subscriber_count("a"), Some(1));
        assert_eq!(map.subscriber_count("b"), Some(0));
        assert_eq!(watcher.dep_count(), 2);

        map.set("cond", 0.0);
        assert_eq!(runs.load(SeqCst), 2);
        assert_eq!(map.subscriber_count("a"), Some(0));
        assert_eq!(map.subscriber_count("b"), Some(1));

        // Mutating the dropped branch schedules nothing.
        map.set("a", 11.0);
        assert_eq!(runs.load(SeqCst), 2);
    }

    #[test]
    fn teardown_unsubscribes_everywhere_and_is_idempotent() {
        let map = observed_map(&[("x", 1.0), ("y", 2.0)]);
        let runs = Arc::new(AtomicUsize::new(0));
        let runs_clone = runs.clone();
        let map_clone = map.clone();
        let watcher = Watcher::new(
            None,
            move || {
                runs_clone.fetch_add(1, SeqCst);
                map_clone.get("x");
                map_clone.get("y");
                Ok(Value::Null)
            },
            WatcherOptions {
                sync: true,
                ..Default::default()
            },
        );
        assert_eq!(map.subscriber_count("x"), Some(1));

        watcher.teardown();
        assert!(!watcher.is_active());
        assert_eq!(map.subscriber_count("x"), Some(0));
        assert_eq!(map.subscriber_count("y"), Some(0));
        assert_eq!(watcher.dep_count(), 0);

        map.set("x", 9.0);
        assert_eq!(runs.load(SeqCst), 1);

        watcher.teardown();
        assert!(!watcher.is_active());
    }

    #[test]
    fn getter_errors_route_to_the_sink_and_keep_the_old_value() {
        let map = observed_map(&[("x", 1.0), ("fail", 0.0)]);
        let map_clone = map.clone();
        let watcher = Watcher::new(
            None,
            move || {
                let fail = map_clone.get("fail").and_then(|v| v.as_f64()).unwrap();
                if fail != 0.0 {
                    return Err(Error::msg("getter exploded"));
                }
                Ok(map_clone.get("x").unwrap_or(Value::Null))
            },
            WatcherOptions {
                sync: true,
                user: true,
                ..Default::default()
            },
        );
        assert_eq!(watcher.value(), Value::from(1.0));

        map.set("fail", 1.0);
        // The failed run kept the previous value and the watcher survives.
        assert_eq!(watcher.value(), Value::from(1.0));
        assert!(watcher.is_active());

        // Dependencies collected before the error still fire.
        map.set("fail", 0.0);
        map.set("x", 7.0);
        assert_eq!(watcher.value(), Value::from(7.0));
    }

    #[test]
    fn deep_watcher_subscribes_to_the_whole_subtree() {
        let leaf = Map::new().with("n", 1);
        let root = Map::new().with("child", leaf.clone());
        observe(&Value::Map(root.clone()));
        let runs = Arc::new(AtomicUsize::new(0));
        let runs_clone = runs.clone();
        let root_clone = root.clone();
        let _watcher = Watcher::new(
            None,
            move || {
                runs_clone.fetch_add(1, SeqCst);
                Ok(root_clone.get("child").unwrap_or(Value::Null))
            },
            WatcherOptions {
                sync: true,
                deep: true,
                ..Default::default()
            },
        );
        assert_eq!(runs.load(SeqCst), 1);

        leaf.set("n", 2);
        assert_eq!(runs.load(SeqCst), 2);
    }

    #[test]
    fn inactive_watcher_never_resubscribes() {
        let map = observed_map(&[("x", 1.0)]);
        let map_clone = map.clone();
        let watcher = Watcher::new(
            None,
            move || Ok(map_clone.get("x").unwrap_or(Value::Null)),
            WatcherOptions {
                sync: true,
                ..Default::default()
            },
        );
        watcher.teardown();
        watcher.evaluate();
        assert_eq!(map.subscriber_count("x"), Some(0));
    }
}
