//! The explicit watch API.
//!
//! [`watch`] observes an arbitrary getter; [`watch_path`] observes a
//! dot-delimited field path rooted at a value. Both fire a completion
//! callback with `(new, old)` when the watched value changes, and return
//! the watcher handle so callers can tear the subscription down.

use std::sync::Arc;

use crate::error::Error;
use crate::observe::Value;

use super::scope::Scope;
use super::watcher::{CallbackFn, GetterFn, Watcher, WatcherOptions};

/// Options accepted by the watch API.
#[derive(Clone, Copy, Default)]
pub struct WatchOptions {
    /// Subscribe to everything reachable from the watched value.
    pub deep: bool,
    /// Fire synchronously on invalidation instead of batching.
    pub sync: bool,
    /// Invoke the callback once immediately with the initial value.
    pub immediate: bool,
}

/// Watch a getter expression.
pub fn watch<F, C>(scope: Option<&Scope>, getter: F, callback: C, options: WatchOptions) -> Watcher
where
    F: Fn() -> Result<Value, Error> + Send + Sync + 'static,
    C: Fn(&Value, &Value) + Send + Sync + 'static,
{
    build_watch(scope, Arc::new(getter), Arc::new(callback), options)
}

/// Watch a dot-delimited field path under `root`.
///
/// An unparseable path is reported on the warning channel; the returned
/// watcher then has a no-op getter, collects no dependencies, and never
/// re-runs.
pub fn watch_path<C>(
    scope: Option<&Scope>,
    root: &Value,
    path: &str,
    callback: C,
    options: WatchOptions,
) -> Watcher
where
    C: Fn(&Value, &Value) + Send + Sync + 'static,
{
    let getter: Arc<GetterFn> = match parse_path(path) {
        Ok(segments) => {
            let root = root.clone();
            Arc::new(move || Ok(resolve_path(&root, &segments)))
        }
        Err(error) => {
            tracing::warn!(
                path,
                %error,
                "watch only accepts dot-delimited field paths; using a no-op getter"
            );
            Arc::new(|| Ok(Value::Null))
        }
    };
    build_watch(scope, getter, Arc::new(callback), options)
}

fn build_watch(
    scope: Option<&Scope>,
    getter: Arc<GetterFn>,
    callback: Arc<CallbackFn>,
    options: WatchOptions,
) -> Watcher {
    let watcher = Watcher::build(
        scope,
        getter,
        Some(Arc::clone(&callback)),
        WatcherOptions {
            user: true,
            deep: options.deep,
            sync: options.sync,
            ..Default::default()
        },
    );
    if options.immediate {
        let initial = watcher.value();
        callback(&initial, &Value::Null);
    }
    watcher
}

/// Split a watch expression into path segments.
///
/// Accepts identifiers made of alphanumerics, `_`, and `$`, joined by
/// dots; anything else is rejected.
pub fn parse_path(path: &str) -> Result<Vec<String>, Error> {
    let valid = !path.is_empty()
        && path
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$' || c == '.')
        && path.split('.').all(|segment| !segment.is_empty());
    if !valid {
        return Err(Error::InvalidWatchPath(path.to_string()));
    }
    Ok(path.split('.').map(str::to_owned).collect())
}

/// Walk `segments` down from `root` through the tracked accessors.
/// Missing or non-container intermediates resolve to null.
fn resolve_path(root: &Value, segments: &[String]) -> Value {
    let mut current = root.clone();
    for segment in segments {
        let next = match &current {
            Value::Map(map) => map.get(segment),
            Value::Seq(seq) => segment
                .parse::<usize>()
                .ok()
                .and_then(|index| seq.get(index)),
            _ => None,
        };
        match next {
            Some(value) => current = value,
            None => return Value::Null,
        }
    }
    current
}
