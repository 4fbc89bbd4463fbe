//! Error taxonomy and the global error sink.
//!
//! Errors raised inside reactive computations never unwind across the
//! reactive boundary: by the time the scheduler is re-running a watcher
//! there is no caller left to catch anything. Instead every error is
//! funneled into a single process-wide sink that host applications can
//! replace to centralize logging and telemetry. The default sink logs
//! through `tracing`.
//!
//! Invalid mutations (writing a field on a scalar, deleting from a sealed
//! container, growing a root state bag after setup) are a separate, milder
//! category: they are reported on the warning channel at the call site and
//! the mutation becomes a no-op. They never reach the sink.

use std::sync::OnceLock;

use parking_lot::RwLock;

use crate::reactive::WatcherId;

/// Errors surfaced by the reactivity engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A watch expression could not be parsed into a dotted field path.
    #[error("watch path `{0}` is not a dot-delimited field path")]
    InvalidWatchPath(String),

    /// A watcher's getter failed.
    #[error("computation failed: {0}")]
    Computation(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A flush kept re-queueing the same watcher past the cascade cap.
    #[error("update cascade did not settle after {limit} passes; watcher {watcher:?} keeps invalidating itself")]
    CascadeOverflow { watcher: WatcherId, limit: usize },
}

impl Error {
    /// Build a `Computation` error from a plain message.
    pub fn msg(message: impl Into<String>) -> Self {
        let message: String = message.into();
        Error::Computation(message.into())
    }
}

/// Where a routed error came from.
#[derive(Debug, Clone, Copy)]
pub struct ErrorContext {
    /// The watcher whose execution produced the error, if any.
    pub watcher: Option<WatcherId>,
    /// Whether the watcher runs user-supplied code (explicit watch) as
    /// opposed to an internal render computation.
    pub user: bool,
}

type ErrorHook = Box<dyn Fn(&Error, ErrorContext) + Send + Sync>;

static ERROR_HOOK: OnceLock<RwLock<Option<ErrorHook>>> = OnceLock::new();

fn hook_slot() -> &'static RwLock<Option<ErrorHook>> {
    ERROR_HOOK.get_or_init(|| RwLock::new(None))
}

/// Install the process-wide error sink.
///
/// Replaces any previously installed sink.
pub fn set_error_hook(hook: impl Fn(&Error, ErrorContext) + Send + Sync + 'static) {
    *hook_slot().write() = Some(Box::new(hook));
}

/// Remove the installed sink, falling back to `tracing` logging.
pub fn clear_error_hook() {
    *hook_slot().write() = None;
}

/// Route an error to the sink.
pub(crate) fn report_error(error: &Error, context: ErrorContext) {
    let hook = hook_slot().read();
    match hook.as_ref() {
        Some(hook) => hook(error, context),
        None => tracing::error!(
            watcher = ?context.watcher,
            user = context.user,
            error = %error,
            "unhandled error in reactive computation"
        ),
    }
}
