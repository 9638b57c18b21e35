//! Execution contexts.
//!
//! The execution context is the ambient environment a job runs under:
//! its supervising [`Monitor`], the [`Priority`] band it schedules
//! into, a typed map of local bindings, and whether failures under it
//! capture backtraces. Contexts are immutable values; derivation
//! (`with_*`) produces a new context sharing everything it did not
//! change. The scheduler swaps its current-context slot on entry to
//! each job and restores it on every exit path.
//!
//! Local bindings are keyed by [`LocalKey<T>`]: a process-unique id
//! plus a phantom type, so a lookup can only see values stored under
//! the same key at the same type. Values are stored type-erased and
//! recovered by downcast.

use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::monitor::Monitor;
use crate::types::Priority;

/// Monotonic counter for local-binding keys.
static LOCAL_KEY_COUNTER: AtomicU64 = AtomicU64::new(1);

/// A typed key for context-local bindings.
pub struct LocalKey<T> {
    id: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> LocalKey<T> {
    /// Allocates a fresh key. Two keys never alias, even at the same
    /// type.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: LOCAL_KEY_COUNTER.fetch_add(1, Ordering::Relaxed),
            _marker: PhantomData,
        }
    }
}

impl<T: Send + Sync + 'static> Default for LocalKey<T> {
    fn default() -> Self {
        Self::new()
    }
}

// Keys are plain ids; copying one never duplicates a binding.
impl<T> Clone for LocalKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for LocalKey<T> {}

impl<T> std::fmt::Debug for LocalKey<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LocalKey({})", self.id)
    }
}

type Locals = HashMap<u64, Arc<dyn Any + Send + Sync>>;

struct ContextInner {
    monitor: Monitor,
    priority: Priority,
    locals: Locals,
    backtrace_history: bool,
}

/// The ambient environment a job runs under.
#[derive(Clone)]
pub struct ExecutionContext {
    inner: Arc<ContextInner>,
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("monitor", &self.inner.monitor.name())
            .field("priority", &self.inner.priority)
            .field("locals", &self.inner.locals.len())
            .field("backtrace_history", &self.inner.backtrace_history)
            .finish()
    }
}

impl ExecutionContext {
    /// Creates a context from scratch.
    #[must_use]
    pub fn new(monitor: Monitor, priority: Priority) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                monitor,
                priority,
                locals: HashMap::new(),
                backtrace_history: false,
            }),
        }
    }

    /// The context a fresh scheduler installs as both main and current.
    #[must_use]
    pub(crate) fn main(monitor: Monitor) -> Self {
        Self::new(monitor, Priority::Normal)
    }

    /// The supervising monitor.
    #[must_use]
    pub fn monitor(&self) -> &Monitor {
        &self.inner.monitor
    }

    /// The band jobs under this context schedule into.
    #[must_use]
    pub fn priority(&self) -> Priority {
        self.inner.priority
    }

    /// Whether failures under this context capture backtraces.
    #[must_use]
    pub fn backtrace_history(&self) -> bool {
        self.inner.backtrace_history
    }

    /// Derives a context scheduling into `priority`.
    #[must_use]
    pub fn with_priority(&self, priority: Priority) -> Self {
        self.derive(|inner| inner.priority = priority)
    }

    /// Derives a context supervised by `monitor`.
    #[must_use]
    pub fn with_monitor(&self, monitor: &Monitor) -> Self {
        let monitor = monitor.clone();
        self.derive(move |inner| inner.monitor = monitor)
    }

    /// Derives a context with backtrace capture on or off.
    #[must_use]
    pub fn with_backtrace_history(&self, enabled: bool) -> Self {
        self.derive(|inner| inner.backtrace_history = enabled)
    }

    /// Derives a context with `key` bound to `value`. Other bindings
    /// are unchanged.
    #[must_use]
    pub fn with_local<T: Send + Sync + 'static>(&self, key: &LocalKey<T>, value: T) -> Self {
        self.derive(|inner| {
            inner.locals.insert(key.id, Arc::new(value));
        })
    }

    /// Looks up the binding for `key`, if any.
    #[must_use]
    pub fn find_local<T: Send + Sync + 'static>(&self, key: &LocalKey<T>) -> Option<Arc<T>> {
        self.inner
            .locals
            .get(&key.id)
            .and_then(|value| Arc::clone(value).downcast::<T>().ok())
    }

    /// Returns true if two handles are the same context value.
    #[must_use]
    pub fn ptr_eq(&self, other: &ExecutionContext) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn derive(&self, mutate: impl FnOnce(&mut ContextInner)) -> Self {
        let mut inner = ContextInner {
            monitor: self.inner.monitor.clone(),
            priority: self.inner.priority,
            locals: self.inner.locals.clone(),
            backtrace_history: self.inner.backtrace_history,
        };
        mutate(&mut inner);
        Self {
            inner: Arc::new(inner),
        }
    }
}
