//! Supervisor monitors.
//!
//! A monitor is a node in a supervision tree. Every execution context
//! names a monitor; when a job running under that context fails, the
//! error is delivered to the monitor with [`Monitor::send_exn`]. Each
//! monitor consults its handler list; a handler returning `true`
//! consumes the error, otherwise delivery forwards to the parent. An
//! error that reaches the root unhandled is returned to the scheduler,
//! which records it as the uncaught error and goes dead.
//!
//! Monitors are cheap `Arc`-shared handles; cloning shares the node.
//! Handler lists may be mutated from any thread, but handlers themselves
//! only run on the scheduler thread during error delivery.
//!
//! # Example
//!
//! ```rust,ignore
//! let worker = Monitor::create("worker", Some(scheduler.main_monitor()));
//! worker.on_error(|err| {
//!     eprintln!("worker failed: {err}");
//!     true // handled; does not reach the root
//! });
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Error;

/// Monotonic counter for monitor identifiers.
static MONITOR_COUNTER: AtomicU64 = AtomicU64::new(1);

/// An error handler. Returns `true` when the error is consumed.
type ErrorHandler = Arc<dyn Fn(&Error) -> bool + Send + Sync>;

#[derive(Debug)]
struct MonitorInner {
    id: u64,
    name: String,
    parent: Option<Monitor>,
    handlers: Mutex<Vec<HandlerEntry>>,
}

struct HandlerEntry {
    handler: ErrorHandler,
}

impl std::fmt::Debug for HandlerEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerEntry").finish_non_exhaustive()
    }
}

/// A node in the supervision tree.
#[derive(Debug, Clone)]
pub struct Monitor {
    inner: Arc<MonitorInner>,
}

impl Monitor {
    /// Creates a monitor, optionally attached to a parent.
    ///
    /// A monitor with no parent is detached: errors it does not handle
    /// become uncaught immediately.
    #[must_use]
    pub fn create(name: impl Into<String>, parent: Option<&Monitor>) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                id: MONITOR_COUNTER.fetch_add(1, Ordering::Relaxed),
                name: name.into(),
                parent: parent.cloned(),
                handlers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// The root monitor a fresh scheduler starts with.
    #[must_use]
    pub(crate) fn main() -> Self {
        Self::create("main", None)
    }

    /// Returns the monitor's unique identifier.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Returns the monitor's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns the parent, if attached.
    #[must_use]
    pub fn parent(&self) -> Option<&Monitor> {
        self.inner.parent.as_ref()
    }

    /// Installs an error handler. Handlers run in installation order;
    /// the first to return `true` consumes the error.
    pub fn on_error(&self, handler: impl Fn(&Error) -> bool + Send + Sync + 'static) {
        self.inner.handlers.lock().push(HandlerEntry {
            handler: Arc::new(handler),
        });
    }

    /// Returns true if two handles name the same node.
    #[must_use]
    pub fn ptr_eq(&self, other: &Monitor) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Delivers an error to this monitor.
    ///
    /// Walks from this node to the root, consulting each handler list.
    /// Returns `None` when some handler consumed the error, otherwise
    /// the error comes back for the scheduler to record as uncaught.
    #[must_use]
    pub fn send_exn(&self, err: Error) -> Option<Error> {
        let mut node = Some(self.clone());
        while let Some(monitor) = node {
            if monitor.try_handle(&err) {
                return None;
            }
            node = monitor.parent().cloned();
        }
        Some(err)
    }

    fn try_handle(&self, err: &Error) -> bool {
        // Snapshot the handlers so one may install another mid-delivery.
        let handlers: Vec<ErrorHandler> = self
            .inner
            .handlers
            .lock()
            .iter()
            .map(|entry| Arc::clone(&entry.handler))
            .collect();
        handlers.iter().any(|handler| handler(err))
    }
}

impl std::fmt::Display for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Monitor({}#{})", self.inner.name, self.inner.id)
    }
}
