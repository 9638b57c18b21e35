//! Finalizer-to-job bridging.
//!
//! [`Finalized<T>`] wraps a value so that dropping the wrapper — from
//! any thread — submits a callback to the scheduler's external inbox.
//! The drop itself does exactly one thing (the thread-safe handoff);
//! the callback then runs on the scheduler thread, as a `Normal`-band
//! job, under the execution context captured when the finalizer was
//! registered. The value stays reachable from the inbox entry until
//! the callback has run, and the engine drops its reference right
//! after.

use std::ops::Deref;

use crate::context::ExecutionContext;
use crate::inbox::SchedulerHandle;
use crate::scheduler::Scheduler;

type FinalizerFn<T> = Box<dyn FnOnce(&mut Scheduler, &T) + Send>;

struct FinalizerHook<T: Send + 'static> {
    handle: SchedulerHandle,
    context: ExecutionContext,
    callback: FinalizerFn<T>,
}

/// A value with an attached finalizer.
///
/// Created by [`Scheduler::add_finalizer`]. Dereferences to the
/// wrapped value; dropping it triggers the finalizer.
pub struct Finalized<T: Send + 'static> {
    value: Option<T>,
    hook: Option<FinalizerHook<T>>,
}

impl<T: Send + 'static> Finalized<T> {
    pub(crate) fn new(
        value: T,
        handle: SchedulerHandle,
        context: ExecutionContext,
        callback: impl FnOnce(&mut Scheduler, &T) + Send + 'static,
    ) -> Self {
        Self {
            value: Some(value),
            hook: Some(FinalizerHook {
                handle,
                context,
                callback: Box::new(callback),
            }),
        }
    }

    /// Consumes the wrapper without running the finalizer.
    #[must_use]
    pub fn into_inner(mut self) -> T {
        self.hook = None;
        self.value.take().unwrap_or_else(|| unreachable!())
    }
}

impl<T: Send + 'static> Deref for Finalized<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.value
            .as_ref()
            .unwrap_or_else(|| unreachable!("value present until drop"))
    }
}

impl<T: Send + 'static> Drop for Finalized<T> {
    fn drop(&mut self) {
        let (Some(value), Some(hook)) = (self.value.take(), self.hook.take()) else {
            return;
        };
        let callback = hook.callback;
        hook.handle.thread_safe_enqueue_external_job(
            &hook.context,
            move |scheduler, value| {
                callback(scheduler, &value);
                Ok(())
                // `value` drops here: the engine's reference ends once
                // the callback has returned.
            },
            value,
        );
    }
}

impl<T: Send + 'static + std::fmt::Debug> std::fmt::Debug for Finalized<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Finalized").field(&self.value).finish()
    }
}
