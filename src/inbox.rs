//! Thread-safe external job submission.
//!
//! The external inbox is the engine's only concurrent structure: an
//! unbounded MPSC queue other OS threads and finalizers push work
//! into. The producer side is [`SchedulerHandle`], a cheap `Send +
//! Sync` clone; the consumer side is the scheduler thread, which
//! drains the inbox at each cycle start into the `Normal` band.
//!
//! Every submission also invokes the `thread_safe_external_job_hook`,
//! whose job is to wake a blocked scheduler thread (e.g. via a
//! self-pipe). The hook must be safe and cheap to call from any
//! thread.

use std::sync::Arc;

use crossbeam_queue::SegQueue;
use parking_lot::Mutex;

use crate::context::ExecutionContext;
use crate::error::Result;
use crate::scheduler::Scheduler;

pub(crate) type ExternalThunk = Box<dyn FnOnce(&mut Scheduler) -> Result<()> + Send>;

/// A submission from another thread: runs on the scheduler thread
/// under the supplied context.
pub(crate) struct ExternalJob {
    pub(crate) context: ExecutionContext,
    pub(crate) thunk: ExternalThunk,
}

type ExternalJobHook = Box<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct HandleShared {
    inbox: SegQueue<ExternalJob>,
    hook: Mutex<Option<ExternalJobHook>>,
}

/// A cloneable, thread-safe handle onto a scheduler's external inbox.
#[derive(Clone, Default)]
pub struct SchedulerHandle {
    shared: Arc<HandleShared>,
}

impl SchedulerHandle {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Submits `(ctx, f, arg)` from any thread.
    ///
    /// The thunk runs on the scheduler thread, as a `Normal`-band job
    /// under `ctx`, no later than the start of the next cycle. `arg`
    /// stays reachable from the inbox entry until the thunk has run.
    pub fn thread_safe_enqueue_external_job<A, F>(&self, ctx: &ExecutionContext, f: F, arg: A)
    where
        A: Send + 'static,
        F: FnOnce(&mut Scheduler, A) -> Result<()> + Send + 'static,
    {
        self.shared.inbox.push(ExternalJob {
            context: ctx.clone(),
            thunk: Box::new(move |scheduler| f(scheduler, arg)),
        });
        tracing::trace!("external job submitted");
        if let Some(hook) = &*self.shared.hook.lock() {
            hook();
        }
    }

    /// Number of submissions not yet drained by the scheduler.
    #[must_use]
    pub fn pending_external_jobs(&self) -> usize {
        self.shared.inbox.len()
    }

    pub(crate) fn set_hook(&self, hook: Option<ExternalJobHook>) {
        *self.shared.hook.lock() = hook;
    }

    pub(crate) fn pop(&self) -> Option<ExternalJob> {
        self.shared.inbox.pop()
    }
}

impl std::fmt::Debug for SchedulerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerHandle")
            .field("pending", &self.shared.inbox.len())
            .finish_non_exhaustive()
    }
}
