//! The unit of scheduling: a `(context, thunk)` pair.

use crate::context::ExecutionContext;
use crate::error::Result;
use crate::scheduler::Scheduler;

/// A job's body. Jobs receive the engine explicitly and report failure
/// by returning `Err`; the scheduler delivers the error to the job's
/// monitor and keeps cycling.
pub type JobThunk = Box<dyn FnOnce(&mut Scheduler) -> Result<()>>;

/// A runnable unit: an [`ExecutionContext`] and a thunk.
pub struct Job {
    context: ExecutionContext,
    thunk: JobThunk,
}

impl Job {
    /// Creates a job running `thunk` under `context`.
    #[must_use]
    pub fn new<F>(context: ExecutionContext, thunk: F) -> Self
    where
        F: FnOnce(&mut Scheduler) -> Result<()> + 'static,
    {
        Self {
            context,
            thunk: Box::new(thunk),
        }
    }

    /// The context the job will run under.
    #[must_use]
    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub(crate) fn from_parts(context: ExecutionContext, thunk: JobThunk) -> Self {
        Self { context, thunk }
    }

    pub(crate) fn into_parts(self) -> (ExecutionContext, JobThunk) {
        (self.context, self.thunk)
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("priority", &self.context.priority())
            .field("monitor", &self.context.monitor().name())
            .finish_non_exhaustive()
    }
}
