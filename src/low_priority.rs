//! Very-low-priority cooperative workers.
//!
//! Workers run in bounded slices between yields: the pool's driver (a
//! `Low`-band job) steps each worker until it finishes or the slice
//! budget runs out, then yields and re-registers itself. Each worker
//! therefore makes bounded progress per cycle and the pool never
//! starves higher-priority work.

use std::collections::VecDeque;

use crate::context::ExecutionContext;
use crate::error::Result;
use crate::scheduler::Scheduler;

/// Outcome of one worker step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResult {
    /// The worker is done and leaves the pool.
    Finished,
    /// The worker wants another step.
    NotFinished,
}

pub(crate) type WorkerStep = Box<dyn FnMut(&mut Scheduler) -> Result<StepResult>>;

pub(crate) struct LowPriorityWorker {
    pub(crate) context: ExecutionContext,
    pub(crate) step: WorkerStep,
}

/// FIFO deque of cooperative workers, owned by the scheduler core.
#[derive(Default)]
pub(crate) struct LowPriorityPool {
    workers: VecDeque<LowPriorityWorker>,
}

impl LowPriorityPool {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.workers.len()
    }

    pub(crate) fn push_back(&mut self, worker: LowPriorityWorker) {
        self.workers.push_back(worker);
    }

    /// A mid-run worker goes back to the front so it resumes first in
    /// the next slice.
    pub(crate) fn push_front(&mut self, worker: LowPriorityWorker) {
        self.workers.push_front(worker);
    }

    pub(crate) fn pop_front(&mut self) -> Option<LowPriorityWorker> {
        self.workers.pop_front()
    }
}

impl std::fmt::Debug for LowPriorityPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LowPriorityPool")
            .field("workers", &self.workers.len())
            .finish_non_exhaustive()
    }
}
