//! Per-band FIFO run queue with a per-cycle budget.

use std::collections::VecDeque;

use crate::job::Job;

/// The run queue for one priority band.
///
/// Jobs are strictly FIFO within the band. `jobs_left_this_cycle` is
/// the band's remaining budget; the scheduler resets it at each cycle
/// start and decrements it per dequeue. Setting it to zero from inside
/// a job is the mechanism of `force_current_cycle_to_end`.
#[derive(Debug, Default)]
pub struct JobQueue {
    jobs: VecDeque<Job>,
    jobs_left_this_cycle: usize,
}

impl JobQueue {
    /// Creates an empty queue with a zero budget.
    #[must_use]
    pub fn new() -> Self {
        Self {
            jobs: VecDeque::new(),
            jobs_left_this_cycle: 0,
        }
    }

    /// Appends a job at the back of the band.
    pub fn enqueue(&mut self, job: Job) {
        self.jobs.push_back(job);
    }

    /// Removes and returns the front job.
    pub fn dequeue(&mut self) -> Option<Job> {
        self.jobs.pop_front()
    }

    /// Number of pending jobs in the band.
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Returns true if the band has no pending jobs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Remaining budget for the current cycle.
    #[must_use]
    pub fn jobs_left_this_cycle(&self) -> usize {
        self.jobs_left_this_cycle
    }

    /// Sets the remaining budget for the current cycle.
    pub fn set_jobs_left_this_cycle(&mut self, n: usize) {
        self.jobs_left_this_cycle = n;
    }

    /// True when the band has both a pending job and budget to run it.
    #[must_use]
    pub fn can_run_a_job(&self) -> bool {
        self.jobs_left_this_cycle > 0 && !self.jobs.is_empty()
    }
}
