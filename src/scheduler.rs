//! The scheduler core.
//!
//! One scheduler owns three banded run queues, the time source, the
//! external inbox, the very-low-priority pool, and the execution
//! context slot. `run_cycle` is the engine's heartbeat:
//!
//! 1. `on_start_of_cycle` hook
//! 2. read the wall clock; bump `cycle_count`; record `cycle_start`
//! 3. broadcast `yield` (waiters from the previous cycle run now)
//! 4. snapshot `num_jobs_run`
//! 5. run the `run_every_cycle_start` hooks
//! 6. drain the external inbox; advance the clock (firing due alarms)
//! 7. reset each band's `jobs_left_this_cycle`
//! 8. drain the bands High → Normal → Low within their budgets; a
//!    failing job is delivered to its monitor and the drain continues
//! 9. record cycle statistics; feed the metric streams
//! 10. if quiescent and `yield_until_no_jobs_remain` has waiters,
//!     broadcast it
//! 11. `on_end_of_cycle` hook
//!
//! All execution happens on the thread owning the `Scheduler` value;
//! the only cross-thread surface is the external inbox behind
//! [`SchedulerHandle`]. A process-wide convenience singleton lives in
//! a thread local, reached with [`with_scheduler`]; tests construct
//! explicit `Scheduler` values freely.

use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use crate::bvar::Bvar;
use crate::config::Config;
use crate::context::{ExecutionContext, LocalKey};
use crate::deferred::{Deferred, Ivar, UponEntry};
use crate::error::{Error, ErrorKind, Result};
use crate::finalizer::Finalized;
use crate::inbox::SchedulerHandle;
use crate::job::{Job, JobThunk};
use crate::low_priority::{LowPriorityPool, LowPriorityWorker, StepResult};
use crate::metrics::{CycleObserver, CycleStats, CycleStream};
use crate::monitor::Monitor;
use crate::queue::JobQueue;
use crate::time::source::TimeSource;
use crate::time::ALARM_PRECISION;
use crate::types::{Priority, Time};

type CycleHook = Box<dyn FnMut(&mut Scheduler)>;
type CycleStartHook = Rc<dyn Fn(&mut Scheduler)>;

#[derive(Debug)]
enum WallClock {
    System { origin: Instant },
    Manual { now: Time },
}

/// The cycle-driven job engine.
pub struct Scheduler {
    queues: [JobQueue; Priority::COUNT],
    time_source: TimeSource,
    handle: SchedulerHandle,
    low_priority_pool: LowPriorityPool,

    current_execution_context: ExecutionContext,
    main_execution_context: ExecutionContext,

    cycle_count: u64,
    cycle_start: Time,
    last_cycle_time: Duration,
    last_cycle_num_jobs: u64,
    num_jobs_run: u64,
    job_depth: u32,

    max_num_jobs_per_priority_per_cycle: usize,
    low_priority_step_budget: usize,

    run_every_cycle_start: Vec<CycleStartHook>,
    on_start_of_cycle: Option<CycleHook>,
    on_end_of_cycle: Option<CycleHook>,
    event_added_hook: Option<Box<dyn FnMut(Time)>>,
    job_queued_hook: Option<Box<dyn FnMut(Priority)>>,
    advance_synchronous_wall_clock: Option<Box<dyn FnMut(Time)>>,
    cycle_observers: Vec<CycleObserver>,

    yield_bvar: Bvar,
    yield_until_no_jobs_remain_bvar: Bvar,

    uncaught_exn: Option<Error>,
    check_invariants: bool,
    record_backtraces: bool,
    check_access: Option<Rc<dyn Fn()>>,

    wall_clock: WallClock,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl Scheduler {
    /// Creates a scheduler from a configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let main_context = ExecutionContext::main(Monitor::main());
        let wall_clock = if config.manual_time {
            WallClock::Manual { now: Time::ZERO }
        } else {
            WallClock::System {
                origin: Instant::now(),
            }
        };
        Self {
            queues: std::array::from_fn(|_| JobQueue::new()),
            time_source: TimeSource::new(config.max_alarm_delay),
            handle: SchedulerHandle::new(),
            low_priority_pool: LowPriorityPool::new(),
            current_execution_context: main_context.clone(),
            main_execution_context: main_context,
            cycle_count: 0,
            cycle_start: Time::ZERO,
            last_cycle_time: Duration::ZERO,
            last_cycle_num_jobs: 0,
            num_jobs_run: 0,
            job_depth: 0,
            max_num_jobs_per_priority_per_cycle: config.max_num_jobs_per_priority_per_cycle,
            low_priority_step_budget: config.low_priority_step_budget,
            run_every_cycle_start: Vec::new(),
            on_start_of_cycle: None,
            on_end_of_cycle: None,
            event_added_hook: None,
            job_queued_hook: None,
            advance_synchronous_wall_clock: None,
            cycle_observers: Vec::new(),
            yield_bvar: Bvar::new(),
            yield_until_no_jobs_remain_bvar: Bvar::new(),
            uncaught_exn: None,
            check_invariants: config.check_invariants,
            record_backtraces: config.record_backtraces,
            check_access: None,
            wall_clock,
        }
    }

    // ------------------------------------------------------------------
    // Contexts and monitors
    // ------------------------------------------------------------------

    /// The context installed outside any job.
    #[must_use]
    pub fn main_execution_context(&self) -> &ExecutionContext {
        &self.main_execution_context
    }

    /// The context the running job (or the engine itself) is under.
    #[must_use]
    pub fn current_execution_context(&self) -> &ExecutionContext {
        &self.current_execution_context
    }

    /// The root monitor.
    #[must_use]
    pub fn main_monitor(&self) -> &Monitor {
        self.main_execution_context.monitor()
    }

    /// Runs `f` with `context` installed, restoring the previous
    /// context on every exit path (including an `Err` return from
    /// `f`'s body).
    pub fn with_execution_context<R>(
        &mut self,
        context: &ExecutionContext,
        f: impl FnOnce(&mut Scheduler) -> R,
    ) -> R {
        let previous =
            std::mem::replace(&mut self.current_execution_context, context.clone());
        let result = f(self);
        self.current_execution_context = previous;
        result
    }

    /// Runs `f` under the current context with `key` bound to `value`.
    pub fn with_local<T, R>(
        &mut self,
        key: &LocalKey<T>,
        value: T,
        f: impl FnOnce(&mut Scheduler) -> R,
    ) -> R
    where
        T: Send + Sync + 'static,
    {
        let derived = self.current_execution_context.with_local(key, value);
        self.with_execution_context(&derived, f)
    }

    /// Looks up `key` in the current context.
    #[must_use]
    pub fn find_local<T: Send + Sync + 'static>(&self, key: &LocalKey<T>) -> Option<Arc<T>> {
        self.current_execution_context.find_local(key)
    }

    // ------------------------------------------------------------------
    // Enqueueing
    // ------------------------------------------------------------------

    /// Enqueues `f` as a job under `context`, into the band the
    /// context's priority names.
    pub fn enqueue<F>(&mut self, context: &ExecutionContext, f: F)
    where
        F: FnOnce(&mut Scheduler) + 'static,
    {
        self.enqueue_fallible(context, move |scheduler| {
            f(scheduler);
            Ok(())
        });
    }

    /// Enqueues a fallible job; an `Err` return is delivered to
    /// `context`'s monitor.
    pub fn enqueue_fallible<F>(&mut self, context: &ExecutionContext, f: F)
    where
        F: FnOnce(&mut Scheduler) -> Result<()> + 'static,
    {
        self.consult_check_access();
        self.enqueue_job(Job::new(context.clone(), f));
    }

    /// Enqueues `f` under the current context.
    pub fn schedule<F>(&mut self, f: F)
    where
        F: FnOnce(&mut Scheduler) + 'static,
    {
        let context = self.current_execution_context.clone();
        self.enqueue(&context, f);
    }

    fn enqueue_job(&mut self, job: Job) {
        let band = job.context().priority();
        self.enqueue_job_in_band(band, job);
    }

    fn enqueue_job_in_band(&mut self, band: Priority, job: Job) {
        self.queues[band.index()].enqueue(job);
        self.call_job_queued_hook(band);
    }

    /// A thread-safe handle for submitting work from other threads.
    #[must_use]
    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    // ------------------------------------------------------------------
    // Deferreds and barrier variables
    // ------------------------------------------------------------------

    /// Fills `ivar`, enqueueing every registered `upon` continuation
    /// as a job under the context captured at its registration.
    pub fn fill<T: Clone + 'static>(&mut self, ivar: &Ivar<T>, value: T) {
        for entry in ivar.fill_cell(value.clone()) {
            let v = value.clone();
            let callback = entry.callback;
            self.enqueue_job(Job::new(entry.context, move |scheduler| {
                callback(scheduler, v);
                Ok(())
            }));
        }
    }

    /// Registers `f` to run when `deferred` is determined. If it
    /// already is, `f` is enqueued immediately. The current context is
    /// captured either way.
    pub fn upon<T, F>(&mut self, deferred: &Deferred<T>, f: F)
    where
        T: Clone + 'static,
        F: FnOnce(&mut Scheduler, T) + 'static,
    {
        let context = self.current_execution_context.clone();
        if let Some(value) = deferred.peek() {
            self.enqueue_job(Job::new(context, move |scheduler| {
                f(scheduler, value);
                Ok(())
            }));
        } else {
            deferred.push_upon(UponEntry {
                context,
                callback: Box::new(f),
            });
        }
    }

    /// Determines every waiter registered on `bvar` so far, in
    /// registration order, and clears the waiter set. A broadcast with
    /// no waiters is a no-op.
    pub fn broadcast(&mut self, bvar: &Bvar) {
        for ivar in bvar.take_waiters() {
            self.fill(&ivar, ());
        }
    }

    /// A deferred determined at the start of the next cycle.
    pub fn yield_now(&mut self) -> Deferred<()> {
        self.consult_check_access();
        self.yield_bvar.wait()
    }

    /// A deferred determined at the end of a cycle that leaves every
    /// band empty.
    pub fn yield_until_no_jobs_remain(&mut self) -> Deferred<()> {
        self.consult_check_access();
        self.yield_until_no_jobs_remain_bvar.wait()
    }

    // ------------------------------------------------------------------
    // Alarms and the clock
    // ------------------------------------------------------------------

    /// Registers an alarm at the absolute instant `at`, to run under
    /// the current context. Alarms at or before the current instant
    /// fire on the next fire pass.
    pub fn schedule_alarm<F>(&mut self, at: Time, f: F)
    where
        F: FnOnce(&mut Scheduler) -> Result<()> + 'static,
    {
        self.consult_check_access();
        let context = self.current_execution_context.clone();
        self.time_source.schedule(at, context, Box::new(f));
        self.call_event_added_hook(at);
    }

    /// Registers an alarm `delay` from the current instant. Rejects
    /// delays beyond the configured maximum.
    pub fn schedule_alarm_after<F>(&mut self, delay: Duration, f: F) -> Result<Time>
    where
        F: FnOnce(&mut Scheduler) -> Result<()> + 'static,
    {
        self.consult_check_access();
        let context = self.current_execution_context.clone();
        let deadline = self
            .time_source
            .schedule_after(delay, context, Box::new(f))?;
        self.call_event_added_hook(deadline);
        Ok(deadline)
    }

    /// Moves the logical clock to `to`, enqueueing every alarm that
    /// came due. Keeps the auxiliary wall clock in lockstep.
    pub fn advance_clock(&mut self, to: Time) {
        let before = self.time_source.now();
        let fired = self.time_source.advance(to);
        if !fired.is_empty() {
            tracing::trace!(count = fired.len(), "alarms fired");
        }
        for alarm in fired {
            self.enqueue_job(Job::from_parts(alarm.context, alarm.thunk));
        }
        let now = self.time_source.now();
        if now > before {
            self.call_advance_synchronous_wall_clock(now);
        }
    }

    /// Forces a fire pass without moving the clock: alarms whose
    /// deadline is at or before the current instant are enqueued.
    pub fn fire_past_alarms(&mut self) {
        let fired = self.time_source.fire_past_alarms();
        for alarm in fired {
            self.enqueue_job(Job::from_parts(alarm.context, alarm.thunk));
        }
    }

    /// Advances the manual clock by `by`.
    ///
    /// # Panics
    ///
    /// Panics unless the scheduler was built with
    /// [`Config::manual_time`].
    pub fn advance_time(&mut self, by: Duration) {
        let target = self.wall_clock_now() + by;
        self.advance_time_to(target);
    }

    /// Advances the manual clock to `to` (never backwards).
    ///
    /// # Panics
    ///
    /// Panics unless the scheduler was built with
    /// [`Config::manual_time`].
    pub fn advance_time_to(&mut self, to: Time) {
        match &mut self.wall_clock {
            WallClock::Manual { now } => *now = (*now).max(to),
            WallClock::System { .. } => panic!("advance_time requires manual-time mode"),
        }
    }

    fn wall_clock_now(&self) -> Time {
        match &self.wall_clock {
            WallClock::System { origin } => {
                Time::from_nanos(u64::try_from(origin.elapsed().as_nanos()).unwrap_or(u64::MAX))
            }
            WallClock::Manual { now } => *now,
        }
    }

    // ------------------------------------------------------------------
    // Very-low-priority pool
    // ------------------------------------------------------------------

    /// Adds a cooperative worker to the very-low-priority pool. The
    /// worker's context is the current one at `Low` priority. If the
    /// pool was empty, the pool's driver is scheduled as a `Low`-band
    /// job.
    pub fn enqueue_very_low_priority<F>(&mut self, step: F)
    where
        F: FnMut(&mut Scheduler) -> Result<StepResult> + 'static,
    {
        self.consult_check_access();
        let context = self.current_execution_context.with_priority(Priority::Low);
        let was_empty = self.low_priority_pool.is_empty();
        self.low_priority_pool.push_back(LowPriorityWorker {
            context,
            step: Box::new(step),
        });
        if was_empty {
            let driver_context = self.main_execution_context.with_priority(Priority::Low);
            self.enqueue_job(Job::new(driver_context, run_low_priority_pool));
        }
    }

    /// Number of workers currently in the pool.
    #[must_use]
    pub fn num_very_low_priority_workers(&self) -> usize {
        self.low_priority_pool.len()
    }

    // ------------------------------------------------------------------
    // Finalizers
    // ------------------------------------------------------------------

    /// Wraps `value` so that dropping the wrapper — from any thread —
    /// submits `f` to the external inbox. `f` then runs on the
    /// scheduler thread under the context current right now, with the
    /// value kept alive until it returns.
    pub fn add_finalizer<T, F>(&self, value: T, f: F) -> Finalized<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Scheduler, &T) + Send + 'static,
    {
        Finalized::new(
            value,
            self.handle.clone(),
            self.current_execution_context.clone(),
            f,
        )
    }

    /// Like [`add_finalizer`](Self::add_finalizer), for callers that
    /// want registration to validate its target. Every owned value is
    /// a valid finalization target here, so this delegates directly.
    pub fn add_finalizer_exn<T, F>(&self, value: T, f: F) -> Finalized<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Scheduler, &T) + Send + 'static,
    {
        self.add_finalizer(value, f)
    }

    // ------------------------------------------------------------------
    // Cycles
    // ------------------------------------------------------------------

    /// Runs one cycle.
    pub fn run_cycle(&mut self) {
        self.consult_check_access();
        self.assert_invariants();
        self.run_on_start_of_cycle_hook();

        let now = self.wall_clock_now();
        self.cycle_count += 1;
        self.cycle_start = now;
        tracing::trace!(cycle = self.cycle_count, now = %now, "cycle start");

        let yield_bvar = self.yield_bvar.clone();
        self.broadcast(&yield_bvar);

        let jobs_run_before = self.num_jobs_run;

        let cycle_start_hooks = self.run_every_cycle_start.clone();
        for hook in cycle_start_hooks {
            (*hook)(self);
        }

        self.drain_external_inbox();
        self.advance_clock(now);

        let budget = self.max_num_jobs_per_priority_per_cycle;
        for queue in &mut self.queues {
            queue.set_jobs_left_this_cycle(budget);
        }

        self.drain_job_queues();

        let cycle_end = self.wall_clock_now();
        self.last_cycle_time = cycle_end.duration_since(self.cycle_start);
        self.last_cycle_num_jobs = self.num_jobs_run - jobs_run_before;
        self.notify_cycle_observers();

        if self.yield_until_no_jobs_remain_bvar.has_any_waiters() && self.num_pending_jobs() == 0
        {
            let bvar = self.yield_until_no_jobs_remain_bvar.clone();
            self.broadcast(&bvar);
        }

        tracing::debug!(
            cycle = self.cycle_count,
            jobs = self.last_cycle_num_jobs,
            "cycle end"
        );
        self.run_on_end_of_cycle_hook();
        self.assert_invariants();
    }

    /// Drives cycles until no band has a job and nothing is waiting to
    /// yield, then returns.
    ///
    /// # Errors
    ///
    /// Returns a `Misuse` error when the scheduler is already dead on
    /// entry, and the recorded uncaught error when one was delivered
    /// during driving.
    pub fn run_cycles_until_no_jobs_remain(&mut self) -> Result<()> {
        self.consult_check_access();
        if let Some(err) = &self.uncaught_exn {
            return Err(Error::misuse("scheduler is dead").with_source(err.clone()));
        }
        loop {
            self.run_cycle();
            if self.uncaught_exn.is_some() {
                break;
            }
            let now = self.wall_clock_now();
            self.advance_clock(now);
            self.fire_past_alarms();
            if !self.can_run_a_job() {
                break;
            }
        }
        self.current_execution_context = self.main_execution_context.clone();
        match &self.uncaught_exn {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// Ends the current cycle's `Normal` drain after the running job
    /// returns; pending `Low` jobs still run up to their own budget.
    pub fn force_current_cycle_to_end(&mut self) {
        self.queues[Priority::Normal.index()].set_jobs_left_this_cycle(0);
    }

    fn can_run_a_job(&self) -> bool {
        self.num_pending_jobs() > 0 || self.yield_bvar.has_any_waiters()
    }

    fn drain_external_inbox(&mut self) {
        let mut drained = 0usize;
        while let Some(external) = self.handle.pop() {
            // External work always lands in the Normal band; the
            // supplied context governs everything else about the job.
            let thunk: JobThunk = external.thunk;
            self.enqueue_job_in_band(
                Priority::Normal,
                Job::from_parts(external.context, thunk),
            );
            drained += 1;
        }
        if drained > 0 {
            tracing::trace!(count = drained, "external inbox drained");
        }
    }

    fn drain_job_queues(&mut self) {
        loop {
            let Some(band) = Priority::ALL
                .into_iter()
                .find(|p| self.queues[p.index()].can_run_a_job())
            else {
                break;
            };
            let queue = &mut self.queues[band.index()];
            let left = queue.jobs_left_this_cycle();
            queue.set_jobs_left_this_cycle(left - 1);
            let Some(job) = queue.dequeue() else { continue };
            self.run_job(job);
        }
    }

    fn run_job(&mut self, job: Job) {
        let (context, thunk) = job.into_parts();
        let previous =
            std::mem::replace(&mut self.current_execution_context, context.clone());
        self.job_depth += 1;
        let result = thunk(self);
        self.job_depth -= 1;
        self.current_execution_context = previous;
        self.num_jobs_run += 1;
        if let Err(err) = result {
            self.deliver_error(&context, err);
        }
    }

    fn deliver_error(&mut self, context: &ExecutionContext, err: Error) {
        let err = if self.record_backtraces || context.backtrace_history() {
            err.with_backtrace(Backtrace::force_capture())
        } else {
            err
        };
        tracing::debug!(monitor = context.monitor().name(), error = %err, "job failed");
        if let Some(unhandled) = context.monitor().send_exn(err) {
            let unhandled = unhandled.into_kind(ErrorKind::Uncaught);
            tracing::error!(error = %unhandled, "uncaught error; scheduler is dead");
            if self.uncaught_exn.is_none() {
                self.uncaught_exn = Some(unhandled);
            }
        }
    }

    // ------------------------------------------------------------------
    // Hooks and settings
    // ------------------------------------------------------------------

    /// Replaces the start-of-cycle hook.
    pub fn set_on_start_of_cycle(&mut self, hook: impl FnMut(&mut Scheduler) + 'static) {
        self.on_start_of_cycle = Some(Box::new(hook));
    }

    /// Replaces the end-of-cycle hook.
    pub fn set_on_end_of_cycle(&mut self, hook: impl FnMut(&mut Scheduler) + 'static) {
        self.on_end_of_cycle = Some(Box::new(hook));
    }

    /// Registers a hook run at every cycle start, before the clock
    /// advances. Hooks are prepended: the newest registration runs
    /// first.
    pub fn run_every_cycle_start(&mut self, hook: impl Fn(&mut Scheduler) + 'static) {
        self.run_every_cycle_start.insert(0, Rc::new(hook));
    }

    /// Replaces the hook observing every alarm registration.
    pub fn set_event_added_hook(&mut self, hook: impl FnMut(Time) + 'static) {
        self.event_added_hook = Some(Box::new(hook));
    }

    /// Replaces the hook observing every job enqueue, on every path
    /// (user enqueues, broadcasts, alarms, the inbox drain).
    pub fn set_job_queued_hook(&mut self, hook: impl FnMut(Priority) + 'static) {
        self.job_queued_hook = Some(Box::new(hook));
    }

    /// Replaces the hook invoked on every external submission, from
    /// the submitting thread. Must be thread-safe and cheap; its
    /// purpose is to wake a blocked scheduler thread.
    pub fn set_thread_safe_external_job_hook(&mut self, hook: impl Fn() + Send + Sync + 'static) {
        self.handle.set_hook(Some(Box::new(hook)));
    }

    /// Replaces the callback keeping an auxiliary wall clock in
    /// lockstep with the primary time source.
    pub fn set_advance_synchronous_wall_clock(&mut self, hook: impl FnMut(Time) + 'static) {
        self.advance_synchronous_wall_clock = Some(Box::new(hook));
    }

    /// Sets the per-band per-cycle budget, effective from the next
    /// cycle.
    ///
    /// # Panics
    ///
    /// Panics if `n` is zero.
    pub fn set_max_num_jobs_per_priority_per_cycle(&mut self, n: usize) {
        assert!(n > 0, "per-band budget must be positive");
        self.max_num_jobs_per_priority_per_cycle = n;
        // Lowering the budget applies to the cycle in flight as well.
        for queue in &mut self.queues {
            let left = queue.jobs_left_this_cycle().min(n);
            queue.set_jobs_left_this_cycle(left);
        }
    }

    /// Enables or disables invariant checking at cycle boundaries.
    pub fn set_check_invariants(&mut self, enabled: bool) {
        self.check_invariants = enabled;
    }

    /// Enables or disables backtrace capture on job failure.
    pub fn set_record_backtraces(&mut self, enabled: bool) {
        self.record_backtraces = enabled;
    }

    /// Installs a predicate consulted on every entry point.
    pub fn set_check_access(&mut self, check: impl Fn() + 'static) {
        self.check_access = Some(Rc::new(check));
    }

    /// Installs a `check_access` predicate that panics on any further
    /// entry. There is no way back.
    pub fn make_async_unusable(&mut self) {
        self.check_access = Some(Rc::new(|| {
            panic!("scheduler entry denied: engine was made unusable")
        }));
    }

    // ------------------------------------------------------------------
    // Observables
    // ------------------------------------------------------------------

    /// Number of completed cycles.
    #[must_use]
    pub fn cycle_count(&self) -> u64 {
        self.cycle_count
    }

    /// Wall-clock instant the current (or last) cycle started.
    #[must_use]
    pub fn cycle_start(&self) -> Time {
        self.cycle_start
    }

    /// Duration of the last completed cycle.
    #[must_use]
    pub fn last_cycle_time(&self) -> Duration {
        self.last_cycle_time
    }

    /// Jobs run during the last completed cycle.
    #[must_use]
    pub fn last_cycle_num_jobs(&self) -> u64 {
        self.last_cycle_num_jobs
    }

    /// Jobs run since construction (counting jobs that failed).
    #[must_use]
    pub fn num_jobs_run(&self) -> u64 {
        self.num_jobs_run
    }

    /// Jobs pending across all bands.
    #[must_use]
    pub fn num_pending_jobs(&self) -> usize {
        self.queues.iter().map(JobQueue::len).sum()
    }

    /// Jobs pending in one band.
    #[must_use]
    pub fn num_pending_jobs_in(&self, band: Priority) -> usize {
        self.queues[band.index()].len()
    }

    /// True when some alarm is registered.
    #[must_use]
    pub fn has_upcoming_event(&self) -> bool {
        !self.time_source.is_empty()
    }

    /// The earliest registered alarm deadline.
    #[must_use]
    pub fn next_upcoming_event(&self) -> Option<Time> {
        self.time_source.next_alarm_fires_at()
    }

    /// Resolution of the alarm store.
    #[must_use]
    pub fn event_precision(&self) -> Duration {
        ALARM_PRECISION
    }

    /// The uncaught error, if one has been recorded.
    #[must_use]
    pub fn uncaught_exn(&self) -> Option<&Error> {
        self.uncaught_exn.as_ref()
    }

    /// True once an uncaught error has been recorded.
    #[must_use]
    pub fn is_dead(&self) -> bool {
        self.uncaught_exn.is_some()
    }

    /// A stream producing `f(last_cycle_time)` once per completed
    /// cycle. Lazy, infinite, non-restartable.
    pub fn map_cycle_times<T, F>(&mut self, mut f: F) -> CycleStream<T>
    where
        T: 'static,
        F: FnMut(Duration) -> T + 'static,
    {
        let (tx, rx) = mpsc::channel();
        self.cycle_observers
            .push(Box::new(move |stats| tx.send(f(stats.cycle_time)).is_ok()));
        CycleStream::new(rx)
    }

    /// A stream producing the per-cycle job count once per completed
    /// cycle. Lazy, infinite, non-restartable.
    pub fn cycle_num_jobs(&mut self) -> CycleStream<u64> {
        let (tx, rx) = mpsc::channel();
        self.cycle_observers
            .push(Box::new(move |stats| tx.send(stats.num_jobs).is_ok()));
        CycleStream::new(rx)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn notify_cycle_observers(&mut self) {
        let stats = CycleStats {
            cycle_time: self.last_cycle_time,
            num_jobs: self.last_cycle_num_jobs,
        };
        self.cycle_observers.retain_mut(|observer| observer(&stats));
    }

    fn run_on_start_of_cycle_hook(&mut self) {
        if let Some(mut hook) = self.on_start_of_cycle.take() {
            let outcome = catch_unwind(AssertUnwindSafe(|| hook(self)));
            if self.on_start_of_cycle.is_none() {
                self.on_start_of_cycle = Some(hook);
            }
            if let Err(payload) = outcome {
                self.record_hook_panic("on_start_of_cycle");
                resume_unwind(payload);
            }
        }
    }

    fn run_on_end_of_cycle_hook(&mut self) {
        if let Some(mut hook) = self.on_end_of_cycle.take() {
            let outcome = catch_unwind(AssertUnwindSafe(|| hook(self)));
            if self.on_end_of_cycle.is_none() {
                self.on_end_of_cycle = Some(hook);
            }
            if let Err(payload) = outcome {
                self.record_hook_panic("on_end_of_cycle");
                resume_unwind(payload);
            }
        }
    }

    fn record_hook_panic(&mut self, which: &str) {
        if self.uncaught_exn.is_none() {
            self.uncaught_exn =
                Some(Error::new(ErrorKind::Uncaught).with_context(format!("{which} hook panicked")));
        }
    }

    fn call_job_queued_hook(&mut self, band: Priority) {
        if let Some(mut hook) = self.job_queued_hook.take() {
            let outcome = catch_unwind(AssertUnwindSafe(|| hook(band)));
            if self.job_queued_hook.is_none() {
                self.job_queued_hook = Some(hook);
            }
            if let Err(payload) = outcome {
                self.record_hook_panic("job_queued");
                resume_unwind(payload);
            }
        }
    }

    fn call_event_added_hook(&mut self, deadline: Time) {
        if let Some(mut hook) = self.event_added_hook.take() {
            let outcome = catch_unwind(AssertUnwindSafe(|| hook(deadline)));
            if self.event_added_hook.is_none() {
                self.event_added_hook = Some(hook);
            }
            if let Err(payload) = outcome {
                self.record_hook_panic("event_added");
                resume_unwind(payload);
            }
        }
    }

    fn call_advance_synchronous_wall_clock(&mut self, now: Time) {
        if let Some(mut hook) = self.advance_synchronous_wall_clock.take() {
            let outcome = catch_unwind(AssertUnwindSafe(|| hook(now)));
            if self.advance_synchronous_wall_clock.is_none() {
                self.advance_synchronous_wall_clock = Some(hook);
            }
            if let Err(payload) = outcome {
                self.record_hook_panic("advance_synchronous_wall_clock");
                resume_unwind(payload);
            }
        }
    }

    fn consult_check_access(&self) {
        if let Some(check) = &self.check_access {
            check();
        }
    }

    fn assert_invariants(&self) {
        if !self.check_invariants {
            return;
        }
        for queue in &self.queues {
            assert!(
                queue.jobs_left_this_cycle() <= self.max_num_jobs_per_priority_per_cycle,
                "band budget exceeds configured maximum"
            );
        }
        if self.job_depth == 0 {
            assert!(
                self.current_execution_context
                    .ptr_eq(&self.main_execution_context),
                "current context must be the main context outside a job"
            );
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("cycle_count", &self.cycle_count)
            .field("num_jobs_run", &self.num_jobs_run)
            .field("num_pending_jobs", &self.num_pending_jobs())
            .field("is_dead", &self.is_dead())
            .finish_non_exhaustive()
    }
}

/// The very-low-priority pool driver: steps workers in FIFO order
/// within the slice budget, then yields and re-registers itself.
fn run_low_priority_pool(scheduler: &mut Scheduler) -> Result<()> {
    let mut budget = scheduler.low_priority_step_budget;
    let mut current = scheduler.low_priority_pool.pop_front();
    while let Some(mut worker) = current.take() {
        if budget == 0 {
            // Mid-run worker resumes first in the next slice.
            scheduler.low_priority_pool.push_front(worker);
            break;
        }
        let previous = std::mem::replace(
            &mut scheduler.current_execution_context,
            worker.context.clone(),
        );
        let outcome = (worker.step)(scheduler);
        scheduler.current_execution_context = previous;
        match outcome {
            Ok(StepResult::NotFinished) => {
                budget -= 1;
                current = Some(worker);
            }
            Ok(StepResult::Finished) => {
                current = scheduler.low_priority_pool.pop_front();
            }
            Err(err) => {
                scheduler.deliver_error(&worker.context, err);
                current = scheduler.low_priority_pool.pop_front();
            }
        }
    }
    if !scheduler.low_priority_pool.is_empty() {
        let yielded = scheduler.yield_now();
        scheduler.upon(&yielded, |scheduler, ()| {
            let _ = run_low_priority_pool(scheduler);
        });
    }
    Ok(())
}

/// Returns a stateful callable that resolves immediately for the first
/// `n - 1` invocations and yields on every `n`th; the counter resets
/// after each yield. With `n = 1` every call yields.
///
/// # Panics
///
/// Panics if `n` is zero.
pub fn yield_every(n: usize) -> impl FnMut(&mut Scheduler) -> Deferred<()> {
    assert!(n > 0, "yield_every requires a positive period");
    let mut remaining = n;
    move |scheduler| {
        remaining -= 1;
        if remaining == 0 {
            remaining = n;
            scheduler.yield_now()
        } else {
            Deferred::determined(())
        }
    }
}

thread_local! {
    static CURRENT_SCHEDULER: RefCell<Option<Scheduler>> = const { RefCell::new(None) };
}

/// Runs `f` against this thread's scheduler, constructing a default
/// one on first use.
///
/// # Panics
///
/// Panics on re-entrant use; jobs already receive `&mut Scheduler`.
pub fn with_scheduler<R>(f: impl FnOnce(&mut Scheduler) -> R) -> R {
    CURRENT_SCHEDULER.with(|slot| {
        let mut slot = slot.borrow_mut();
        let scheduler = slot.get_or_insert_with(Scheduler::default);
        f(scheduler)
    })
}

/// Replaces this thread's scheduler with a freshly constructed one.
/// Pre-existing handles onto the old scheduler are orphaned, not torn
/// down.
pub fn reset_in_forked_process() {
    CURRENT_SCHEDULER.with(|slot| {
        *slot.borrow_mut() = Some(Scheduler::default());
    });
}
