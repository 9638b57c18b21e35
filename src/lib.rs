//! Camshaft: a cycle-driven cooperative job engine.
//!
//! # Overview
//!
//! Camshaft advances user-level jobs to completion on a single OS
//! thread. Work enters through priority-banded run queues, a
//! thread-safe external inbox, alarm firings from a synchronous time
//! source, and finalizer drops; the scheduler drains it in cycles,
//! band by band, within per-band budgets. Failures never unwind the
//! loop: a failing job's error is delivered to its execution context's
//! monitor, and only an error no monitor handles ends top-level
//! driving.
//!
//! # Core Guarantees
//!
//! - **Strict band order**: a pending `High` job always runs before a
//!   pending `Normal`, a `Normal` before a `Low`
//! - **FIFO within a band**: jobs are never reordered
//! - **Failure isolation**: a job's `Err` reaches its monitor; the
//!   cycle continues
//! - **Bounded cycles**: each band runs at most
//!   `max_num_jobs_per_priority_per_cycle` jobs per cycle
//! - **Single-threaded execution**: every job runs on the scheduler
//!   thread; other threads only submit through the external inbox
//!
//! # Module Structure
//!
//! - [`types`]: instants and priority bands
//! - [`config`]: engine configuration
//! - [`context`]: execution contexts and typed locals
//! - [`monitor`]: supervisor tree receiving job failures
//! - [`job`] / [`queue`]: the unit of scheduling and the banded queues
//! - [`deferred`] / [`bvar`]: one-shot cells and barrier broadcast
//! - [`inbox`]: thread-safe external submission
//! - [`finalizer`]: drop-to-job bridging
//! - [`time`]: alarms and the synchronous clock
//! - [`low_priority`]: cooperative very-low-priority workers
//! - [`scheduler`]: the cycle loop that owns all of the above
//! - [`metrics`]: per-cycle metric streams
//! - [`error`]: error types

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]

pub mod bvar;
pub mod config;
pub mod context;
pub mod deferred;
pub mod error;
pub mod finalizer;
pub mod inbox;
pub mod job;
pub mod low_priority;
pub mod metrics;
pub mod monitor;
pub mod queue;
pub mod scheduler;
pub mod time;
pub mod types;

pub use bvar::Bvar;
pub use config::Config;
pub use context::{ExecutionContext, LocalKey};
pub use deferred::{Deferred, Ivar};
pub use error::{Error, ErrorKind, Result, ResultExt};
pub use finalizer::Finalized;
pub use inbox::SchedulerHandle;
pub use job::Job;
pub use low_priority::StepResult;
pub use metrics::CycleStream;
pub use monitor::Monitor;
pub use scheduler::{reset_in_forked_process, with_scheduler, yield_every, Scheduler};
pub use time::{AlarmDelayExceeded, ALARM_PRECISION};
pub use types::{Priority, Time};
