//! The synchronous time source.
//!
//! Wraps the alarm store with the two operations the scheduler drives
//! it with: `advance`, which moves the logical clock to a wall-clock
//! instant and fires everything that came due, and
//! `fire_past_alarms`, which fires due alarms without moving the
//! clock. Alarm durations are validated upfront against a configured
//! maximum.

use std::time::Duration;

use crate::context::ExecutionContext;
use crate::error::{Error, ErrorKind};
use crate::job::JobThunk;
use crate::time::wheel::{Alarm, TimingWheel};
use crate::types::Time;

/// The alarm store resolves instants exactly.
pub const ALARM_PRECISION: Duration = Duration::from_nanos(1);

/// Error returned when an alarm delay exceeds the configured maximum.
#[derive(Debug, Clone, thiserror::Error)]
#[error("alarm delay {delay:?} exceeds maximum allowed delay {max:?}")]
pub struct AlarmDelayExceeded {
    /// The requested delay.
    pub delay: Duration,
    /// The maximum allowed delay.
    pub max: Duration,
}

impl From<AlarmDelayExceeded> for Error {
    fn from(e: AlarmDelayExceeded) -> Self {
        Self::new(ErrorKind::AlarmTooFar)
            .with_context(e.to_string())
            .with_source(e)
    }
}

/// A synchronous time source driven from wall-clock advancement.
#[derive(Debug)]
pub(crate) struct TimeSource {
    wheel: TimingWheel,
    max_alarm_delay: Duration,
}

impl TimeSource {
    pub(crate) fn new(max_alarm_delay: Duration) -> Self {
        Self {
            wheel: TimingWheel::new(),
            max_alarm_delay,
        }
    }

    pub(crate) fn now(&self) -> Time {
        self.wheel.now()
    }

    /// Registers an alarm at an absolute instant.
    pub(crate) fn schedule(&mut self, at: Time, context: ExecutionContext, thunk: JobThunk) {
        self.wheel.insert(at, context, thunk);
    }

    /// Registers an alarm `delay` from now; rejects delays beyond the
    /// configured maximum. Returns the absolute deadline.
    pub(crate) fn schedule_after(
        &mut self,
        delay: Duration,
        context: ExecutionContext,
        thunk: JobThunk,
    ) -> Result<Time, AlarmDelayExceeded> {
        if delay > self.max_alarm_delay {
            return Err(AlarmDelayExceeded {
                delay,
                max: self.max_alarm_delay,
            });
        }
        let deadline = self.wheel.now() + delay;
        self.wheel.insert(deadline, context, thunk);
        Ok(deadline)
    }

    /// Moves the logical clock to `to` and returns the fired alarms.
    pub(crate) fn advance(&mut self, to: Time) -> Vec<Alarm> {
        self.wheel.advance_to(to)
    }

    /// Fires due alarms without moving the clock.
    pub(crate) fn fire_past_alarms(&mut self) -> Vec<Alarm> {
        self.wheel.fire_due()
    }

    pub(crate) fn next_alarm_fires_at(&self) -> Option<Time> {
        self.wheel.next_deadline()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.wheel.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.wheel.len()
    }
}
