//! Engine configuration.
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `max_num_jobs_per_priority_per_cycle` | 500 |
//! | `check_invariants` | false |
//! | `record_backtraces` | false |
//! | `manual_time` | false (system clock) |
//! | `low_priority_step_budget` | 1000 |
//! | `max_alarm_delay` | 7 days |

use std::time::Duration;

/// Configuration for a scheduler.
#[derive(Debug, Clone)]
pub struct Config {
    /// Per-band budget: how many jobs each priority band may run in
    /// one cycle. Must be positive.
    pub max_num_jobs_per_priority_per_cycle: usize,
    /// Check internal invariants at cycle boundaries.
    pub check_invariants: bool,
    /// Capture a backtrace whenever a job fails.
    pub record_backtraces: bool,
    /// Drive the clock manually (`advance_time*`) instead of from the
    /// system clock. Tests use this for determinism.
    pub manual_time: bool,
    /// Steps the very-low-priority pool may take per slice before
    /// yielding.
    pub low_priority_step_budget: usize,
    /// Maximum delay accepted by `schedule_alarm_after`.
    pub max_alarm_delay: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_num_jobs_per_priority_per_cycle: 500,
            check_invariants: false,
            record_backtraces: false,
            manual_time: false,
            low_priority_step_budget: 1000,
            max_alarm_delay: Duration::from_secs(604_800), // 7 days
        }
    }
}

impl Config {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the per-band per-cycle job budget.
    ///
    /// # Panics
    ///
    /// Panics if `n` is zero.
    #[must_use]
    pub fn max_num_jobs_per_priority_per_cycle(mut self, n: usize) -> Self {
        assert!(n > 0, "per-band budget must be positive");
        self.max_num_jobs_per_priority_per_cycle = n;
        self
    }

    /// Enables invariant checking at cycle boundaries.
    #[must_use]
    pub fn check_invariants(mut self, enabled: bool) -> Self {
        self.check_invariants = enabled;
        self
    }

    /// Enables backtrace capture on job failure.
    #[must_use]
    pub fn record_backtraces(mut self, enabled: bool) -> Self {
        self.record_backtraces = enabled;
        self
    }

    /// Switches to a manually advanced clock.
    #[must_use]
    pub fn manual_time(mut self) -> Self {
        self.manual_time = true;
        self
    }

    /// Sets the very-low-priority slice budget.
    ///
    /// # Panics
    ///
    /// Panics if `n` is zero.
    #[must_use]
    pub fn low_priority_step_budget(mut self, n: usize) -> Self {
        assert!(n > 0, "slice budget must be positive");
        self.low_priority_step_budget = n;
        self
    }

    /// Sets the maximum accepted alarm delay.
    #[must_use]
    pub fn max_alarm_delay(mut self, max: Duration) -> Self {
        self.max_alarm_delay = max;
        self
    }
}
