//! Barrier variables.
//!
//! A [`Bvar`] is a one-shot broadcast: `wait` registers a fresh waiter
//! and returns its deferred; `Scheduler::broadcast` determines every
//! waiter registered so far, in registration order, and clears the
//! set. The engine's `yield` and `yield_until_no_jobs_remain` are both
//! bvars. A broadcast with no waiters is a no-op, so repeated
//! broadcasts without intervening waits are idempotent.

use std::cell::RefCell;
use std::rc::Rc;

use crate::deferred::{Deferred, Ivar};

/// A one-shot broadcast variable.
#[derive(Debug, Clone, Default)]
pub struct Bvar {
    waiters: Rc<RefCell<Vec<Ivar<()>>>>,
}

impl Bvar {
    /// Creates a bvar with no waiters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fresh waiter and returns its deferred, which
    /// becomes determined at the next broadcast.
    #[must_use]
    pub fn wait(&self) -> Deferred<()> {
        let ivar = Ivar::new();
        let deferred = ivar.read();
        self.waiters.borrow_mut().push(ivar);
        deferred
    }

    /// O(1) predicate: is anyone waiting?
    #[must_use]
    pub fn has_any_waiters(&self) -> bool {
        !self.waiters.borrow().is_empty()
    }

    /// Takes the current waiter set, in registration order.
    pub(crate) fn take_waiters(&self) -> Vec<Ivar<()>> {
        std::mem::take(&mut *self.waiters.borrow_mut())
    }
}
