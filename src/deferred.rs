//! One-shot deferred cells.
//!
//! [`Ivar`] is the write side, [`Deferred`] the read side of a cell
//! that is filled at most once. Combinators live outside this crate;
//! the engine needs only enough to express barrier-variable waiting and
//! `upon` continuations: a reader registers a callback with
//! [`Scheduler::upon`](crate::Scheduler::upon), and when the cell is
//! filled each callback is enqueued as a job under the execution
//! context that was current at registration.
//!
//! Cells are scheduler-thread values (`Rc`-shared); cross-thread
//! signaling goes through the external inbox instead.

use std::cell::RefCell;
use std::rc::Rc;

use crate::context::ExecutionContext;
use crate::scheduler::Scheduler;

pub(crate) struct UponEntry<T> {
    pub(crate) context: ExecutionContext,
    pub(crate) callback: Box<dyn FnOnce(&mut Scheduler, T)>,
}

enum CellState<T> {
    Empty { upons: Vec<UponEntry<T>> },
    Full(T),
}

/// The write side of a one-shot cell.
pub struct Ivar<T> {
    cell: Rc<RefCell<CellState<T>>>,
}

/// The read side of a one-shot cell.
pub struct Deferred<T> {
    cell: Rc<RefCell<CellState<T>>>,
}

impl<T> Ivar<T> {
    /// Creates an empty cell.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cell: Rc::new(RefCell::new(CellState::Empty { upons: Vec::new() })),
        }
    }

    /// Returns the read side.
    #[must_use]
    pub fn read(&self) -> Deferred<T> {
        Deferred {
            cell: Rc::clone(&self.cell),
        }
    }

    /// Returns true once the cell has been filled.
    #[must_use]
    pub fn is_full(&self) -> bool {
        matches!(*self.cell.borrow(), CellState::Full(_))
    }

    /// Marks the cell full and takes the registered continuations.
    ///
    /// # Panics
    ///
    /// Panics if the cell was already filled; filling twice is a
    /// programming error.
    pub(crate) fn fill_cell(&self, value: T) -> Vec<UponEntry<T>> {
        let mut state = self.cell.borrow_mut();
        match &mut *state {
            CellState::Full(_) => panic!("ivar filled twice"),
            CellState::Empty { upons } => {
                let taken = std::mem::take(upons);
                *state = CellState::Full(value);
                taken
            }
        }
    }
}

impl<T> Default for Ivar<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Rc::clone(&self.cell),
        }
    }
}

impl<T> Deferred<T> {
    /// Creates an already-determined deferred.
    #[must_use]
    pub fn determined(value: T) -> Self {
        Self {
            cell: Rc::new(RefCell::new(CellState::Full(value))),
        }
    }

    /// Returns true once the cell has been filled.
    #[must_use]
    pub fn is_determined(&self) -> bool {
        matches!(*self.cell.borrow(), CellState::Full(_))
    }

    pub(crate) fn push_upon(&self, entry: UponEntry<T>) {
        match &mut *self.cell.borrow_mut() {
            CellState::Empty { upons } => upons.push(entry),
            CellState::Full(_) => unreachable!("upon registered on a determined deferred"),
        }
    }
}

impl<T: Clone> Deferred<T> {
    /// Returns a copy of the value, if determined.
    #[must_use]
    pub fn peek(&self) -> Option<T> {
        match &*self.cell.borrow() {
            CellState::Full(value) => Some(value.clone()),
            CellState::Empty { .. } => None,
        }
    }
}

impl<T> std::fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = if self.is_determined() {
            "determined"
        } else {
            "empty"
        };
        write!(f, "Deferred({state})")
    }
}

impl<T> std::fmt::Debug for Ivar<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = if self.is_full() { "full" } else { "empty" };
        write!(f, "Ivar({state})")
    }
}
