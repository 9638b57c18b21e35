//! Per-cycle metric streams.
//!
//! Each registration installs a cycle-end pusher feeding an mpsc
//! channel; the receiver side is a [`CycleStream`] — a lazy, infinite,
//! non-restartable sequence with one element per completed cycle.
//! Dropping the stream unregisters the pusher at the next cycle.

use std::sync::mpsc;
use std::time::Duration;

/// Snapshot handed to cycle observers at the end of each cycle.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CycleStats {
    pub(crate) cycle_time: Duration,
    pub(crate) num_jobs: u64,
}

/// A cycle-end pusher. Returns `false` once its stream is gone.
pub(crate) type CycleObserver = Box<dyn FnMut(&CycleStats) -> bool>;

/// A lazy, infinite, non-restartable stream of per-cycle values.
///
/// `next` returns `None` when no new element has been produced yet —
/// the stream itself never ends. Elements accumulate between reads, so
/// a stream read after several cycles yields one element per elapsed
/// cycle. There is deliberately no `Iterator` impl: the iteration
/// protocol treats `None` as terminal, which would silently end a
/// stream that is merely waiting for the next cycle.
#[derive(Debug)]
pub struct CycleStream<T> {
    receiver: mpsc::Receiver<T>,
}

impl<T> CycleStream<T> {
    pub(crate) fn new(receiver: mpsc::Receiver<T>) -> Self {
        Self { receiver }
    }

    /// The next buffered element, if a cycle has produced one.
    pub fn next(&mut self) -> Option<T> {
        self.receiver.try_recv().ok()
    }

    /// All elements produced so far.
    pub fn drain(&mut self) -> Vec<T> {
        std::iter::from_fn(|| self.next()).collect()
    }
}
