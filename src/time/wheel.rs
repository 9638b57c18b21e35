//! The alarm store.
//!
//! Maps future instants to alarms; firing an alarm hands its
//! `(context, thunk)` pair back to the scheduler for enqueueing. The
//! store is deterministic: alarms fire ordered by `(deadline,
//! insertion sequence)`, so same-deadline alarms fire in registration
//! order regardless of internal layout.
//!
//! Alarms inserted at or before the current instant land in a "due"
//! bucket rather than the heap; they fire only on an explicit fire
//! pass (`fire_due`) or the next advance. This is what lets the
//! scheduler surface alarms that became due *during* a cycle without
//! moving the clock.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};

use crate::context::ExecutionContext;
use crate::job::JobThunk;
use crate::types::Time;

/// A scheduled alarm: fires by enqueueing its job.
pub(crate) struct Alarm {
    pub(crate) context: ExecutionContext,
    pub(crate) thunk: JobThunk,
    pub(crate) deadline: Time,
}

struct HeapEntry {
    seq: u64,
    alarm: Alarm,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.alarm.deadline == other.alarm.deadline && self.seq == other.seq
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap: earliest deadline first, then insertion order.
        other
            .alarm
            .deadline
            .cmp(&self.alarm.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Deterministic store of pending alarms with an `advance to T`
/// operation and a past-due fire pass.
pub(crate) struct TimingWheel {
    heap: BinaryHeap<HeapEntry>,
    due: VecDeque<Alarm>,
    now: Time,
    next_seq: u64,
}

impl TimingWheel {
    pub(crate) fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            due: VecDeque::new(),
            now: Time::ZERO,
            next_seq: 0,
        }
    }

    pub(crate) fn now(&self) -> Time {
        self.now
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len() + self.due.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.heap.is_empty() && self.due.is_empty()
    }

    /// Inserts an alarm. Deadlines at or before the current instant
    /// join the due bucket and fire on the next fire pass.
    pub(crate) fn insert(&mut self, deadline: Time, context: ExecutionContext, thunk: JobThunk) {
        let alarm = Alarm {
            context,
            thunk,
            deadline,
        };
        if deadline <= self.now {
            self.due.push_back(alarm);
        } else {
            let seq = self.next_seq;
            self.next_seq += 1;
            self.heap.push(HeapEntry { seq, alarm });
        }
    }

    /// The earliest pending deadline, if any. Due-bucket alarms keep
    /// their original (past) deadlines.
    pub(crate) fn next_deadline(&self) -> Option<Time> {
        let due_min = self.due.iter().map(|a| a.deadline).min();
        let heap_min = self.heap.peek().map(|e| e.alarm.deadline);
        match (due_min, heap_min) {
            (Some(d), Some(h)) => Some(d.min(h)),
            (Some(d), None) => Some(d),
            (None, Some(h)) => Some(h),
            (None, None) => None,
        }
    }

    /// Advances the clock to `to` (never backwards) and returns every
    /// alarm with deadline ≤ the new instant, due bucket first, then
    /// heap order.
    pub(crate) fn advance_to(&mut self, to: Time) -> Vec<Alarm> {
        self.now = self.now.max(to);
        self.fire_due()
    }

    /// Fires alarms with deadline ≤ the current instant without moving
    /// the clock.
    pub(crate) fn fire_due(&mut self) -> Vec<Alarm> {
        let mut fired: Vec<Alarm> = self.due.drain(..).collect();
        while let Some(entry) = self.heap.peek() {
            if entry.alarm.deadline > self.now {
                break;
            }
            let Some(entry) = self.heap.pop() else { break };
            fired.push(entry.alarm);
        }
        fired
    }
}

impl std::fmt::Debug for TimingWheel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimingWheel")
            .field("now", &self.now)
            .field("pending", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::Monitor;
    use crate::types::Priority;

    fn insert(wheel: &mut TimingWheel, tag: &'static str, deadline: Time) {
        let ctx = ExecutionContext::new(Monitor::create(tag, None), Priority::Normal);
        wheel.insert(deadline, ctx, Box::new(|_| Ok(())));
    }

    fn tags(alarms: &[Alarm]) -> Vec<String> {
        alarms
            .iter()
            .map(|a| a.context.monitor().name().to_string())
            .collect()
    }

    #[test]
    fn advance_fires_in_deadline_order() {
        let mut wheel = TimingWheel::new();
        insert(&mut wheel, "late", Time::from_millis(30));
        insert(&mut wheel, "early", Time::from_millis(10));
        insert(&mut wheel, "mid", Time::from_millis(20));

        let fired = wheel.advance_to(Time::from_millis(25));
        assert_eq!(tags(&fired), ["early", "mid"]);
        assert_eq!(wheel.len(), 1);
    }

    #[test]
    fn same_deadline_fires_in_insertion_order() {
        let mut wheel = TimingWheel::new();
        let t = Time::from_millis(5);
        insert(&mut wheel, "first", t);
        insert(&mut wheel, "second", t);
        insert(&mut wheel, "third", t);

        let fired = wheel.advance_to(t);
        assert_eq!(tags(&fired), ["first", "second", "third"]);
    }

    #[test]
    fn past_deadline_waits_for_fire_pass() {
        let mut wheel = TimingWheel::new();
        let _ = wheel.advance_to(Time::from_millis(50));

        insert(&mut wheel, "overdue", Time::from_millis(10));
        assert_eq!(wheel.len(), 1);

        let fired = wheel.fire_due();
        assert_eq!(tags(&fired), ["overdue"]);
        assert!(wheel.is_empty());
    }

    #[test]
    fn clock_never_moves_backwards() {
        let mut wheel = TimingWheel::new();
        let _ = wheel.advance_to(Time::from_millis(40));
        let _ = wheel.advance_to(Time::from_millis(10));
        assert_eq!(wheel.now(), Time::from_millis(40));
    }

    #[test]
    fn next_deadline_sees_due_and_heap() {
        let mut wheel = TimingWheel::new();
        assert!(wheel.next_deadline().is_none());

        insert(&mut wheel, "future", Time::from_millis(100));
        assert_eq!(wheel.next_deadline(), Some(Time::from_millis(100)));

        let _ = wheel.advance_to(Time::from_millis(50));
        insert(&mut wheel, "overdue", Time::from_millis(20));
        assert_eq!(wheel.next_deadline(), Some(Time::from_millis(20)));
    }
}
