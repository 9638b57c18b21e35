//! Alarms, cycle hooks, metric streams, and the low-priority pool.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use camshaft::{Config, Monitor, Priority, Scheduler, StepResult, Time};

fn manual() -> Scheduler {
    Scheduler::new(Config::new().manual_time().check_invariants(true))
}

#[test]
fn alarms_fire_in_deadline_order_when_time_advances() {
    let mut s = manual();
    let log: Rc<RefCell<Vec<&'static str>>> = Rc::default();

    for (tag, at) in [("second", 20u64), ("first", 10), ("third", 30)] {
        let log = Rc::clone(&log);
        s.schedule_alarm(Time::from_millis(at), move |_| {
            log.borrow_mut().push(tag);
            Ok(())
        });
    }

    s.advance_time(Duration::from_millis(25));
    s.run_cycle();
    assert_eq!(*log.borrow(), ["first", "second"]);
    assert!(s.has_upcoming_event());

    s.advance_time(Duration::from_millis(10));
    s.run_cycle();
    assert_eq!(*log.borrow(), ["first", "second", "third"]);
    assert!(!s.has_upcoming_event());
}

#[test]
fn alarm_scheduled_in_the_past_fires_between_cycles() {
    let mut s = manual();
    s.advance_time(Duration::from_millis(50));
    let ran: Rc<RefCell<bool>> = Rc::default();

    let ctx = s.main_execution_context().clone();
    {
        let ran = Rc::clone(&ran);
        s.enqueue(&ctx, move |s| {
            let ran = Rc::clone(&ran);
            // Deadline already behind the clock: surfaces only via the
            // fire pass between cycles.
            s.schedule_alarm(Time::from_millis(10), move |_| {
                *ran.borrow_mut() = true;
                Ok(())
            });
        });
    }

    s.run_cycles_until_no_jobs_remain().expect("no failures");
    assert!(*ran.borrow());
}

#[test]
fn schedule_alarm_after_lands_relative_to_the_clock() {
    let mut s = manual();
    s.advance_time(Duration::from_millis(100));
    s.run_cycle(); // moves the time source to 100ms

    let deadline = s
        .schedule_alarm_after(Duration::from_millis(40), |_| Ok(()))
        .expect("in range");
    assert_eq!(deadline, Time::from_millis(140));
    assert_eq!(s.next_upcoming_event(), Some(deadline));
}

#[test]
fn auxiliary_wall_clock_stays_in_lockstep() {
    let mut s = manual();
    let seen: Rc<RefCell<Vec<Time>>> = Rc::default();
    {
        let seen = Rc::clone(&seen);
        s.set_advance_synchronous_wall_clock(move |now| seen.borrow_mut().push(now));
    }

    s.run_cycle(); // clock still at zero: no advancement, no callback
    assert!(seen.borrow().is_empty());

    s.advance_time(Duration::from_millis(7));
    s.run_cycle();
    assert_eq!(*seen.borrow(), [Time::from_millis(7)]);
}

#[test]
fn event_added_hook_sees_every_registration() {
    let mut s = manual();
    let deadlines: Rc<RefCell<Vec<Time>>> = Rc::default();
    {
        let deadlines = Rc::clone(&deadlines);
        s.set_event_added_hook(move |at| deadlines.borrow_mut().push(at));
    }
    s.schedule_alarm(Time::from_millis(3), |_| Ok(()));
    let _ = s.schedule_alarm_after(Duration::from_millis(5), |_| Ok(()));
    assert_eq!(
        *deadlines.borrow(),
        [Time::from_millis(3), Time::from_millis(5)]
    );
}

#[test]
fn cycle_hooks_wrap_the_cycle() {
    let mut s = manual();
    let log: Rc<RefCell<Vec<&'static str>>> = Rc::default();
    {
        let log = Rc::clone(&log);
        s.set_on_start_of_cycle(move |_| log.borrow_mut().push("start"));
    }
    {
        let log = Rc::clone(&log);
        s.set_on_end_of_cycle(move |_| log.borrow_mut().push("end"));
    }
    let ctx = s.main_execution_context().clone();
    {
        let log = Rc::clone(&log);
        s.enqueue(&ctx, move |_| log.borrow_mut().push("job"));
    }

    s.run_cycle();
    assert_eq!(*log.borrow(), ["start", "job", "end"]);
}

#[test]
fn run_every_cycle_start_runs_newest_first() {
    let mut s = manual();
    let log: Rc<RefCell<Vec<&'static str>>> = Rc::default();
    {
        let log = Rc::clone(&log);
        s.run_every_cycle_start(move |_| log.borrow_mut().push("older"));
    }
    {
        let log = Rc::clone(&log);
        s.run_every_cycle_start(move |_| log.borrow_mut().push("newer"));
    }

    s.run_cycle();
    assert_eq!(*log.borrow(), ["newer", "older"]);
}

#[test]
fn metric_streams_produce_one_element_per_cycle() {
    let mut s = manual();
    let mut times = s.map_cycle_times(|d| d);
    let mut counts = s.cycle_num_jobs();

    let ctx = s.main_execution_context().clone();
    for _ in 0..3 {
        s.enqueue(&ctx, |_| {});
    }
    s.run_cycle();
    s.enqueue(&ctx, |_| {});
    s.run_cycle();

    assert_eq!(counts.drain(), vec![3, 1]);
    assert_eq!(times.drain().len(), 2);
    assert_eq!(counts.next(), None, "no element until the next cycle");
}

#[test]
fn low_priority_pool_slices_by_budget() {
    let mut s = Scheduler::new(
        Config::new()
            .manual_time()
            .low_priority_step_budget(3)
            .check_invariants(true),
    );
    let step_cycles: Rc<RefCell<Vec<u64>>> = Rc::default();
    {
        let step_cycles = Rc::clone(&step_cycles);
        let mut remaining = 5u32;
        s.enqueue_very_low_priority(move |s| {
            step_cycles.borrow_mut().push(s.cycle_count());
            remaining -= 1;
            Ok(if remaining == 0 {
                StepResult::Finished
            } else {
                StepResult::NotFinished
            })
        });
    }

    s.run_cycles_until_no_jobs_remain().expect("no failures");
    let cycles = step_cycles.borrow();
    assert_eq!(cycles.len(), 5);
    assert_eq!(
        &cycles[..3],
        &[cycles[0]; 3],
        "first slice takes the budgeted three steps"
    );
    assert!(
        cycles[3] > cycles[0],
        "remaining steps run after a yield, in a later cycle"
    );
    assert_eq!(s.num_very_low_priority_workers(), 0);
}

#[test]
fn low_priority_workers_run_fifo() {
    let mut s = manual();
    let log: Rc<RefCell<Vec<&'static str>>> = Rc::default();
    for tag in ["w1", "w2"] {
        let log = Rc::clone(&log);
        s.enqueue_very_low_priority(move |_| {
            log.borrow_mut().push(tag);
            Ok(StepResult::Finished)
        });
    }

    s.run_cycles_until_no_jobs_remain().expect("no failures");
    assert_eq!(*log.borrow(), ["w1", "w2"]);
}

#[test]
fn failing_worker_is_discarded_and_the_pool_continues() {
    let mut s = manual();
    let supervised = Monitor::create("pool", Some(s.main_monitor()));
    supervised.on_error(|_| true);
    let ctx = s.main_execution_context().with_monitor(&supervised);

    let log: Rc<RefCell<Vec<&'static str>>> = Rc::default();
    s.with_execution_context(&ctx, |s| {
        {
            let log = Rc::clone(&log);
            s.enqueue_very_low_priority(move |_| {
                log.borrow_mut().push("bad");
                Err(camshaft::Error::job_failure("worker died"))
            });
        }
        let log = Rc::clone(&log);
        s.enqueue_very_low_priority(move |_| {
            log.borrow_mut().push("good");
            Ok(StepResult::Finished)
        });
    });

    s.run_cycles_until_no_jobs_remain()
        .expect("handled by the pool monitor");
    assert_eq!(*log.borrow(), ["bad", "good"]);
    assert!(!s.is_dead());
}

#[test]
fn worker_context_is_low_priority() {
    let mut s = manual();
    let observed: Rc<RefCell<Option<Priority>>> = Rc::default();
    {
        let observed = Rc::clone(&observed);
        s.enqueue_very_low_priority(move |s| {
            *observed.borrow_mut() = Some(s.current_execution_context().priority());
            Ok(StepResult::Finished)
        });
    }
    s.run_cycles_until_no_jobs_remain().expect("no failures");
    assert_eq!(*observed.borrow(), Some(Priority::Low));
}
