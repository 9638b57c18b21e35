//! Failure isolation and the supervision chain.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use camshaft::{Config, Error, ErrorKind, Monitor, Scheduler};

fn manual() -> Scheduler {
    Scheduler::new(Config::new().manual_time().check_invariants(true))
}

#[test]
fn failing_job_does_not_abort_the_cycle() {
    let mut s = manual();
    let ran = Rc::new(RefCell::new(false));
    let ctx = s.main_execution_context().clone();

    s.enqueue_fallible(&ctx, |_| Err(Error::job_failure("x blows up")));
    {
        let ran = Rc::clone(&ran);
        s.enqueue(&ctx, move |_| *ran.borrow_mut() = true);
    }

    let err = s
        .run_cycles_until_no_jobs_remain()
        .expect_err("x's error is uncaught");
    assert!(*ran.borrow(), "y still ran in the same cycle");
    assert_eq!(err.kind(), ErrorKind::Uncaught);
    assert!(s.is_dead());
    assert!(s.uncaught_exn().is_some());
}

#[test]
fn dead_scheduler_refuses_further_driving() {
    let mut s = manual();
    let ctx = s.main_execution_context().clone();
    s.enqueue_fallible(&ctx, |_| Err(Error::job_failure("fatal")));
    let _ = s.run_cycles_until_no_jobs_remain();

    let err = s
        .run_cycles_until_no_jobs_remain()
        .expect_err("dead scheduler");
    assert_eq!(err.kind(), ErrorKind::Misuse);
}

#[test]
fn error_reaches_the_job_contexts_monitor() {
    let mut s = manual();
    let seen = Arc::new(AtomicUsize::new(0));
    let supervised = Monitor::create("supervised", Some(s.main_monitor()));
    {
        let seen = Arc::clone(&seen);
        supervised.on_error(move |err| {
            assert_eq!(err.to_string(), "Job: worker tripped");
            seen.fetch_add(1, Ordering::SeqCst);
            true
        });
    }

    let ctx = s.main_execution_context().with_monitor(&supervised);
    s.enqueue_fallible(&ctx, |_| Err(Error::job_failure("worker tripped")));

    s.run_cycles_until_no_jobs_remain()
        .expect("handled error keeps the scheduler alive");
    assert_eq!(seen.load(Ordering::SeqCst), 1);
    assert!(!s.is_dead());
}

#[test]
fn unhandled_child_error_forwards_to_parent_handler() {
    let mut s = manual();
    let handled_at_root = Arc::new(AtomicBool::new(false));
    {
        let flag = Arc::clone(&handled_at_root);
        s.main_monitor().on_error(move |_| {
            flag.store(true, Ordering::SeqCst);
            true
        });
    }
    let child = Monitor::create("child", Some(s.main_monitor()));
    let ctx = s.main_execution_context().with_monitor(&child);
    s.enqueue_fallible(&ctx, |_| Err(Error::job_failure("bubbles")));

    s.run_cycles_until_no_jobs_remain().expect("root handled it");
    assert!(handled_at_root.load(Ordering::SeqCst));
}

#[test]
fn backtraces_captured_only_when_requested() {
    let captured = Arc::new(AtomicBool::new(false));

    // Without record_backtraces: no backtrace on the delivered error.
    let mut s = manual();
    let monitor = Monitor::create("m", Some(s.main_monitor()));
    {
        let captured = Arc::clone(&captured);
        monitor.on_error(move |err| {
            captured.store(err.backtrace().is_some(), Ordering::SeqCst);
            true
        });
    }
    let ctx = s.main_execution_context().with_monitor(&monitor);
    s.enqueue_fallible(&ctx, |_| Err(Error::job_failure("plain")));
    s.run_cycles_until_no_jobs_remain().expect("handled");
    assert!(!captured.load(Ordering::SeqCst));

    // With record_backtraces: the delivered error carries one.
    let mut s = Scheduler::new(Config::new().manual_time().record_backtraces(true));
    let monitor = Monitor::create("m", Some(s.main_monitor()));
    {
        let captured = Arc::clone(&captured);
        monitor.on_error(move |err| {
            captured.store(err.backtrace().is_some(), Ordering::SeqCst);
            true
        });
    }
    let ctx = s.main_execution_context().with_monitor(&monitor);
    s.enqueue_fallible(&ctx, |_| Err(Error::job_failure("traced")));
    s.run_cycles_until_no_jobs_remain().expect("handled");
    assert!(captured.load(Ordering::SeqCst));
}

#[test]
fn first_uncaught_error_wins() {
    let mut s = manual();
    let ctx = s.main_execution_context().clone();
    s.enqueue_fallible(&ctx, |_| Err(Error::job_failure("first")));
    s.enqueue_fallible(&ctx, |_| Err(Error::job_failure("second")));

    let err = s.run_cycles_until_no_jobs_remain().expect_err("uncaught");
    assert_eq!(err.to_string(), "Uncaught: first");
}

#[test]
fn context_restored_after_run_cycles_returns() {
    let mut s = manual();
    let ctx = s.main_execution_context().clone();
    s.enqueue_fallible(&ctx, |_| Err(Error::job_failure("dies")));
    let _ = s.run_cycles_until_no_jobs_remain();
    let main = s.main_execution_context().clone();
    assert!(s.current_execution_context().ptr_eq(&main));
}
