//! The thread-safe submission path and finalizer bridging.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use camshaft::{Config, LocalKey, Scheduler};

fn manual() -> Scheduler {
    Scheduler::new(Config::new().manual_time().check_invariants(true))
}

#[test]
fn external_jobs_run_in_the_next_cycle() {
    let mut s = manual();
    let ran = Arc::new(AtomicBool::new(false));
    let ctx = s.main_execution_context().clone();

    let handle = s.handle();
    {
        let ran = Arc::clone(&ran);
        handle.thread_safe_enqueue_external_job(
            &ctx,
            move |_, ()| {
                ran.store(true, Ordering::SeqCst);
                Ok(())
            },
            (),
        );
    }
    assert_eq!(handle.pending_external_jobs(), 1);

    s.run_cycle();
    assert!(ran.load(Ordering::SeqCst));
    assert_eq!(handle.pending_external_jobs(), 0);
}

#[test]
fn submissions_during_a_cycle_wait_for_the_next() {
    let mut s = manual();
    let ran = Arc::new(AtomicBool::new(false));
    let ctx = s.main_execution_context().clone();
    {
        let ran = Arc::clone(&ran);
        s.enqueue(&ctx.clone(), move |s| {
            let ran = Arc::clone(&ran);
            let ctx = s.current_execution_context().clone();
            s.handle().thread_safe_enqueue_external_job(
                &ctx,
                move |_, ()| {
                    ran.store(true, Ordering::SeqCst);
                    Ok(())
                },
                (),
            );
        });
    }

    s.run_cycle();
    assert!(
        !ran.load(Ordering::SeqCst),
        "mid-cycle arrival not observed until the next cycle"
    );
    s.run_cycle();
    assert!(ran.load(Ordering::SeqCst));
}

#[test]
fn many_threads_submit_concurrently() {
    let mut s = manual();
    let counter = Arc::new(AtomicUsize::new(0));
    let ctx = s.main_execution_context().clone();

    let producers: Vec<_> = (0..4)
        .map(|_| {
            let handle = s.handle();
            let ctx = ctx.clone();
            let counter = Arc::clone(&counter);
            thread::spawn(move || {
                for _ in 0..50 {
                    let counter = Arc::clone(&counter);
                    handle.thread_safe_enqueue_external_job(
                        &ctx,
                        move |_, ()| {
                            counter.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        },
                        (),
                    );
                }
            })
        })
        .collect();
    for p in producers {
        p.join().expect("producer panicked");
    }

    while s.handle().pending_external_jobs() > 0 || s.num_pending_jobs() > 0 {
        s.run_cycle();
    }
    assert_eq!(counter.load(Ordering::SeqCst), 200, "each ran exactly once");
}

#[test]
fn external_job_hook_fires_per_submission() {
    let mut s = manual();
    let wakeups = Arc::new(AtomicUsize::new(0));
    {
        let wakeups = Arc::clone(&wakeups);
        s.set_thread_safe_external_job_hook(move || {
            wakeups.fetch_add(1, Ordering::SeqCst);
        });
    }
    let ctx = s.main_execution_context().clone();
    for _ in 0..3 {
        s.handle()
            .thread_safe_enqueue_external_job(&ctx, |_, ()| Ok(()), ());
    }
    assert_eq!(wakeups.load(Ordering::SeqCst), 3);
}

#[test]
fn finalizer_runs_once_under_the_registration_context() {
    let mut s = manual();
    let key: LocalKey<String> = LocalKey::new();
    let runs = Arc::new(AtomicUsize::new(0));
    let observed = Arc::new(Mutex::new(None::<String>));
    let on_scheduler_thread = Arc::new(AtomicBool::new(false));
    let scheduler_thread = thread::current().id();

    let finalized = s.with_local(&key, "captured-at-registration".to_string(), |s| {
        let runs = Arc::clone(&runs);
        let observed = Arc::clone(&observed);
        let on_scheduler_thread = Arc::clone(&on_scheduler_thread);
        s.add_finalizer(vec![1u8, 2, 3], move |s, payload| {
            assert_eq!(payload, &[1, 2, 3]);
            runs.fetch_add(1, Ordering::SeqCst);
            on_scheduler_thread.store(
                thread::current().id() == scheduler_thread,
                Ordering::SeqCst,
            );
            *observed.lock().unwrap() = s.find_local(&key).map(|v| (*v).clone());
        })
    });

    // Drop the last reference on another thread; the drop only
    // submits to the inbox.
    thread::spawn(move || drop(finalized))
        .join()
        .expect("dropper panicked");
    assert_eq!(s.handle().pending_external_jobs(), 1);

    s.run_cycle();
    s.run_cycle();
    assert_eq!(runs.load(Ordering::SeqCst), 1, "exactly once");
    assert!(on_scheduler_thread.load(Ordering::SeqCst));
    assert_eq!(
        observed.lock().unwrap().as_deref(),
        Some("captured-at-registration"),
        "ran under the context captured at add_finalizer time"
    );
}

#[test]
fn add_finalizer_exn_accepts_any_owned_value() {
    let mut s = manual();
    let runs = Arc::new(AtomicUsize::new(0));
    {
        let runs = Arc::clone(&runs);
        let finalized = s.add_finalizer_exn(42u64, move |_, v| {
            assert_eq!(*v, 42);
            runs.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(*finalized, 42, "wrapper dereferences to the value");
        drop(finalized);
    }
    s.run_cycle();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn into_inner_disarms_the_finalizer() {
    let mut s = manual();
    let runs = Arc::new(AtomicUsize::new(0));
    let value = {
        let runs = Arc::clone(&runs);
        let finalized = s.add_finalizer("payload", move |_, _| {
            runs.fetch_add(1, Ordering::SeqCst);
        });
        finalized.into_inner()
    };
    assert_eq!(value, "payload");
    s.run_cycle();
    assert_eq!(runs.load(Ordering::SeqCst), 0);
}

#[test]
fn finalizer_context_priority_is_ignored_by_the_inbox_band() {
    // External work lands in the Normal band even when the captured
    // context says Low; the context still governs everything else.
    let mut s = manual();
    let log: Rc<RefCell<Vec<&'static str>>> = Rc::default();
    let ctx = s.main_execution_context().clone();

    let low = ctx.with_priority(camshaft::Priority::Low);
    {
        let log = Rc::clone(&log);
        s.with_execution_context(&low.clone(), |s| {
            let handle = s.handle();
            let current = s.current_execution_context().clone();
            handle.thread_safe_enqueue_external_job(
                &current,
                move |_, ()| {
                    log.borrow_mut().push("external");
                    Ok(())
                },
                (),
            );
        });
    }
    {
        let log = Rc::clone(&log);
        s.enqueue(&low, move |_| log.borrow_mut().push("low-band"));
    }

    s.run_cycle();
    assert_eq!(
        *log.borrow(),
        ["external", "low-band"],
        "inbox entry ran from the Normal band ahead of the Low job"
    );
}
