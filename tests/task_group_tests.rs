mod common;

use ringrt::{checkpoint, run, sleep, Error, Lock, TaskGroup};
use std::rc::Rc;
use std::time::Instant;

#[test]
fn aggregate_error_collects_every_child_failure() {
    common::setup_tracing();

    let start = Instant::now();
    let result = run(async {
        let group = TaskGroup::enter();
        group.create_task(async {
            sleep(0.2).await?;
            Err(Error::runtime("first child failed"))
        });
        group.create_task(async {
            sleep(0.2).await?;
            Err(Error::runtime("second child failed"))
        });
        group.exit().await
    });
    let elapsed = start.elapsed().as_secs_f64();

    match result {
        Err(Error::Aggregate(errors)) => assert_eq!(errors.len(), 2),
        other => panic!("expected an aggregate of two errors, got {other:?}"),
    }
    assert!(elapsed < 0.5, "elapsed {elapsed} should stay close to 0.2s");
}

#[test]
fn a_single_child_failure_is_not_wrapped_in_an_aggregate() {
    common::setup_tracing();

    let result = run(async {
        let group = TaskGroup::enter();
        group.create_task(async { Err(Error::runtime("the only failure")) });
        group.create_task(async {
            sleep(10.0).await?;
            Ok(())
        });
        group.exit().await
    });

    match result {
        Err(Error::Runtime(msg)) => assert_eq!(msg, "the only failure"),
        other => panic!("expected a single Runtime error, got {other:?}"),
    }
}

/// Two tasks each hold one lock and block acquiring the other, with no
/// timer or I/O outstanding anywhere — the ready queue empties and the
/// loop must report `Deadlock` rather than spin.
#[test]
fn two_tasks_holding_each_others_lock_deadlocks() {
    common::setup_tracing();

    let lock_a = Rc::new(Lock::new());
    let lock_b = Rc::new(Lock::new());

    let result = run(async move {
        let group = TaskGroup::enter();

        let (a1, b1) = (lock_a.clone(), lock_b.clone());
        group.create_task(async move {
            a1.acquire().await?;
            checkpoint().await?;
            b1.acquire().await?;
            b1.release();
            a1.release();
            Ok(())
        });

        let (a2, b2) = (lock_a.clone(), lock_b.clone());
        group.create_task(async move {
            b2.acquire().await?;
            checkpoint().await?;
            a2.acquire().await?;
            a2.release();
            b2.release();
            Ok(())
        });

        group.exit().await
    });

    assert!(matches!(result, Err(Error::Deadlock)), "expected Deadlock, got {result:?}");
}
