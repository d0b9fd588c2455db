mod common;

use ringrt::{run, sleep, CancelScope, Lock, TaskGroup};
use std::rc::Rc;
use std::time::Instant;

#[test]
fn three_tasks_taking_turns_on_a_lock_serialize_their_sleeps() {
    common::setup_tracing();

    let lock = Rc::new(Lock::new());
    let start = Instant::now();

    let result = run(async move {
        let group = TaskGroup::enter();
        for _ in 0..3 {
            let lock = lock.clone();
            group.create_task(async move {
                lock.acquire().await?;
                sleep(0.1).await?;
                lock.release();
                Ok(())
            });
        }
        group.exit().await
    });
    let elapsed = start.elapsed().as_secs_f64();

    result.unwrap();
    assert!(elapsed >= 0.3, "elapsed {elapsed} should be at least 0.3s");
    assert!(elapsed < 0.5, "elapsed {elapsed} should stay close to 0.3s");
}

#[test]
fn cancelling_an_already_cancelled_scope_is_a_no_op() {
    let scope = CancelScope::new(false);
    scope.cancel();
    assert!(scope.is_cancelled());
    scope.cancel();
    assert!(scope.is_cancelled());
}

#[test]
fn cancelled_scope_unwinds_at_the_next_suspension_point() {
    common::setup_tracing();

    let result = run(async {
        let scope = CancelScope::new(false);
        let _guard = scope.enter();
        scope.cancel();
        sleep(1.0).await?;
        unreachable!("sleep should have observed the cancellation first");
    });

    assert!(result.unwrap_err().is_cancelled());
}
