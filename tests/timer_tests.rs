mod common;

use ringrt::{fail_after, move_on_after, run, sleep, TaskGroup};
use std::time::Instant;

#[test]
fn two_children_sleeping_concurrently_finish_in_one_sleep() {
    common::setup_tracing();

    let start = Instant::now();
    run(async {
        let group = TaskGroup::enter();
        group.create_task(async {
            sleep(1.0).await?;
            Ok(())
        });
        group.create_task(async {
            sleep(1.0).await?;
            Ok(())
        });
        group.exit().await
    })
    .unwrap();
    let elapsed = start.elapsed().as_secs_f64();

    assert!(elapsed >= 1.0, "elapsed {elapsed} should be at least 1.0s");
    assert!(elapsed < 1.2, "elapsed {elapsed} should be under 1.2s");
}

#[test]
fn shielded_inner_absorbs_its_own_timeout_outer_still_fires() {
    common::setup_tracing();

    let start = Instant::now();
    let result = run(async {
        fail_after(0.1, false, async {
            move_on_after(0.2, true, async {
                sleep(0.5).await?;
                Ok(())
            })
            .await
        })
        .await
    });
    let elapsed = start.elapsed().as_secs_f64();

    assert!(result.is_err(), "outer fail_after should still raise Cancelled");
    assert!(result.unwrap_err().is_cancelled());
    assert!(elapsed >= 0.2, "elapsed {elapsed} should be at least 0.2s");
    assert!(elapsed < 0.4, "elapsed {elapsed} should be under 0.4s");
}

#[test]
fn move_on_after_longer_than_body_does_not_fire() {
    common::setup_tracing();

    let result = run(async {
        move_on_after(0.2, false, async {
            sleep(0.01).await?;
            Ok(42)
        })
        .await
    });

    assert_eq!(result.unwrap(), Some(42));
}

#[test]
fn move_on_after_around_longer_sleep_returns_none_without_raising() {
    common::setup_tracing();

    let start = Instant::now();
    let result = run(async {
        move_on_after(0.1, false, async {
            sleep(0.5).await?;
            Ok(())
        })
        .await
    });
    let elapsed = start.elapsed().as_secs_f64();

    assert_eq!(result.unwrap(), None);
    assert!(elapsed >= 0.1 && elapsed < 0.3);
}

#[test]
fn fail_after_around_longer_sleep_raises_cancelled() {
    common::setup_tracing();

    let result = run(async {
        fail_after(0.1, false, async {
            sleep(0.5).await?;
            Ok(())
        })
        .await
    });

    assert!(result.unwrap_err().is_cancelled());
}
