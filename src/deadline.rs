//! Deadline helpers built from `CancelScope` and `sleep`: `fail_after` and
//! `move_on_after`.
//!
//! Per SPEC_FULL.md's resolution of spec.md's own open question, the
//! background timer task is not leaked: its scope is cancelled once the
//! guarded block finishes (normally or not), and we wait for it to unwind
//! before returning, so it never outlives the block it was timing.

use std::future::Future;

use crate::context;
use crate::error::{Error, Result};
use crate::io_future::sleep;
use crate::join::JoinHandle;
use crate::task::{spawn, CancelScope};

struct Timer {
    handle: JoinHandle<()>,
    scope: CancelScope,
}

fn spawn_timer(delay: f64, target: CancelScope) -> Timer {
    let scope = CancelScope::new(false);
    let handle = spawn({
        let scope = scope.clone();
        async move {
            let _guard = scope.enter();
            match sleep(delay).await {
                Ok(()) => {
                    target.cancel();
                    Ok(())
                }
                Err(e) if e.is_cancelled() => Ok(()),
                Err(e) => Err(e),
            }
        }
    });
    Timer { handle, scope }
}

/// Runs `body` under a new cancel scope; if `delay` seconds pass before it
/// finishes, the scope is cancelled and `body`'s next suspension point
/// raises `Cancelled` — which this function does not swallow.
pub async fn fail_after<F, T>(delay: f64, shield: bool, body: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let scope = CancelScope::new(shield);
    let _guard = scope.enter();
    let timer = spawn_timer(delay, scope);

    let result = body.await;
    timer.scope.cancel();
    let _ = timer.handle.await;
    result
}

/// Same as [`fail_after`], but swallows `Cancelled` when it was this
/// call's own scope that fired, returning `Ok(None)` instead. A
/// cancellation belonging to an enclosing scope is re-raised unchanged.
pub async fn move_on_after<F, T>(delay: f64, shield: bool, body: F) -> Result<Option<T>>
where
    F: Future<Output = Result<T>>,
{
    let scope = CancelScope::new(shield);
    let _guard = scope.enter();
    let timer = spawn_timer(delay, scope.clone());

    let result = body.await;
    timer.scope.cancel();
    let _ = timer.handle.await;

    match result {
        Err(Error::Cancelled(tid)) if tid == context::current_task() && scope.is_cancelled() => {
            Ok(None)
        }
        other => other.map(Some),
    }
}
