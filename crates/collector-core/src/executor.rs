//! Spawning and timers, abstracted so the same SDK runs on a browser event
//! loop or a tokio `LocalSet`.

use std::future::Future;
use std::time::Duration;

use futures::future::{Either, LocalBoxFuture, select};
use thiserror::Error;

pub trait Executor {
    /// Runs `task` to completion in the background on the current thread.
    fn spawn(&self, task: LocalBoxFuture<'static, ()>);

    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("timed out after {}ms", .0.as_millis())]
pub struct Elapsed(pub Duration);

/// Races `future` against a timer from `executor`.
pub async fn with_timeout<F>(
    executor: &dyn Executor,
    duration: Duration,
    future: F,
) -> Result<F::Output, Elapsed>
where
    F: Future,
{
    let timer = executor.sleep(duration);
    let future = std::pin::pin!(future);
    match select(future, timer).await {
        Either::Left((output, _)) => Ok(output),
        Either::Right(((), _)) => Err(Elapsed(duration)),
    }
}

/// Executor backed by `tokio::task::spawn_local`; must be used inside a `LocalSet`.
#[cfg(feature = "tokio")]
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioLocalExecutor;

#[cfg(feature = "tokio")]
impl Executor for TokioLocalExecutor {
    fn spawn(&self, task: LocalBoxFuture<'static, ()>) {
        drop(tokio::task::spawn_local(task));
    }

    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}
