use std::time::Duration;

use collector_core::Executor;
use futures::future::LocalBoxFuture;

use crate::page_support::timer_delay;

/// Runs SDK tasks on the page's microtask queue, with timers from `setTimeout`.
pub(super) struct WebExecutor;

impl Executor for WebExecutor {
    fn spawn(&self, task: LocalBoxFuture<'static, ()>) {
        wasm_bindgen_futures::spawn_local(task);
    }

    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()> {
        Box::pin(gloo_timers::future::sleep(timer_delay(duration)))
    }
}
