//! Change notification for the session identity marker, and the bounded wait
//! the handshake performs on it.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use futures::future::{Either, select};

use crate::executor::Executor;

#[derive(Default)]
struct SignalState {
    version: u64,
    wakers: Vec<Waker>,
}

/// Versioned wake-up signal; every `notify` releases all pending [`Changed`] futures.
#[derive(Clone, Default)]
pub struct SettleSignal {
    state: Rc<RefCell<SignalState>>,
}

impl SettleSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        let wakers = {
            let mut state = self.state.borrow_mut();
            state.version = state.version.wrapping_add(1);
            std::mem::take(&mut state.wakers)
        };
        for waker in wakers {
            waker.wake();
        }
    }

    /// Resolves at the next `notify` after this call.
    #[must_use]
    pub fn changed(&self) -> Changed {
        Changed {
            state: Rc::clone(&self.state),
            seen: self.state.borrow().version,
        }
    }
}

pub struct Changed {
    state: Rc<RefCell<SignalState>>,
    seen: u64,
}

impl Future for Changed {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let mut state = self.state.borrow_mut();
        if state.version != self.seen {
            return Poll::Ready(());
        }
        if !state.wakers.iter().any(|waker| waker.will_wake(cx.waker())) {
            state.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

/// Waits until `probe` yields a value, re-checking on every signal and at
/// least once per `interval`. Gives up once the interval ticks exhaust
/// `budget`; notifications do not consume budget.
pub async fn bounded_wait<T>(
    executor: &dyn Executor,
    signal: &SettleSignal,
    budget: Duration,
    interval: Duration,
    mut probe: impl FnMut() -> Option<T>,
) -> Option<T> {
    let mut remaining = budget;
    loop {
        let changed = signal.changed();
        let tick = executor.sleep(interval);
        let ticked = matches!(select(changed, tick).await, Either::Right(_));

        if let Some(value) = probe() {
            return Some(value);
        }
        if ticked {
            if remaining < interval {
                return None;
            }
            remaining -= interval;
        }
    }
}
