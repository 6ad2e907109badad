//! The self-rescheduling orchestration loop.
//!
//! At most one iteration body runs at a time. Every iteration that acquires
//! the lock finishes by dropping its [`Lease`], which cancels the pending
//! timer, schedules the next iteration and releases the lock, whether the
//! body completed, returned early or unwound.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use futures::future::{AbortHandle, Abortable};
use tracing::{debug, info};

use crate::companion::inject_companion;
use crate::context::SdkContext;
use crate::handshake::CollectionHandshake;
use crate::server_config::{CompanionConfig, Configuration, translate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationOutcome {
    Completed,
    /// Another iteration held the lock; nothing was done.
    Skipped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrchestrationSnapshot {
    pub locked: bool,
    pub iterations: u64,
    pub skipped: u64,
    pub reschedules: u64,
    pub next_delay: Option<Duration>,
    pub timer_pending: bool,
}

#[derive(Default)]
struct OrchestrationState {
    pending_timer: Option<AbortHandle>,
    last_configuration: Option<Configuration>,
    iterations: u64,
    skipped: u64,
    reschedules: u64,
    next_delay: Option<Duration>,
}

pub(crate) struct Orchestrator {
    ctx: Rc<SdkContext>,
    handshake: Rc<CollectionHandshake>,
    locked: Cell<bool>,
    state: RefCell<OrchestrationState>,
}

struct Lease {
    orchestrator: Rc<Orchestrator>,
    refresh_interval: Duration,
}

impl Lease {
    fn acquire(orchestrator: &Rc<Orchestrator>) -> Option<Self> {
        if orchestrator.locked.replace(true) {
            return None;
        }
        let refresh_interval = orchestrator
            .state
            .borrow()
            .last_configuration
            .as_ref()
            .map_or_else(|| Configuration::default().refresh_interval(), Configuration::refresh_interval);
        Some(Self {
            orchestrator: Rc::clone(orchestrator),
            refresh_interval,
        })
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.orchestrator.reschedule(self.refresh_interval);
        self.orchestrator.locked.set(false);
    }
}

impl Orchestrator {
    pub(crate) fn new(ctx: Rc<SdkContext>, handshake: Rc<CollectionHandshake>) -> Rc<Self> {
        Rc::new(Self {
            ctx,
            handshake,
            locked: Cell::new(false),
            state: RefCell::new(OrchestrationState::default()),
        })
    }

    /// Runs one iteration in the background.
    pub(crate) fn spawn_iteration(self: &Rc<Self>) {
        let orchestrator = Rc::clone(self);
        self.ctx.spawn(async move {
            orchestrator.run_iteration().await;
        });
    }

    pub(crate) async fn run_iteration(self: &Rc<Self>) -> IterationOutcome {
        let Some(mut lease) = Lease::acquire(self) else {
            self.state.borrow_mut().skipped += 1;
            debug!("orchestration gated by lock, skipping");
            return IterationOutcome::Skipped;
        };
        self.state.borrow_mut().iterations += 1;

        let session_id = self.ctx.session_id();
        debug!(session_id = %session_id, "orchestration started");
        let configuration = self.load_configuration(&session_id).await;
        lease.refresh_interval = configuration.refresh_interval();
        self.state.borrow_mut().last_configuration = Some(configuration.clone());

        match &configuration.companion {
            CompanionConfig::Enabled { org_id, subdomain } => {
                inject_companion(&self.ctx, org_id, subdomain);
            }
            CompanionConfig::Disabled => debug!("companion script disabled"),
        }

        if configuration.collection.enabled {
            let outcome = self.handshake.run().await;
            debug!(?outcome, "collection handshake finished");
        } else {
            debug!("collection disabled, firing lifecycle callbacks only");
            self.handshake.skip();
        }

        drop(lease);
        IterationOutcome::Completed
    }

    async fn load_configuration(&self, session_id: &str) -> Configuration {
        match self.ctx.client.fetch_configuration(session_id).await {
            Ok(payload) => {
                let translation = translate(&payload);
                for issue in translation.issues {
                    self.ctx.errors.record(format!("translate configuration: {issue}"));
                }
                translation.configuration
            }
            Err(error) => {
                self.ctx.errors.record(format!("fetch configuration: {error}"));
                Configuration::default()
            }
        }
    }

    fn reschedule(self: &Rc<Self>, delay: Duration) {
        let (handle, registration) = AbortHandle::new_pair();
        let previous = {
            let mut state = self.state.borrow_mut();
            state.reschedules += 1;
            state.next_delay = Some(delay);
            state.pending_timer.replace(handle)
        };
        if let Some(previous) = previous {
            previous.abort();
        }

        let timer = Abortable::new(self.ctx.executor.sleep(delay), registration);
        let orchestrator = Rc::downgrade(self);
        self.ctx.spawn(async move {
            if timer.await.is_err() {
                return;
            }
            if let Some(orchestrator) = orchestrator.upgrade() {
                orchestrator.run_iteration().await;
            }
        });
        info!(delay_ms = delay.as_millis(), "next orchestration scheduled");
    }

    pub(crate) fn last_configuration(&self) -> Option<Configuration> {
        self.state.borrow().last_configuration.clone()
    }

    pub(crate) fn snapshot(&self) -> OrchestrationSnapshot {
        let state = self.state.borrow();
        OrchestrationSnapshot {
            locked: self.locked.get(),
            iterations: state.iterations,
            skipped: state.skipped,
            reschedules: state.reschedules,
            next_delay: state.next_delay,
            timer_pending: state
                .pending_timer
                .as_ref()
                .is_some_and(|handle| !handle.is_aborted()),
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        if let Some(timer) = self.state.get_mut().pending_timer.take() {
            timer.abort();
        }
    }
}
