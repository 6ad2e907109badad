//! The collection surface and its message-based completion protocol.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::callbacks::{COLLECT_BEGIN, COLLECT_END, CallbackParams, PARAM_CLIENT_ID, PARAM_SESSION_ID};
use crate::context::SdkContext;
use crate::error::{PageError, ProtocolError};
use crate::identity::IdentityReconciler;
use crate::page::{InboundMessage, Subscription};
use crate::settings::NoChannelPolicy;
use crate::signal::bounded_wait;

pub const SURFACE_ID: &str = "ibody";

/// `{event, params}` as posted by the collection surface.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CollectorMessage {
    pub event: String,
    pub params: Map<String, Value>,
}

/// Accepts only messages from `expected_origin` whose data is a JSON `{event, params}` object.
pub fn parse_collector_message(
    expected_origin: &str,
    message: &InboundMessage,
) -> Result<CollectorMessage, ProtocolError> {
    if message.origin != expected_origin {
        return Err(ProtocolError::UnexpectedOrigin {
            origin: message.origin.clone(),
            expected: expected_origin.to_string(),
        });
    }
    serde_json::from_str(&message.data).map_err(|error| ProtocolError::Malformed(error.to_string()))
}

/// Renames the collector's short parameter keys; everything else passes through.
#[must_use]
pub fn remap_params(params: Map<String, Value>) -> CallbackParams {
    params
        .into_iter()
        .map(|(key, value)| {
            let key = match key.as_str() {
                "s" => PARAM_SESSION_ID.to_string(),
                "m" => PARAM_CLIENT_ID.to_string(),
                _ => key,
            };
            (key, value)
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// Surface mounted; `channel` is false when no completion message can arrive.
    Mounted { channel: bool },
    /// The identity marker stayed empty for the whole wait.
    IdentityUnsettled,
    MountFailed,
}

/// Listeners owned by the currently mounted surface.
struct LiveSurface {
    _messages: Option<Subscription>,
    unload: RefCell<Option<Subscription>>,
}

pub(crate) struct CollectionHandshake {
    ctx: Rc<SdkContext>,
    reconciler: IdentityReconciler,
    surface: RefCell<Option<LiveSurface>>,
    generation: Cell<u64>,
}

impl CollectionHandshake {
    pub(crate) fn new(ctx: Rc<SdkContext>, reconciler: IdentityReconciler) -> Rc<Self> {
        Rc::new(Self {
            ctx,
            reconciler,
            surface: RefCell::new(None),
            generation: Cell::new(0),
        })
    }

    pub(crate) async fn run(self: &Rc<Self>) -> HandshakeOutcome {
        let session_id = self.ctx.session_id();
        let generation = self.begin_run();

        let reconciliation = self.reconciler.settle_stores();
        let reconciler = self.reconciler.clone();
        let reconcile_session = session_id.clone();
        self.ctx.spawn(async move {
            reconciler.complete(&reconcile_session, reconciliation).await;
        });

        let stores = self.reconciler.stores();
        let settled = bounded_wait(
            self.ctx.executor.as_ref(),
            stores.settle_signal(),
            self.ctx.settings.identity_wait_timeout(),
            self.ctx.settings.identity_wait_interval(),
            || stores.session_marker(),
        )
        .await;
        if settled.is_none() {
            info!(session_id = %session_id, "identity not settled, collection surface skipped");
            return HandshakeOutcome::IdentityUnsettled;
        }

        // The session may have rotated during the wait.
        let session_id = self.ctx.session_id();
        match self.mount(&session_id, generation) {
            Ok(channel) => {
                info!(session_id = %session_id, channel, "collection initiated");
                HandshakeOutcome::Mounted { channel }
            }
            Err(error) => {
                self.ctx.errors.record(format!("create collection surface: {error}"));
                HandshakeOutcome::MountFailed
            }
        }
    }

    /// Collection switched off: the host still sees begin and end.
    pub(crate) fn skip(&self) {
        self.ctx.fire(COLLECT_BEGIN, self.ctx.session_params());
        self.ctx.fire(COLLECT_END, self.ctx.session_params());
    }

    /// Resets the completion flag and arms the completion timeout for this run.
    fn begin_run(self: &Rc<Self>) -> u64 {
        let generation = self.generation.get().wrapping_add(1);
        self.generation.set(generation);
        self.ctx.completed.set(false);

        let timer = self.ctx.executor.sleep(self.ctx.settings.collection_complete_timeout());
        let handshake = Rc::downgrade(self);
        self.ctx.spawn(async move {
            timer.await;
            if let Some(handshake) = current(&handshake, generation) {
                debug!("collection completion timeout reached");
                handshake.ctx.completed.set(true);
            }
        });
        generation
    }

    fn mount(self: &Rc<Self>, session_id: &str, generation: u64) -> Result<bool, PageError> {
        drop(self.surface.borrow_mut().take());

        let src = self.ctx.client.surface_url(session_id);
        self.ctx.page.mount_surface(SURFACE_ID, &src)?;
        self.ctx.fire(COLLECT_BEGIN, self.ctx.session_params());

        let handshake = Rc::downgrade(self);
        let messages = self.ctx.page.subscribe_messages(Box::new(move |message| {
            if let Some(handshake) = handshake.upgrade() {
                handshake.handle_message(&message);
            }
        }));

        let channel = messages.is_some();
        let unload = if channel && !self.ctx.is_single_page_app {
            self.subscribe_unload()
        } else {
            None
        };
        if !channel {
            self.no_channel_fallback(generation);
        }

        *self.surface.borrow_mut() = Some(LiveSurface {
            _messages: messages,
            unload: RefCell::new(unload),
        });
        Ok(channel)
    }

    fn handle_message(&self, message: &InboundMessage) {
        let message = match parse_collector_message(&self.ctx.collector_url, message) {
            Ok(message) => message,
            Err(error) => {
                debug!(%error, "collector message dropped");
                return;
            }
        };

        if !self.ctx.is_single_page_app && message.event == COLLECT_END {
            self.detach_unload();
        }
        self.ctx.completed.set(true);
        self.ctx.fire(&message.event, remap_params(message.params));
    }

    fn subscribe_unload(&self) -> Option<Subscription> {
        let ctx = Rc::downgrade(&self.ctx);
        self.ctx.page.subscribe_unload(Box::new(move || {
            if let Some(ctx) = ctx.upgrade() {
                send_final_beacon(&ctx);
            }
        }))
    }

    fn detach_unload(&self) {
        let subscription = self
            .surface
            .borrow()
            .as_ref()
            .and_then(|surface| surface.unload.borrow_mut().take());
        if let Some(subscription) = subscription {
            debug!("unload listener detached");
            subscription.unsubscribe();
        }
    }

    fn no_channel_fallback(self: &Rc<Self>, generation: u64) {
        match self.ctx.settings.no_channel_policy {
            NoChannelPolicy::NotApplicable => {
                debug!("no message channel, completion not tracked");
            }
            NoChannelPolicy::FireAfterGrace => {
                let timer = self.ctx.executor.sleep(self.ctx.settings.no_channel_grace());
                let handshake = Rc::downgrade(self);
                self.ctx.spawn(async move {
                    timer.await;
                    if let Some(handshake) = current(&handshake, generation) {
                        handshake.ctx.completed.set(true);
                        handshake
                            .ctx
                            .fire(COLLECT_END, handshake.ctx.session_params());
                    }
                });
            }
        }
    }
}

/// The handshake, if it is still alive and still on run `generation`.
fn current(handshake: &Weak<CollectionHandshake>, generation: u64) -> Option<Rc<CollectionHandshake>> {
    handshake
        .upgrade()
        .filter(|handshake| handshake.generation.get() == generation)
}

fn send_final_beacon(ctx: &SdkContext) {
    let request = ctx.client.final_beacon_request(&ctx.session_id());
    if ctx.client.transport().send_beacon(&request) {
        debug!("final beacon queued");
        return;
    }
    let transport = Rc::clone(ctx.client.transport());
    ctx.spawn(async move {
        if let Err(error) = transport.send(request).await {
            debug!(%error, "final beacon failed");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ORIGIN: &str = "https://tst.kaptcha.com";

    #[test]
    fn message_from_other_origin_is_rejected() {
        let message = InboundMessage::new("https://evil.example", r#"{"event":"collect-end","params":{}}"#);
        assert!(matches!(
            parse_collector_message(ORIGIN, &message),
            Err(ProtocolError::UnexpectedOrigin { .. })
        ));
    }

    #[test]
    fn message_without_params_is_malformed() {
        for data in [r#"{"event":"collect-end"}"#, "collect-end", r#"{"params":{}}"#] {
            let message = InboundMessage::new(ORIGIN, data);
            assert!(
                matches!(parse_collector_message(ORIGIN, &message), Err(ProtocolError::Malformed(_))),
                "{data}"
            );
        }
    }

    #[test]
    fn short_keys_are_renamed() {
        let message = InboundMessage::new(
            ORIGIN,
            r#"{"event":"collect-end","params":{"s":"sess-1","m":"900900","t":12}}"#,
        );
        let parsed = parse_collector_message(ORIGIN, &message).expect("parsed");
        assert_eq!(parsed.event, COLLECT_END);

        let params = remap_params(parsed.params);
        assert_eq!(params.get(PARAM_SESSION_ID), Some(&json!("sess-1")));
        assert_eq!(params.get(PARAM_CLIENT_ID), Some(&json!("900900")));
        assert_eq!(params.get("t"), Some(&json!(12)));
        assert!(!params.contains_key("s"));
    }
}
