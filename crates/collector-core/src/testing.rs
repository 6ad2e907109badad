//! In-memory host doubles for exercising the SDK off-browser.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::rc::Rc;

use async_trait::async_trait;
use futures::channel::oneshot;
use serde_json::Value;

use crate::error::{PageError, TransportError};
use crate::page::{FormFieldOutcome, InboundMessage, MessageHandler, PageHost, Subscription, UnloadHandler};
use crate::sdk::Host;
use crate::stores::{MemoryCookieJar, MemoryStorage};
use crate::transport::{HttpRequest, HttpResponse, HttpTransport};

pub enum Reply {
    Respond(HttpResponse),
    Fail(TransportError),
    /// Never resolves.
    Hang,
    /// Resolves when the paired sender fires.
    Deferred(oneshot::Receiver<HttpResponse>),
}

impl Reply {
    #[must_use]
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self::Respond(HttpResponse::new(status, body))
    }

    #[must_use]
    pub fn json(value: &Value) -> Self {
        Self::Respond(HttpResponse::new(200, value.to_string()))
    }

    #[must_use]
    pub fn fail(message: impl Into<String>) -> Self {
        Self::Fail(TransportError::Request {
            message: message.into(),
        })
    }

    fn try_clone(&self) -> Option<Self> {
        match self {
            Self::Respond(response) => Some(Self::Respond(response.clone())),
            Self::Fail(error) => Some(Self::Fail(error.clone())),
            Self::Hang => Some(Self::Hang),
            Self::Deferred(_) => None,
        }
    }
}

/// Transport answering by URL path fragment. Replies queued for a fragment
/// are used in order; the last reusable one keeps answering. Unrouted
/// requests get a 404.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: RefCell<Vec<(String, VecDeque<Reply>)>>,
    requests: RefCell<Vec<HttpRequest>>,
    beacons: RefCell<Vec<HttpRequest>>,
    accepts_beacons: Cell<bool>,
}

impl ScriptedTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(&self, fragment: &str, reply: Reply) {
        let mut routes = self.routes.borrow_mut();
        match routes.iter_mut().find(|(existing, _)| existing == fragment) {
            Some((_, queue)) => queue.push_back(reply),
            None => routes.push((fragment.to_string(), VecDeque::from([reply]))),
        }
    }

    /// Queues a reply that is held until the returned sender is used.
    pub fn defer(&self, fragment: &str) -> oneshot::Sender<HttpResponse> {
        let (sender, receiver) = oneshot::channel();
        self.route(fragment, Reply::Deferred(receiver));
        sender
    }

    pub fn set_accepts_beacons(&self, accepts: bool) {
        self.accepts_beacons.set(accepts);
    }

    #[must_use]
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.borrow().clone()
    }

    #[must_use]
    pub fn requests_to(&self, fragment: &str) -> Vec<HttpRequest> {
        self.requests
            .borrow()
            .iter()
            .filter(|request| path_of(&request.url).contains(fragment))
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn beacons(&self) -> Vec<HttpRequest> {
        self.beacons.borrow().clone()
    }

    fn next_reply(&self, path: &str) -> Option<Reply> {
        let mut routes = self.routes.borrow_mut();
        let (_, queue) = routes
            .iter_mut()
            .find(|(fragment, _)| path.contains(fragment.as_str()))?;
        if queue.len() > 1 {
            return queue.pop_front();
        }
        let reusable = queue.front().and_then(Reply::try_clone);
        if reusable.is_some() {
            return reusable;
        }
        queue.pop_front()
    }
}

fn path_of(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

#[async_trait(?Send)]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let reply = self.next_reply(path_of(&request.url));
        self.requests.borrow_mut().push(request);
        match reply {
            None => Ok(HttpResponse::new(404, "")),
            Some(Reply::Respond(response)) => Ok(response),
            Some(Reply::Fail(error)) => Err(error),
            Some(Reply::Hang) => futures::future::pending().await,
            Some(Reply::Deferred(receiver)) => receiver.await.map_err(|_| TransportError::Request {
                message: "deferred reply dropped".to_string(),
            }),
        }
    }

    fn send_beacon(&self, request: &HttpRequest) -> bool {
        if !self.accepts_beacons.get() {
            return false;
        }
        self.beacons.borrow_mut().push(request.clone());
        true
    }
}

/// Single-listener slot with `window.onmessage` semantics: subscribing
/// replaces the previous listener.
struct ListenerSlot<T> {
    entry: Rc<RefCell<Option<(u64, Box<dyn FnMut(T)>)>>>,
    cancelled: Rc<RefCell<HashSet<u64>>>,
    next_id: Cell<u64>,
}

impl<T> Default for ListenerSlot<T> {
    fn default() -> Self {
        Self {
            entry: Rc::new(RefCell::new(None)),
            cancelled: Rc::new(RefCell::new(HashSet::new())),
            next_id: Cell::new(0),
        }
    }
}

impl<T: 'static> ListenerSlot<T> {
    fn subscribe(&self, handler: Box<dyn FnMut(T)>) -> Subscription {
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        *self.entry.borrow_mut() = Some((id, handler));

        let entry = Rc::clone(&self.entry);
        let cancelled = Rc::clone(&self.cancelled);
        Subscription::new(move || {
            cancelled.borrow_mut().insert(id);
            let mut entry = entry.borrow_mut();
            if entry.as_ref().is_some_and(|(current, _)| *current == id) {
                *entry = None;
            }
        })
    }

    fn dispatch(&self, value: T) -> bool {
        let taken = self.entry.borrow_mut().take();
        let Some((id, mut handler)) = taken else {
            return false;
        };
        handler(value);
        let mut entry = self.entry.borrow_mut();
        if entry.is_none() && !self.cancelled.borrow().contains(&id) {
            *entry = Some((id, handler));
        }
        true
    }

    fn is_active(&self) -> bool {
        self.entry.borrow().is_some()
    }
}

/// Page double recording surfaces, forms and scripts, with manual dispatch
/// of messages and unload.
pub struct RecordingPage {
    message_channel: bool,
    mounts: RefCell<Vec<(String, String)>>,
    live: RefCell<BTreeMap<String, String>>,
    messages: ListenerSlot<InboundMessage>,
    unload: ListenerSlot<()>,
    forms: RefCell<BTreeMap<String, BTreeMap<String, String>>>,
    scripts: RefCell<Vec<String>>,
}

impl Default for RecordingPage {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingPage {
    #[must_use]
    pub fn new() -> Self {
        Self {
            message_channel: true,
            mounts: RefCell::new(Vec::new()),
            live: RefCell::new(BTreeMap::new()),
            messages: ListenerSlot::default(),
            unload: ListenerSlot::default(),
            forms: RefCell::new(BTreeMap::new()),
            scripts: RefCell::new(Vec::new()),
        }
    }

    /// A page where cross-origin messaging is unavailable.
    #[must_use]
    pub fn without_message_channel() -> Self {
        Self {
            message_channel: false,
            ..Self::new()
        }
    }

    #[must_use]
    pub fn with_form(self, form_id: &str) -> Self {
        self.forms
            .borrow_mut()
            .insert(form_id.to_string(), BTreeMap::new());
        self
    }

    /// Every mount in order, as `(surface_id, src)`.
    #[must_use]
    pub fn mounts(&self) -> Vec<(String, String)> {
        self.mounts.borrow().clone()
    }

    #[must_use]
    pub fn live_surface(&self, surface_id: &str) -> Option<String> {
        self.live.borrow().get(surface_id).cloned()
    }

    #[must_use]
    pub fn form_field(&self, form_id: &str, field: &str) -> Option<String> {
        self.forms.borrow().get(form_id)?.get(field).cloned()
    }

    #[must_use]
    pub fn scripts(&self) -> Vec<String> {
        self.scripts.borrow().clone()
    }

    pub fn dispatch_message(&self, origin: &str, data: &str) -> bool {
        self.messages.dispatch(InboundMessage::new(origin, data))
    }

    pub fn trigger_unload(&self) -> bool {
        self.unload.dispatch(())
    }

    #[must_use]
    pub fn has_message_listener(&self) -> bool {
        self.messages.is_active()
    }

    #[must_use]
    pub fn has_unload_listener(&self) -> bool {
        self.unload.is_active()
    }
}

impl PageHost for RecordingPage {
    fn mount_surface(&self, surface_id: &str, src: &str) -> Result<(), PageError> {
        self.live
            .borrow_mut()
            .insert(surface_id.to_string(), src.to_string());
        self.mounts
            .borrow_mut()
            .push((surface_id.to_string(), src.to_string()));
        Ok(())
    }

    fn subscribe_messages(&self, handler: MessageHandler) -> Option<Subscription> {
        self.message_channel
            .then(|| self.messages.subscribe(handler))
    }

    fn subscribe_unload(&self, mut handler: UnloadHandler) -> Option<Subscription> {
        Some(self.unload.subscribe(Box::new(move |()| handler())))
    }

    fn set_form_field(
        &self,
        form_id: &str,
        field_name: &str,
        value: &str,
    ) -> Result<FormFieldOutcome, PageError> {
        let mut forms = self.forms.borrow_mut();
        let form = forms
            .get_mut(form_id)
            .ok_or_else(|| PageError::FormNotFound(form_id.to_string()))?;
        let outcome = if form.contains_key(field_name) {
            FormFieldOutcome::Updated
        } else {
            FormFieldOutcome::Created
        };
        form.insert(field_name.to_string(), value.to_string());
        Ok(outcome)
    }

    fn load_script(&self, src: &str) -> Result<(), PageError> {
        self.scripts.borrow_mut().push(src.to_string());
        Ok(())
    }
}

/// Concrete doubles behind a [`Host`], kept for inspection.
pub struct TestHost {
    pub transport: Rc<ScriptedTransport>,
    pub page: Rc<RecordingPage>,
    pub cookies: Rc<MemoryCookieJar>,
    pub local_storage: Rc<MemoryStorage>,
    pub session_storage: Rc<MemoryStorage>,
}

impl Default for TestHost {
    fn default() -> Self {
        Self::new(RecordingPage::new())
    }
}

impl TestHost {
    #[must_use]
    pub fn new(page: RecordingPage) -> Self {
        Self {
            transport: Rc::new(ScriptedTransport::new()),
            page: Rc::new(page),
            cookies: Rc::new(MemoryCookieJar::new(true)),
            local_storage: Rc::new(MemoryStorage::new()),
            session_storage: Rc::new(MemoryStorage::new()),
        }
    }

    #[must_use]
    pub fn with_cookies(mut self, cookies: MemoryCookieJar) -> Self {
        self.cookies = Rc::new(cookies);
        self
    }

    #[must_use]
    pub fn with_local_storage(mut self, storage: MemoryStorage) -> Self {
        self.local_storage = Rc::new(storage);
        self
    }

    #[must_use]
    pub fn with_session_storage(mut self, storage: MemoryStorage) -> Self {
        self.session_storage = Rc::new(storage);
        self
    }

    #[must_use]
    pub fn host(&self, executor: Rc<dyn crate::executor::Executor>) -> Host {
        Host {
            executor,
            transport: self.transport.clone(),
            cookies: self.cookies.clone(),
            local_storage: self.local_storage.clone(),
            session_storage: self.session_storage.clone(),
            page: self.page.clone(),
        }
    }

    /// Host driven by tokio; run inside a `LocalSet`.
    #[cfg(feature = "tokio")]
    #[must_use]
    pub fn tokio_host(&self) -> Host {
        self.host(Rc::new(crate::executor::TokioLocalExecutor))
    }
}
