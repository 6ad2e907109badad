use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::Rc;

use serde_json::Value;
use tracing::debug;

use crate::callbacks::{CallbackParams, CallbackRegistry, session_params};
use crate::client::CollectorClient;
use crate::diagnostics::ErrorLog;
use crate::executor::Executor;
use crate::page::PageHost;
use crate::settings::SdkSettings;
use crate::stores::IdentityStores;

/// State shared by every component of one SDK instance.
pub(crate) struct SdkContext {
    pub(crate) client_id: String,
    pub(crate) collector_url: String,
    pub(crate) is_single_page_app: bool,
    pub(crate) debug: bool,
    pub(crate) triggers: Option<Value>,
    pub(crate) settings: SdkSettings,
    pub(crate) session_id: RefCell<String>,
    pub(crate) callbacks: RefCell<CallbackRegistry>,
    pub(crate) completed: Cell<bool>,
    pub(crate) errors: ErrorLog,
    pub(crate) executor: Rc<dyn Executor>,
    pub(crate) page: Rc<dyn PageHost>,
    pub(crate) client: Rc<CollectorClient>,
    pub(crate) stores: IdentityStores,
}

impl SdkContext {
    pub(crate) fn session_id(&self) -> String {
        self.session_id.borrow().clone()
    }

    pub(crate) fn session_params(&self) -> CallbackParams {
        session_params(&self.session_id(), &self.client_id)
    }

    /// Delivers `event` to its registered callback at most once. The registry
    /// borrow is released before the callback runs.
    pub(crate) fn fire(&self, event: &str, params: CallbackParams) -> bool {
        let callback = self.callbacks.borrow_mut().take(event);
        match callback {
            Some(callback) => {
                debug!(event, "invoking callback");
                callback(params);
                true
            }
            None => {
                debug!(event, "no callback registered");
                false
            }
        }
    }

    pub(crate) fn spawn(&self, task: impl Future<Output = ()> + 'static) {
        self.executor.spawn(Box::pin(task));
    }
}
