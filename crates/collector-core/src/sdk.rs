//! The public controller.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tracing::{debug, info, warn};

use crate::client::CollectorClient;
use crate::context::SdkContext;
use crate::diagnostics::ErrorLog;
use crate::executor::Executor;
use crate::handshake::CollectionHandshake;
use crate::identity::IdentityReconciler;
use crate::orchestrator::{IterationOutcome, OrchestrationSnapshot, Orchestrator};
use crate::page::PageHost;
use crate::server_config::Configuration;
use crate::session::{SessionTransition, communicate_latest_session};
use crate::settings::SdkSettings;
use crate::start::{SDK_VERSION, StartConfig, StartError};
use crate::stores::{CookieJar, IdentityStores, StorageArea};
use crate::transport::HttpTransport;

pub const DEFAULT_DECISION_FIELD: &str = "kountDecisionPointUUID";

/// Everything the SDK needs from its environment.
#[derive(Clone)]
pub struct Host {
    pub executor: Rc<dyn Executor>,
    pub transport: Rc<dyn HttpTransport>,
    pub cookies: Rc<dyn CookieJar>,
    pub local_storage: Rc<dyn StorageArea>,
    pub session_storage: Rc<dyn StorageArea>,
    pub page: Rc<dyn PageHost>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachOptions {
    /// Overrides [`DEFAULT_DECISION_FIELD`] when non-empty.
    pub custom_field_name: Option<String>,
}

impl AttachOptions {
    #[must_use]
    pub fn with_custom_field_name(name: impl Into<String>) -> Self {
        Self {
            custom_field_name: Some(name.into()),
        }
    }
}

/// A started SDK instance. Dropping it stops the orchestration loop.
pub struct CollectorSdk {
    ctx: Rc<SdkContext>,
    orchestrator: Rc<Orchestrator>,
}

impl CollectorSdk {
    pub fn start(config: StartConfig, session_id: &str, host: Host) -> Result<Self, StartError> {
        Self::start_with_settings(config, session_id, host, SdkSettings::default())
    }

    /// Validates `config`, announces the session and starts the orchestration
    /// loop in the background. Nothing is activated when validation fails.
    pub fn start_with_settings(
        mut config: StartConfig,
        session_id: &str,
        host: Host,
        settings: SdkSettings,
    ) -> Result<Self, StartError> {
        info!("collector sdk starting");
        let resolved = config.validate(session_id).inspect_err(|error| {
            warn!(%error, "collector sdk disabled");
        })?;
        let settings = match settings.validate() {
            Ok(()) => settings,
            Err(error) => {
                warn!(%error, "invalid sdk settings, using defaults");
                SdkSettings::default()
            }
        };

        let errors = ErrorLog::new();
        let client = Rc::new(CollectorClient::new(
            resolved.collector_url.clone(),
            resolved.client_id.clone(),
            host.transport,
            Rc::clone(&host.executor),
            settings.config_fetch_timeout(),
        ));
        let stores = IdentityStores::new(
            host.cookies,
            host.local_storage,
            host.session_storage,
            errors.clone(),
            settings.cookie_lifetime_days,
        );
        let ctx = Rc::new(SdkContext {
            client_id: resolved.client_id,
            collector_url: resolved.collector_url,
            is_single_page_app: resolved.is_single_page_app,
            debug: resolved.debug,
            triggers: resolved.triggers,
            settings,
            session_id: RefCell::new(resolved.session_id),
            callbacks: RefCell::new(std::mem::take(&mut config.callbacks)),
            completed: Cell::new(false),
            errors: errors.clone(),
            executor: host.executor,
            page: host.page,
            client: Rc::clone(&client),
            stores: stores.clone(),
        });

        let reconciler = IdentityReconciler::new(stores, client, errors);
        let handshake = CollectionHandshake::new(Rc::clone(&ctx), reconciler);
        let orchestrator = Orchestrator::new(Rc::clone(&ctx), handshake);

        let stored = ctx.stores.read_session_id();
        communicate_latest_session(&ctx, stored);
        orchestrator.spawn_iteration();

        info!(
            version = SDK_VERSION,
            session_id = %ctx.session_id(),
            single_page_app = ctx.is_single_page_app,
            "collector sdk started"
        );
        Ok(Self { ctx, orchestrator })
    }

    /// Rotates to `session_id`: clears the tab's session store, announces the
    /// change and runs an orchestration pass (skipped if one is in flight).
    pub fn new_session(&self, session_id: &str) -> Option<SessionTransition> {
        let session_id = session_id.trim();
        if session_id.is_empty() {
            self.ctx
                .errors
                .record("new session: invalid session id, a session id is required for collection");
            return None;
        }
        info!(session_id, "new session");

        let previous = self.ctx.stores.read_session_id();
        self.ctx.stores.clear_session_area();
        *self.ctx.session_id.borrow_mut() = session_id.to_string();
        let transition = communicate_latest_session(&self.ctx, previous);
        self.orchestrator.spawn_iteration();
        Some(transition)
    }

    /// Writes the current session id into a hidden field of form `form_id`.
    pub fn attach_to_form(&self, form_id: &str, options: &AttachOptions) {
        let field = options
            .custom_field_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_DECISION_FIELD);
        let session_id = self.ctx.session_id();

        match self.ctx.page.set_form_field(form_id, field, &session_id) {
            Ok(outcome) => debug!(form_id, field, ?outcome, "session attached to form"),
            Err(error) => self.ctx.errors.record(format!(
                "attach to form: form {form_id} is not valid, skipping attachment: {error}"
            )),
        }
    }

    /// Runs an orchestration iteration now, unless one is already in flight.
    pub async fn orchestrate_now(&self) -> IterationOutcome {
        self.orchestrator.run_iteration().await
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.ctx.completed.get()
    }

    #[must_use]
    pub fn errors(&self) -> Vec<String> {
        self.ctx.errors.entries()
    }

    #[must_use]
    pub fn error_log(&self) -> ErrorLog {
        self.ctx.errors.clone()
    }

    #[must_use]
    pub fn session_id(&self) -> String {
        self.ctx.session_id()
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.ctx.client_id
    }

    #[must_use]
    pub fn collector_url(&self) -> &str {
        &self.ctx.collector_url
    }

    #[must_use]
    pub fn is_debug_enabled(&self) -> bool {
        self.ctx.debug
    }

    #[must_use]
    pub fn settings(&self) -> &SdkSettings {
        &self.ctx.settings
    }

    #[must_use]
    pub fn last_configuration(&self) -> Option<Configuration> {
        self.orchestrator.last_configuration()
    }

    #[must_use]
    pub fn orchestration(&self) -> OrchestrationSnapshot {
        self.orchestrator.snapshot()
    }
}
