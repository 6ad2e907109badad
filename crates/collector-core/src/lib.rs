//! Host-agnostic core of the collector SDK.
//!
//! The crate owns every piece of SDK behavior and talks to the outside world
//! only through a handful of traits:
//! - [`HttpTransport`] for collector requests
//! - [`StorageArea`] / [`CookieJar`] for the three identity stores
//! - [`PageHost`] for the collection surface, message channel, unload events and forms
//! - [`Executor`] for spawning and timers
//!
//! Execution is single-threaded and cooperative: shared state lives behind
//! `Rc`/`RefCell` and every future is `!Send`.

pub mod callbacks;
pub mod client;
pub mod companion;
mod context;
pub mod diagnostics;
pub mod error;
pub mod executor;
pub mod handshake;
pub mod identity;
pub mod orchestrator;
pub mod page;
pub mod sdk;
pub mod server_config;
pub mod session;
pub mod settings;
pub mod signal;
pub mod start;
pub mod stores;
pub mod testing;
pub mod transport;

pub use callbacks::{COLLECT_BEGIN, COLLECT_END, CallbackParams, CallbackRegistry};
pub use client::{CollectorClient, IdentifierVerdict};
pub use diagnostics::ErrorLog;
pub use error::{PageError, ProtocolError, StorageError, TransportError};
#[cfg(feature = "tokio")]
pub use executor::TokioLocalExecutor;
pub use executor::{Elapsed, Executor, with_timeout};
pub use handshake::{CollectorMessage, HandshakeOutcome};
pub use identity::{Identifier, ReconcileAction, Reconciliation, reconcile};
pub use orchestrator::{IterationOutcome, OrchestrationSnapshot};
pub use page::{FormFieldOutcome, InboundMessage, PageHost, Subscription};
pub use sdk::{AttachOptions, CollectorSdk, Host};
pub use server_config::{
    CollectionConfig, CompanionConfig, ConfigIssue, Configuration, DEFAULT_REFRESH_INTERVAL_MS,
    FeatureFlags, MAX_REFRESH_INTERVAL_MS, Translation, translate,
};
pub use session::{SessionDescriptor, SessionTransition};
pub use settings::{NoChannelPolicy, SdkSettings, SettingsError};
pub use start::{Environment, ResolvedStart, SDK_VERSION, StartConfig, StartError};
pub use stores::{CookieJar, IdentityStores, MemoryCookieJar, MemoryStorage, StorageArea};
pub use transport::{HttpMethod, HttpRequest, HttpResponse, HttpTransport};
