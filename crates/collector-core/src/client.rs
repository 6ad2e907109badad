//! Typed access to the collector endpoints.

use std::rc::Rc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::TransportError;
use crate::executor::{Executor, with_timeout};
use crate::identity::Identifier;
use crate::start::SDK_VERSION;
use crate::transport::{HEADER_CLIENT_ID, HttpRequest, HttpResponse, HttpTransport};

pub const CONFIG_PATH: &str = "/cs/config";
pub const SESSION_PATH: &str = "/session";
pub const GENERATE_IDENTIFIER_PATH: &str = "/cs/generatecookie";
pub const STORE_IDENTIFIER_PATH: &str = "/cs/storecookie";
pub const SURFACE_PATH: &str = "/logo.htm";
pub const FINAL_BEACON_PATH: &str = "/fin";

/// Collector response to an identifier validation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierVerdict {
    Accepted,
    /// The collector does not know the identifier; a new one must be issued.
    Rejected,
    Inconclusive(u16),
}

#[derive(Debug, Deserialize)]
struct GeneratedIdentifier {
    value: Option<String>,
}

pub struct CollectorClient {
    collector_url: String,
    client_id: String,
    transport: Rc<dyn HttpTransport>,
    executor: Rc<dyn Executor>,
    config_timeout: Duration,
}

impl CollectorClient {
    #[must_use]
    pub fn new(
        collector_url: impl Into<String>,
        client_id: impl Into<String>,
        transport: Rc<dyn HttpTransport>,
        executor: Rc<dyn Executor>,
        config_timeout: Duration,
    ) -> Self {
        Self {
            collector_url: normalize_base_url(&collector_url.into()),
            client_id: client_id.into(),
            transport,
            executor,
            config_timeout,
        }
    }

    #[must_use]
    pub fn collector_url(&self) -> &str {
        &self.collector_url
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn transport(&self) -> &Rc<dyn HttpTransport> {
        &self.transport
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.collector_url)
    }

    /// `m`, `s` and `sv` query pairs shared by most endpoints.
    #[must_use]
    pub fn identity_query(&self, session_id: &str) -> String {
        format!(
            "m={}&s={}&sv={}",
            urlencoding::encode(&self.client_id),
            urlencoding::encode(session_id),
            urlencoding::encode(SDK_VERSION)
        )
    }

    #[must_use]
    pub fn config_url(&self, session_id: &str) -> String {
        format!("{}?{}", self.endpoint(CONFIG_PATH), self.identity_query(session_id))
    }

    #[must_use]
    pub fn session_url(&self, session_id: &str, previous_session_id: Option<&str>) -> String {
        let base = self.endpoint(&format!(
            "{SESSION_PATH}/{}",
            urlencoding::encode(session_id)
        ));
        match previous_session_id {
            Some(previous) => format!("{base}?previousSessionID={}", urlencoding::encode(previous)),
            None => base,
        }
    }

    #[must_use]
    pub fn generate_identifier_url(&self, session_id: &str) -> String {
        format!(
            "{}?{}",
            self.endpoint(GENERATE_IDENTIFIER_PATH),
            self.identity_query(session_id)
        )
    }

    #[must_use]
    pub fn surface_url(&self, session_id: &str) -> String {
        format!("{}?{}", self.endpoint(SURFACE_PATH), self.identity_query(session_id))
    }

    /// Fetches the raw server configuration, bounded by the config timeout.
    pub async fn fetch_configuration(&self, session_id: &str) -> Result<Value, TransportError> {
        let request = HttpRequest::get(self.config_url(session_id));
        debug!(url = %request.url, "fetching collector configuration");
        let timeout_ms = u64::try_from(self.config_timeout.as_millis()).unwrap_or(u64::MAX);
        let response = with_timeout(
            self.executor.as_ref(),
            self.config_timeout,
            self.transport.send(request),
        )
        .await
        .map_err(|_| TransportError::Timeout { timeout_ms })??;
        ensure_success(&response)?;
        response.json::<Value>()
    }

    /// Announces a session, optionally linking it to the one it replaces.
    pub async fn post_session(
        &self,
        session_id: &str,
        previous_session_id: Option<&str>,
    ) -> Result<(), TransportError> {
        let request = HttpRequest::post_form(self.session_url(session_id, previous_session_id), None)
            .with_header(HEADER_CLIENT_ID, self.client_id.clone());
        let response = self.transport.send(request).await?;
        match response.status {
            200 | 201 => Ok(()),
            status => Err(TransportError::Http {
                status,
                body: response.body,
            }),
        }
    }

    /// Asks the collector to issue a fresh identifier. An empty value yields `None`.
    pub async fn generate_identifier(
        &self,
        session_id: &str,
    ) -> Result<Option<Identifier>, TransportError> {
        let request = HttpRequest::get(self.generate_identifier_url(session_id));
        let response = self.transport.send(request).await?;
        ensure_success(&response)?;
        let generated = response.json::<GeneratedIdentifier>()?;
        Ok(generated.value.and_then(Identifier::new))
    }

    pub async fn validate_identifier(
        &self,
        session_id: &str,
        identifier: &Identifier,
    ) -> Result<IdentifierVerdict, TransportError> {
        let body = format!(
            "{}&k={}",
            self.identity_query(session_id),
            urlencoding::encode(identifier.as_str())
        );
        let request = HttpRequest::post_form(self.endpoint(STORE_IDENTIFIER_PATH), Some(body));
        let response = self.transport.send(request).await?;
        Ok(match response.status {
            200 => IdentifierVerdict::Accepted,
            500 => IdentifierVerdict::Rejected,
            status => IdentifierVerdict::Inconclusive(status),
        })
    }

    /// The end-of-collection beacon sent when the page unloads before completion.
    #[must_use]
    pub fn final_beacon_request(&self, session_id: &str) -> HttpRequest {
        let body = format!(
            "n=collect-end&com=false&et=0&s={}&m={}",
            urlencoding::encode(session_id),
            urlencoding::encode(&self.client_id)
        );
        HttpRequest::post_form(self.endpoint(FINAL_BEACON_PATH), Some(body))
    }
}

fn ensure_success(response: &HttpResponse) -> Result<(), TransportError> {
    if response.is_success() {
        return Ok(());
    }
    Err(TransportError::Http {
        status: response.status,
        body: response.body.clone(),
    })
}

fn normalize_base_url(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_string()
}
