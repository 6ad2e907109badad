//! Start-time configuration and its validation.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::callbacks::CallbackRegistry;

pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const TEST_COLLECTOR_HOSTNAME: &str = "tst.kaptcha.com";
pub const PROD_COLLECTOR_HOSTNAME: &str = "ssl.kaptcha.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Test,
    Prod,
}

impl Environment {
    /// Case-insensitive; surrounding whitespace is ignored.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "TEST" => Some(Self::Test),
            "PROD" => Some(Self::Prod),
            _ => None,
        }
    }

    #[must_use]
    pub fn hostname(self) -> &'static str {
        match self {
            Self::Test => TEST_COLLECTOR_HOSTNAME,
            Self::Prod => PROD_COLLECTOR_HOSTNAME,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Test => "TEST",
            Self::Prod => "PROD",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StartError {
    #[error("SDK Disabled: clientID required.")]
    MissingClientId,
    #[error("SDK Disabled: unresolved hostname.")]
    UnresolvedHostname,
    #[error("SDK Disabled: invalid isSinglePageApp.")]
    MissingSinglePageApp,
    #[error("SDK Disabled: sessionID required.")]
    MissingSessionId,
}

/// Host-supplied start configuration, as passed to `start`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartConfig {
    #[serde(rename = "clientID", alias = "clientId")]
    pub client_id: Option<String>,
    pub hostname: Option<String>,
    pub environment: Option<String>,
    pub is_single_page_app: Option<bool>,
    #[serde(rename = "isDebugEnabled", alias = "debug")]
    pub debug: Option<bool>,
    /// Opaque trigger description forwarded to the companion script.
    pub triggers: Option<Value>,
    #[serde(skip)]
    pub callbacks: CallbackRegistry,
}

impl StartConfig {
    #[must_use]
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: Some(client_id.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    #[must_use]
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    #[must_use]
    pub fn with_single_page_app(mut self, is_single_page_app: bool) -> Self {
        self.is_single_page_app = Some(is_single_page_app);
        self
    }

    #[must_use]
    pub fn with_callbacks(mut self, callbacks: CallbackRegistry) -> Self {
        self.callbacks = callbacks;
        self
    }

    /// Checks run in a fixed order so the first missing field is the one reported.
    pub fn validate(&self, session_id: &str) -> Result<ResolvedStart, StartError> {
        let client_id = self
            .client_id
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or(StartError::MissingClientId)?;

        let hostname = resolve_hostname(self.hostname.as_deref(), self.environment.as_deref())
            .ok_or(StartError::UnresolvedHostname)?;

        let is_single_page_app = self
            .is_single_page_app
            .ok_or(StartError::MissingSinglePageApp)?;

        let session_id = session_id.trim();
        if session_id.is_empty() {
            return Err(StartError::MissingSessionId);
        }

        Ok(ResolvedStart {
            client_id: client_id.to_string(),
            collector_url: format!("https://{hostname}"),
            hostname,
            is_single_page_app,
            debug: self.debug.unwrap_or(false),
            triggers: self.triggers.clone(),
            session_id: session_id.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedStart {
    pub client_id: String,
    pub hostname: String,
    pub collector_url: String,
    pub is_single_page_app: bool,
    pub debug: bool,
    pub triggers: Option<Value>,
    pub session_id: String,
}

/// Non-empty and made only of ASCII letters, digits and dots.
#[must_use]
pub fn is_hostname_valid(hostname: &str) -> bool {
    !hostname.is_empty()
        && hostname
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '.')
}

/// An explicit hostname always takes precedence over the environment, even
/// when it is invalid (which leaves the hostname unresolved).
#[must_use]
pub fn resolve_hostname(hostname: Option<&str>, environment: Option<&str>) -> Option<String> {
    if let Some(hostname) = hostname {
        if !is_hostname_valid(hostname) {
            warn!(hostname, "invalid hostname");
            return None;
        }
        if environment.is_some_and(|environment| !environment.is_empty()) {
            warn!(hostname, "both environment and hostname provided, using hostname");
        }
        return Some(hostname.to_string());
    }

    let resolved = environment.and_then(Environment::parse);
    if resolved.is_none() {
        warn!(environment = environment.unwrap_or_default(), "invalid environment");
    }
    resolved.map(|environment| environment.hostname().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_is_case_insensitive() {
        assert_eq!(Environment::parse(" test "), Some(Environment::Test));
        assert_eq!(Environment::parse("Prod"), Some(Environment::Prod));
        assert_eq!(Environment::parse("staging"), None);
    }

    #[test]
    fn hostname_validity() {
        assert!(is_hostname_valid("collector.example.com"));
        assert!(is_hostname_valid("abc123"));
        assert!(!is_hostname_valid(""));
        assert!(!is_hostname_valid("bad host"));
        assert!(!is_hostname_valid("evil.com/path"));
        assert!(!is_hostname_valid("host-name.com"));
    }

    #[test]
    fn explicit_hostname_wins_over_environment() {
        assert_eq!(
            resolve_hostname(Some("collector.example.com"), Some("PROD")).as_deref(),
            Some("collector.example.com")
        );
        assert_eq!(resolve_hostname(Some("bad/host"), Some("TEST")), None);
        assert_eq!(resolve_hostname(Some(""), Some("TEST")), None);
        assert_eq!(resolve_hostname(None, Some("prod")).as_deref(), Some(PROD_COLLECTOR_HOSTNAME));
        assert_eq!(resolve_hostname(Some("bad/host"), None), None);
        assert_eq!(resolve_hostname(None, None), None);
    }

    #[test]
    fn validation_reports_first_missing_field() {
        let config = StartConfig::default();
        assert_eq!(config.validate("sess"), Err(StartError::MissingClientId));

        let config = StartConfig::new("client");
        assert_eq!(config.validate("sess"), Err(StartError::UnresolvedHostname));

        let config = StartConfig::new("client").with_environment("TEST");
        assert_eq!(config.validate("sess"), Err(StartError::MissingSinglePageApp));

        let config = StartConfig::new("client")
            .with_environment("TEST")
            .with_single_page_app(false);
        assert_eq!(config.validate("  "), Err(StartError::MissingSessionId));
    }

    #[test]
    fn validation_resolves_collector_url() {
        let resolved = StartConfig::new("client")
            .with_environment("TEST")
            .with_single_page_app(true)
            .validate("sess-1")
            .expect("valid config");

        assert_eq!(resolved.collector_url, "https://tst.kaptcha.com");
        assert_eq!(resolved.session_id, "sess-1");
        assert!(resolved.is_single_page_app);
        assert!(!resolved.debug);
    }

    #[test]
    fn deserializes_host_field_names() {
        let config: StartConfig = serde_json::from_value(serde_json::json!({
            "clientID": "900900",
            "environment": "TEST",
            "isSinglePageApp": false,
            "isDebugEnabled": true,
            "triggers": {"login": ["#submit"]}
        }))
        .expect("deserialize");

        assert_eq!(config.client_id.as_deref(), Some("900900"));
        assert_eq!(config.is_single_page_app, Some(false));
        assert_eq!(config.debug, Some(true));
        assert!(config.triggers.is_some());
    }
}
