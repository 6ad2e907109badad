//! SDK tunables: timeouts, polling granularity and the no-channel policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CONFIG_FETCH_TIMEOUT_MS: u64 = 3_000;
pub const DEFAULT_COLLECTION_COMPLETE_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_IDENTITY_WAIT_TIMEOUT_MS: u64 = 2_000;
pub const DEFAULT_IDENTITY_WAIT_INTERVAL_MS: u64 = 10;
pub const DEFAULT_NO_CHANNEL_GRACE_MS: u64 = 3_000;
pub const DEFAULT_COOKIE_LIFETIME_DAYS: u32 = 365;

pub const KEY_CONFIG_FETCH_TIMEOUT_MS: &str = "COLLECTOR_CONFIG_FETCH_TIMEOUT_MS";
pub const KEY_COLLECTION_COMPLETE_TIMEOUT_MS: &str = "COLLECTOR_COLLECTION_COMPLETE_TIMEOUT_MS";
pub const KEY_IDENTITY_WAIT_TIMEOUT_MS: &str = "COLLECTOR_IDENTITY_WAIT_TIMEOUT_MS";
pub const KEY_IDENTITY_WAIT_INTERVAL_MS: &str = "COLLECTOR_IDENTITY_WAIT_INTERVAL_MS";
pub const KEY_NO_CHANNEL_GRACE_MS: &str = "COLLECTOR_NO_CHANNEL_GRACE_MS";
pub const KEY_NO_CHANNEL_POLICY: &str = "COLLECTOR_NO_CHANNEL_POLICY";
pub const KEY_COOKIE_LIFETIME_DAYS: &str = "COLLECTOR_COOKIE_LIFETIME_DAYS";

/// What the handshake does when the page offers no cross-origin message channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoChannelPolicy {
    /// Fire `collect-end` after the grace period so the host is never left waiting.
    FireAfterGrace,
    /// Treat the missing channel as not applicable and fire nothing.
    NotApplicable,
}

impl NoChannelPolicy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FireAfterGrace => "fire_after_grace",
            Self::NotApplicable => "not_applicable",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "fire_after_grace" | "fire-after-grace" | "grace" => Some(Self::FireAfterGrace),
            "not_applicable" | "not-applicable" | "none" => Some(Self::NotApplicable),
            _ => None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("invalid {key}: {value}")]
    InvalidNumber { key: &'static str, value: String },
    #[error("invalid {KEY_NO_CHANNEL_POLICY}: {0}")]
    InvalidNoChannelPolicy(String),
    #[error("identity wait interval must be non-zero and not exceed the wait timeout")]
    InvalidIdentityWait,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SdkSettings {
    pub config_fetch_timeout_ms: u64,
    pub collection_complete_timeout_ms: u64,
    pub identity_wait_timeout_ms: u64,
    pub identity_wait_interval_ms: u64,
    pub no_channel_grace_ms: u64,
    pub no_channel_policy: NoChannelPolicy,
    pub cookie_lifetime_days: u32,
}

impl Default for SdkSettings {
    fn default() -> Self {
        Self {
            config_fetch_timeout_ms: DEFAULT_CONFIG_FETCH_TIMEOUT_MS,
            collection_complete_timeout_ms: DEFAULT_COLLECTION_COMPLETE_TIMEOUT_MS,
            identity_wait_timeout_ms: DEFAULT_IDENTITY_WAIT_TIMEOUT_MS,
            identity_wait_interval_ms: DEFAULT_IDENTITY_WAIT_INTERVAL_MS,
            no_channel_grace_ms: DEFAULT_NO_CHANNEL_GRACE_MS,
            no_channel_policy: NoChannelPolicy::FireAfterGrace,
            cookie_lifetime_days: DEFAULT_COOKIE_LIFETIME_DAYS,
        }
    }
}

impl SdkSettings {
    /// Defaults overridden by whichever `COLLECTOR_*` keys `lookup` answers.
    /// Blank values count as absent.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SettingsError> {
        let mut settings = Self::default();
        let read = |key: &'static str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        if let Some(value) = read(KEY_CONFIG_FETCH_TIMEOUT_MS) {
            settings.config_fetch_timeout_ms = parse_u64(KEY_CONFIG_FETCH_TIMEOUT_MS, &value)?;
        }
        if let Some(value) = read(KEY_COLLECTION_COMPLETE_TIMEOUT_MS) {
            settings.collection_complete_timeout_ms =
                parse_u64(KEY_COLLECTION_COMPLETE_TIMEOUT_MS, &value)?;
        }
        if let Some(value) = read(KEY_IDENTITY_WAIT_TIMEOUT_MS) {
            settings.identity_wait_timeout_ms = parse_u64(KEY_IDENTITY_WAIT_TIMEOUT_MS, &value)?;
        }
        if let Some(value) = read(KEY_IDENTITY_WAIT_INTERVAL_MS) {
            settings.identity_wait_interval_ms = parse_u64(KEY_IDENTITY_WAIT_INTERVAL_MS, &value)?;
        }
        if let Some(value) = read(KEY_NO_CHANNEL_GRACE_MS) {
            settings.no_channel_grace_ms = parse_u64(KEY_NO_CHANNEL_GRACE_MS, &value)?;
        }
        if let Some(value) = read(KEY_NO_CHANNEL_POLICY) {
            settings.no_channel_policy = NoChannelPolicy::parse(&value)
                .ok_or(SettingsError::InvalidNoChannelPolicy(value))?;
        }
        if let Some(value) = read(KEY_COOKIE_LIFETIME_DAYS) {
            settings.cookie_lifetime_days = value
                .parse::<u32>()
                .map_err(|_| SettingsError::InvalidNumber {
                    key: KEY_COOKIE_LIFETIME_DAYS,
                    value,
                })?;
        }

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.identity_wait_interval_ms == 0
            || self.identity_wait_interval_ms > self.identity_wait_timeout_ms
        {
            return Err(SettingsError::InvalidIdentityWait);
        }
        Ok(())
    }

    #[must_use]
    pub fn config_fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.config_fetch_timeout_ms)
    }

    #[must_use]
    pub fn collection_complete_timeout(&self) -> Duration {
        Duration::from_millis(self.collection_complete_timeout_ms)
    }

    #[must_use]
    pub fn identity_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.identity_wait_timeout_ms)
    }

    #[must_use]
    pub fn identity_wait_interval(&self) -> Duration {
        Duration::from_millis(self.identity_wait_interval_ms)
    }

    #[must_use]
    pub fn no_channel_grace(&self) -> Duration {
        Duration::from_millis(self.no_channel_grace_ms)
    }
}

fn parse_u64(key: &'static str, value: &str) -> Result<u64, SettingsError> {
    value.parse::<u64>().map_err(|_| SettingsError::InvalidNumber {
        key,
        value: value.to_string(),
    })
}
