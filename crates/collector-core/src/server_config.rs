//! Translation of the collector's JSON configuration into [`Configuration`].
//!
//! Translation is total: any missing or mistyped field falls back to a
//! documented default, and the problems found are returned alongside.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_REFRESH_INTERVAL_MS: u64 = 900_000;
/// Longest delay a browser timer honours; larger values fire immediately.
pub const MAX_REFRESH_INTERVAL_MS: u64 = 2_147_483_647;

const FLAG_NAMES: [&str; 6] = ["app", "battery", "browser", "exp", "page", "ui"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeatureFlags {
    pub app: bool,
    pub battery: bool,
    pub browser: bool,
    #[serde(rename = "exp")]
    pub experiment: bool,
    pub page: bool,
    pub ui: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            app: true,
            battery: true,
            browser: true,
            experiment: true,
            page: true,
            ui: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionConfig {
    pub enabled: bool,
    /// Absent when collection is switched off.
    pub feature_flags: Option<FeatureFlags>,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            feature_flags: Some(FeatureFlags::default()),
        }
    }
}

/// Optional behavioral companion script.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CompanionConfig {
    #[default]
    Disabled,
    Enabled { org_id: String, subdomain: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Configuration {
    pub refresh_interval_ms: u64,
    pub collection: CollectionConfig,
    pub companion: CompanionConfig,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            refresh_interval_ms: DEFAULT_REFRESH_INTERVAL_MS,
            collection: CollectionConfig::default(),
            companion: CompanionConfig::Disabled,
        }
    }
}

impl Configuration {
    #[must_use]
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigIssue {
    #[error("invalid response JSON: collection section missing")]
    MissingCollection,
    #[error("invalid response JSON: collection.feature_flags missing")]
    MissingFeatureFlags,
    #[error("collection.collect is not boolean: {found}")]
    CollectNotBoolean { found: &'static str },
    #[error("feature flag {flag} is not boolean: {found}")]
    FlagNotBoolean { flag: &'static str, found: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translation {
    pub configuration: Configuration,
    pub issues: Vec<ConfigIssue>,
}

#[must_use]
pub fn translate(payload: &Value) -> Translation {
    let mut issues = Vec::new();
    let collection = match translate_collection(payload) {
        Ok(collection) => collection,
        Err(issue) => {
            issues.push(issue);
            CollectionConfig::default()
        }
    };

    Translation {
        configuration: Configuration {
            refresh_interval_ms: translate_refresh_interval(payload.get("ttlms")),
            collection,
            companion: translate_companion(payload.get("da")),
        },
        issues,
    }
}

fn translate_refresh_interval(raw: Option<&Value>) -> u64 {
    raw.and_then(positive_whole_millis)
        .map_or(DEFAULT_REFRESH_INTERVAL_MS, |interval| {
            interval.min(MAX_REFRESH_INTERVAL_MS)
        })
}

/// Integers and integral floats (`60000.0`) above zero.
fn positive_whole_millis(value: &Value) -> Option<u64> {
    if let Some(interval) = value.as_u64() {
        return (interval > 0).then_some(interval);
    }
    let interval = value.as_f64()?;
    if !interval.is_finite() || interval < 1.0 || interval.fract() > 0.0 {
        return None;
    }
    if interval >= MAX_REFRESH_INTERVAL_MS as f64 {
        return Some(MAX_REFRESH_INTERVAL_MS);
    }
    Some(interval as u64)
}

fn translate_collection(payload: &Value) -> Result<CollectionConfig, ConfigIssue> {
    let Some(section) = payload.get("collection") else {
        return Err(ConfigIssue::MissingCollection);
    };
    let Some(flags) = section.get("feature_flags") else {
        return Err(ConfigIssue::MissingFeatureFlags);
    };
    let collect = match section.get("collect") {
        Some(Value::Bool(collect)) => *collect,
        other => {
            return Err(ConfigIssue::CollectNotBoolean {
                found: json_type_name(other),
            });
        }
    };

    if !collect {
        return Ok(CollectionConfig {
            enabled: false,
            feature_flags: None,
        });
    }

    let mut values = [false; FLAG_NAMES.len()];
    for (slot, flag) in values.iter_mut().zip(FLAG_NAMES) {
        match flags.get(flag) {
            Some(Value::Bool(value)) => *slot = *value,
            other => {
                return Err(ConfigIssue::FlagNotBoolean {
                    flag,
                    found: json_type_name(other),
                });
            }
        }
    }
    let [app, battery, browser, experiment, page, ui] = values;

    Ok(CollectionConfig {
        enabled: true,
        feature_flags: Some(FeatureFlags {
            app,
            battery,
            browser,
            experiment,
            page,
            ui,
        }),
    })
}

fn translate_companion(raw: Option<&Value>) -> CompanionConfig {
    let Some(section) = raw.filter(|section| is_truthy(section)) else {
        debug!("companion script disabled");
        return CompanionConfig::Disabled;
    };

    let field = |name: &str| {
        section
            .get(name)
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };
    match (field("orgId"), field("subdomain")) {
        (Some(org_id), Some(subdomain)) => CompanionConfig::Enabled { org_id, subdomain },
        (org_id, subdomain) => {
            debug!(
                has_org_id = org_id.is_some(),
                has_subdomain = subdomain.is_some(),
                "companion section incomplete"
            );
            CompanionConfig::Disabled
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(value) => *value,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(value) => !value.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn json_type_name(value: Option<&Value>) -> &'static str {
    match value {
        None => "undefined",
        Some(Value::Bool(_)) => "boolean",
        Some(Value::Number(_)) => "number",
        Some(Value::String(_)) => "string",
        Some(Value::Null | Value::Array(_) | Value::Object(_)) => "object",
    }
}
