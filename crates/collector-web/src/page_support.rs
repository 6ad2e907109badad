//! Pieces of the browser bindings that do not touch the DOM.

use std::time::Duration;

use collector_core::{MAX_REFRESH_INTERVAL_MS, SdkSettings, SettingsError, StartConfig};
use serde_json::Value;
use thiserror::Error;

pub const MESSAGE_EVENT: &str = "message";
pub const UNLOAD_EVENT: &str = "unload";

/// Inline style of the collection iframe: present in layout, invisible.
pub const SURFACE_STYLE: [(&str, &str); 4] = [
    ("border", "0px"),
    ("height", "1px"),
    ("width", "1px"),
    ("position", "absolute"),
];

pub const HIDDEN_INPUT_TYPE: &str = "hidden";

/// Optional start-configuration object of `COLLECTOR_*` tunables.
pub const SETTINGS_FIELD: &str = "settings";

#[derive(Debug, Error)]
pub enum StartRequestError {
    #[error("SDK Disabled: configuration is not an object")]
    NotAnObject,
    #[error("SDK Disabled: invalid configuration: {0}")]
    Invalid(#[from] serde_json::Error),
}

/// Decodes the JSON form of the host's start configuration. Function-valued
/// fields such as callbacks do not survive JSON and are attached separately.
pub fn parse_start_config(json: &str) -> Result<StartConfig, StartRequestError> {
    let value: Value = serde_json::from_str(json)?;
    if !value.is_object() {
        return Err(StartRequestError::NotAnObject);
    }
    Ok(serde_json::from_value(value)?)
}

/// SDK tunables from the `settings` object; defaults when there is none.
pub fn parse_settings(json: &str) -> Result<SdkSettings, SettingsError> {
    let value: Value = serde_json::from_str(json).unwrap_or(Value::Null);
    let Some(settings) = value.get(SETTINGS_FIELD).and_then(Value::as_object) else {
        return Ok(SdkSettings::default());
    };
    SdkSettings::from_lookup(|key| settings.get(key).map(setting_text))
}

fn setting_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[must_use]
pub fn log_filter(debug: bool) -> &'static str {
    if debug {
        "collector_core=debug,collector_web=debug"
    } else {
        "collector_core=warn,collector_web=warn"
    }
}

/// Selector for an existing named input inside a form.
#[must_use]
pub fn hidden_field_selector(field_name: &str) -> String {
    let escaped = field_name.replace('\\', "\\\\").replace('"', "\\\"");
    format!("input[name=\"{escaped}\"]")
}

/// `setTimeout` fires at once for delays past `i32::MAX` ms, and the timer
/// crate refuses them outright, so longer waits saturate.
#[must_use]
pub fn timer_delay(duration: Duration) -> Duration {
    duration.min(Duration::from_millis(MAX_REFRESH_INTERVAL_MS))
}

#[must_use]
pub fn errors_json(errors: &[String]) -> String {
    serde_json::to_string(errors).unwrap_or_else(|_| "[]".to_string())
}
