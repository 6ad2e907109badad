//! Optional behavioral companion script.

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::context::SdkContext;

/// Session-storage key the companion script reads its descriptor from.
pub const COMPANION_SESSION_KEY: &str = "cx";
pub const COMPANION_PARTNER: &str = "Kount";

#[must_use]
pub fn companion_origin(subdomain: &str) -> String {
    format!("https://{subdomain}.callsign.com")
}

#[must_use]
pub fn companion_script_url(subdomain: &str) -> String {
    format!("{}/in/web-sdk/v1/static/web-sdk.js", companion_origin(subdomain))
}

/// Field names are fixed by the companion script.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompanionDescriptor {
    pub essx: String,
    pub esto: String,
    pub ggow: String,
    pub mosc: String,
    pub mwel: String,
    pub mwelseq: u32,
    pub mwelsub: String,
    pub loco: bool,
    pub ewps: bool,
    pub reed: bool,
    /// Triggers, serialized to a JSON string.
    pub sanf: String,
    pub timestamp: i64,
}

impl CompanionDescriptor {
    #[must_use]
    pub fn new(
        subdomain: &str,
        org_id: &str,
        session_id: &str,
        triggers: &Value,
        timestamp_ms: i64,
    ) -> Self {
        Self {
            essx: companion_origin(subdomain),
            esto: org_id.to_string(),
            ggow: session_id.to_string(),
            mosc: session_id.to_string(),
            mwel: COMPANION_PARTNER.to_string(),
            mwelseq: 1,
            mwelsub: COMPANION_PARTNER.to_string(),
            loco: false,
            ewps: false,
            reed: true,
            sanf: triggers.to_string(),
            timestamp: timestamp_ms,
        }
    }
}

/// Loads the companion script and publishes its descriptor. Failures are
/// logged and otherwise ignored.
pub(crate) fn inject_companion(ctx: &SdkContext, org_id: &str, subdomain: &str) {
    let Some(triggers) = ctx.triggers.as_ref() else {
        debug!("companion script skipped: triggers missing");
        return;
    };

    if let Err(error) = ctx.page.load_script(&companion_script_url(subdomain)) {
        debug!(%error, "companion script not loaded");
        return;
    }

    let descriptor = CompanionDescriptor::new(
        subdomain,
        org_id,
        &ctx.session_id(),
        triggers,
        Utc::now().timestamp_millis(),
    );
    let stored = serde_json::to_string(&descriptor)
        .map_err(|error| error.to_string())
        .and_then(|json| {
            ctx.stores
                .write_session_item(COMPANION_SESSION_KEY, &json)
                .map_err(|error| error.to_string())
        });
    match stored {
        Ok(()) => debug!(subdomain, "companion descriptor stored"),
        Err(error) => debug!(%error, "companion descriptor not stored"),
    }
}
