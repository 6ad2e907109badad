//! The three identity stores (cookie jar, durable local storage, per-tab
//! session storage) and the in-memory implementations used off-browser.
//!
//! Failures never escape this module: reads that fail are recorded and
//! treated as absent, writes that fail are recorded and skipped.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::LazyLock;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use tracing::debug;

use crate::diagnostics::ErrorLog;
use crate::error::StorageError;
use crate::identity::Identifier;
use crate::signal::SettleSignal;

pub const IDENTITY_COOKIE_NAME: &str = "clientside-cookie";
pub const IDENTITY_LOCAL_KEY: &str = "clientside-local";
pub const IDENTITY_SESSION_KEY: &str = "kountCookie";
pub const SESSION_ID_KEY: &str = "KountSessionID";

const COOKIE_EXPIRES_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

static LEGACY_IDENTITY_COOKIE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(cdn[.][a-z]+[.][0-9]+[.]ka.ck)").ok());

/// A string key-value store with `localStorage`/`sessionStorage` semantics.
pub trait StorageArea {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn clear(&self) -> Result<(), StorageError>;
}

/// `document.cookie` semantics: reads return every visible cookie as one
/// `name=value; name=value` string, writes take a full cookie line.
pub trait CookieJar {
    fn cookie_header(&self) -> Result<String, StorageError>;
    fn write_cookie(&self, cookie: &str) -> Result<(), StorageError>;
    fn is_secure_origin(&self) -> bool;
}

/// Value of the cookie named `name`, ignoring entries that do not split into
/// exactly one name and one value.
#[must_use]
pub fn find_cookie(cookies: &str, name: &str) -> Option<String> {
    cookies.split(';').find_map(|entry| {
        let (key, value) = split_cookie_entry(entry)?;
        (key == name && !value.is_empty()).then(|| value.to_string())
    })
}

/// Value of the first cookie whose entry matches the legacy identity cookie name.
#[must_use]
pub fn find_legacy_cookie(cookies: &str) -> Option<String> {
    let pattern = LEGACY_IDENTITY_COOKIE.as_ref()?;
    cookies.split(';').find_map(|entry| {
        let entry = entry.trim();
        if !pattern.is_match(entry) {
            return None;
        }
        let (_, value) = split_cookie_entry(entry)?;
        (!value.is_empty()).then(|| value.to_string())
    })
}

fn split_cookie_entry(entry: &str) -> Option<(&str, &str)> {
    let mut parts = entry.trim().split('=');
    let key = parts.next()?;
    let value = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    Some((key, value))
}

/// Full cookie line for the identity cookie. Secure origins get
/// `SameSite=None; Secure`, everything else `SameSite=Lax`.
#[must_use]
pub fn format_identity_cookie(value: &str, expires: DateTime<Utc>, secure: bool) -> String {
    let attributes = if secure {
        "; SameSite=None; Secure"
    } else {
        "; SameSite=Lax"
    };
    format!(
        "{IDENTITY_COOKIE_NAME}={value};expires={};path=/{attributes}",
        expires.format(COOKIE_EXPIRES_FORMAT)
    )
}

#[derive(Clone)]
pub struct IdentityStores {
    cookies: Rc<dyn CookieJar>,
    local: Rc<dyn StorageArea>,
    session: Rc<dyn StorageArea>,
    errors: ErrorLog,
    settled: SettleSignal,
    cookie_lifetime_days: u32,
}

impl IdentityStores {
    #[must_use]
    pub fn new(
        cookies: Rc<dyn CookieJar>,
        local: Rc<dyn StorageArea>,
        session: Rc<dyn StorageArea>,
        errors: ErrorLog,
        cookie_lifetime_days: u32,
    ) -> Self {
        Self {
            cookies,
            local,
            session,
            errors,
            settled: SettleSignal::new(),
            cookie_lifetime_days,
        }
    }

    /// Notified on every write to the session identity marker.
    #[must_use]
    pub fn settle_signal(&self) -> &SettleSignal {
        &self.settled
    }

    /// Reads the identity cookie, migrating a legacy cookie when only that one exists.
    pub fn read_cookie_identifier(&self) -> Option<Identifier> {
        let header = match self.cookies.cookie_header() {
            Ok(header) => header,
            Err(error) => {
                self.errors.record(format!("read identity cookie: {error}"));
                return None;
            }
        };
        let decoded = match urlencoding::decode(&header) {
            Ok(decoded) => decoded.into_owned(),
            Err(error) => {
                self.errors.record(format!("read identity cookie: {error}"));
                return None;
            }
        };

        if let Some(value) = find_cookie(&decoded, IDENTITY_COOKIE_NAME) {
            return Identifier::new(value);
        }

        let legacy = find_legacy_cookie(&decoded).and_then(Identifier::new)?;
        debug!(identifier = %legacy, "migrating legacy identity cookie");
        self.write_cookie_identifier(&legacy);
        Some(legacy)
    }

    pub fn read_local_identifier(&self) -> Option<Identifier> {
        match self.local.get_item(IDENTITY_LOCAL_KEY) {
            Ok(value) => value.and_then(Identifier::new),
            Err(error) => {
                self.errors.record(format!("read identity local storage: {error}"));
                None
            }
        }
    }

    pub fn write_cookie_identifier(&self, identifier: &Identifier) {
        let expires = Utc::now() + Duration::days(i64::from(self.cookie_lifetime_days));
        let cookie = format_identity_cookie(
            identifier.as_str(),
            expires,
            self.cookies.is_secure_origin(),
        );
        if let Err(error) = self.cookies.write_cookie(&cookie) {
            self.errors.record(format!("store identity cookie: {error}"));
        }
    }

    pub fn write_local_identifier(&self, identifier: &Identifier) {
        if let Err(error) = self.local.set_item(IDENTITY_LOCAL_KEY, identifier.as_str()) {
            self.errors
                .record(format!("store identity local storage: {error}"));
        }
    }

    /// The session marker; empty means not yet settled for this pass.
    #[must_use]
    pub fn session_marker(&self) -> Option<Identifier> {
        match self.session.get_item(IDENTITY_SESSION_KEY) {
            Ok(value) => value.and_then(Identifier::new),
            Err(error) => {
                debug!(%error, "session marker unreadable");
                None
            }
        }
    }

    pub fn write_session_marker(&self, value: &str) {
        match self.session.set_item(IDENTITY_SESSION_KEY, value) {
            Ok(()) => self.settled.notify(),
            Err(error) => self
                .errors
                .record(format!("store identity session storage: {error}")),
        }
    }

    pub fn read_session_id(&self) -> Option<String> {
        match self.session.get_item(SESSION_ID_KEY) {
            Ok(value) => value,
            Err(error) => {
                self.errors.record(format!("read session id: {error}"));
                None
            }
        }
    }

    pub fn write_session_id(&self, session_id: &str) {
        if let Err(error) = self.session.set_item(SESSION_ID_KEY, session_id) {
            self.errors.record(format!("store session id: {error}"));
        }
    }

    pub fn write_session_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.session.set_item(key, value)
    }

    pub fn clear_session_area(&self) {
        match self.session.clear() {
            Ok(()) => self.settled.notify(),
            Err(error) => self.errors.record(format!("clear session storage: {error}")),
        }
    }
}

/// In-memory [`StorageArea`] with write counting and failure injection.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: RefCell<BTreeMap<String, String>>,
    writes: Cell<usize>,
    failing: Cell<bool>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_item(self, key: &str, value: &str) -> Self {
        self.items
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        self
    }

    #[must_use]
    pub fn item(&self, key: &str) -> Option<String> {
        self.items.borrow().get(key).cloned()
    }

    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.get()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.set(failing);
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.failing.get() {
            return Err(StorageError::Unavailable("storage disabled".to_string()));
        }
        Ok(())
    }
}

impl StorageArea for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.check()?;
        Ok(self.item(key))
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.check()?;
        self.writes.set(self.writes.get() + 1);
        self.items
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.check()?;
        self.items.borrow_mut().clear();
        Ok(())
    }
}

/// In-memory [`CookieJar`]; keeps only name and value of each written line.
#[derive(Debug, Default)]
pub struct MemoryCookieJar {
    cookies: RefCell<BTreeMap<String, String>>,
    last_written: RefCell<Option<String>>,
    writes: Cell<usize>,
    secure: bool,
    failing: Cell<bool>,
}

impl MemoryCookieJar {
    #[must_use]
    pub fn new(secure: bool) -> Self {
        Self {
            secure,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_cookie(self, name: &str, value: &str) -> Self {
        self.cookies
            .borrow_mut()
            .insert(name.to_string(), value.to_string());
        self
    }

    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<String> {
        self.cookies.borrow().get(name).cloned()
    }

    #[must_use]
    pub fn last_written(&self) -> Option<String> {
        self.last_written.borrow().clone()
    }

    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.get()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.set(failing);
    }
}

impl CookieJar for MemoryCookieJar {
    fn cookie_header(&self) -> Result<String, StorageError> {
        if self.failing.get() {
            return Err(StorageError::Unavailable("cookies disabled".to_string()));
        }
        Ok(self
            .cookies
            .borrow()
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; "))
    }

    fn write_cookie(&self, cookie: &str) -> Result<(), StorageError> {
        if self.failing.get() {
            return Err(StorageError::WriteRejected("cookies disabled".to_string()));
        }
        let pair = cookie.split(';').next().unwrap_or_default();
        let (name, value) = pair
            .split_once('=')
            .ok_or_else(|| StorageError::WriteRejected(format!("malformed cookie: {cookie}")))?;
        self.writes.set(self.writes.get() + 1);
        self.cookies
            .borrow_mut()
            .insert(name.trim().to_string(), value.to_string());
        *self.last_written.borrow_mut() = Some(cookie.to_string());
        Ok(())
    }

    fn is_secure_origin(&self) -> bool {
        self.secure
    }
}
