use collector_core::{CookieJar, StorageArea, StorageError};
use wasm_bindgen::JsCast;
use web_sys::HtmlDocument;

#[derive(Debug, Clone, Copy)]
enum StorageKind {
    Local,
    Session,
}

impl StorageKind {
    fn label(self) -> &'static str {
        match self {
            Self::Local => "localStorage",
            Self::Session => "sessionStorage",
        }
    }
}

/// `localStorage` or `sessionStorage`, resolved on every access so a store
/// that becomes unavailable mid-session degrades to errors.
pub(super) struct WebStorage {
    kind: StorageKind,
}

impl WebStorage {
    pub(super) fn local() -> Self {
        Self {
            kind: StorageKind::Local,
        }
    }

    pub(super) fn session() -> Self {
        Self {
            kind: StorageKind::Session,
        }
    }

    fn area(&self) -> Result<web_sys::Storage, StorageError> {
        let label = self.kind.label();
        let window =
            web_sys::window().ok_or_else(|| StorageError::Unavailable("window".to_string()))?;
        let storage = match self.kind {
            StorageKind::Local => window.local_storage(),
            StorageKind::Session => window.session_storage(),
        };
        storage
            .map_err(|_| StorageError::Unavailable(format!("{label} access denied")))?
            .ok_or_else(|| StorageError::Unavailable(label.to_string()))
    }
}

impl StorageArea for WebStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.area()?
            .get_item(key)
            .map_err(|_| StorageError::Unavailable(format!("{} read {key}", self.kind.label())))
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.area()?
            .set_item(key, value)
            .map_err(|_| StorageError::WriteRejected(format!("{} write {key}", self.kind.label())))
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.area()?
            .clear()
            .map_err(|_| StorageError::WriteRejected(format!("{} clear", self.kind.label())))
    }
}

/// `document.cookie`.
pub(super) struct WebCookieJar;

fn html_document() -> Result<HtmlDocument, StorageError> {
    web_sys::window()
        .and_then(|window| window.document())
        .and_then(|document| document.dyn_into::<HtmlDocument>().ok())
        .ok_or_else(|| StorageError::Unavailable("document".to_string()))
}

impl CookieJar for WebCookieJar {
    fn cookie_header(&self) -> Result<String, StorageError> {
        html_document()?
            .cookie()
            .map_err(|_| StorageError::Unavailable("document.cookie".to_string()))
    }

    fn write_cookie(&self, cookie: &str) -> Result<(), StorageError> {
        html_document()?
            .set_cookie(cookie)
            .map_err(|_| StorageError::WriteRejected("document.cookie".to_string()))
    }

    fn is_secure_origin(&self) -> bool {
        web_sys::window()
            .and_then(|window| window.location().protocol().ok())
            .is_some_and(|protocol| protocol == "https:")
    }
}
