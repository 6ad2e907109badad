//! Error types shared across the SDK.
//!
//! None of these ever reach the host page after a successful start; they are
//! converted into [`ErrorLog`](crate::ErrorLog) entries at the point where the
//! SDK recovers.

use thiserror::Error;

/// A backing store (cookie jar, local or session storage) failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("storage write rejected: {0}")]
    WriteRejected(String),
}

/// A collector request failed before producing a usable response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("collector_request_failed:{message}")]
    Request { message: String },
    #[error("collector_timeout_after_{timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("collector_http_{status}:{body}")]
    Http { status: u16, body: String },
    #[error("collector_json_decode_failed:{message}")]
    Decode { message: String },
}

/// A cross-origin message could not be accepted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("message origin {origin} does not match collector {expected}")]
    UnexpectedOrigin { origin: String, expected: String },
    #[error("malformed collector message: {0}")]
    Malformed(String),
}

/// A page operation (surface, form, script) failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PageError {
    #[error("page unavailable: {0}")]
    Unavailable(String),
    #[error("form not found: {0}")]
    FormNotFound(String),
    #[error("dom operation failed: {0}")]
    Dom(String),
}
