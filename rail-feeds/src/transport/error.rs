//! Transport error types.
//!
//! Every transport client reports failures with [`TransportError`]. The
//! variants mirror how callers react: `NotConfigured` is an expected state,
//! `Connection` triggers reconnection, `Timeout` fails one call and leaves
//! the client usable, `NotFound` is a valid empty answer.

use std::fmt;
use std::time::Duration;

/// Failure to decode one feed message. Never fatal to a subscription.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Payload is not valid JSON for the expected shape
    #[error("JSON decode error: {0}")]
    Json(String),

    /// Payload is not well-formed XML
    #[error("XML decode error: {0}")]
    Xml(String),

    /// Compressed payload could not be inflated
    #[error("decompression error: {0}")]
    Compression(String),

    /// A required field was absent or blank
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// A field was present but invalid
    #[error("invalid {field}: {value:?}")]
    InvalidField { field: &'static str, value: String },
}

impl DecodeError {
    pub(crate) fn invalid(field: &'static str, value: impl Into<String>) -> Self {
        DecodeError::InvalidField {
            field,
            value: value.into(),
        }
    }
}

/// Errors from transport clients.
#[derive(Debug)]
pub enum TransportError {
    /// Credentials or endpoint missing; the feed is disabled
    NotConfigured(String),

    /// Connection could not be established or was lost
    Connection(String),

    /// Request exceeded its time bound
    Timeout(Duration),

    /// Response payload could not be decoded
    Decode(DecodeError),

    /// Valid request, no data (expired service ID, station with no services)
    NotFound(String),

    /// Credentials were rejected
    Unauthorized,

    /// Upstream asked us to slow down
    RateLimited,

    /// Upstream returned an error status or fault
    Api { status: u16, message: String },

    /// HTTP client failure
    Http(reqwest::Error),
}

impl TransportError {
    /// Whether a reconnect/retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::Connection(_)
                | TransportError::Timeout(_)
                | TransportError::RateLimited
                | TransportError::Http(_)
        )
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::NotConfigured(what) => write!(f, "not configured: {what}"),
            TransportError::Connection(msg) => write!(f, "connection error: {msg}"),
            TransportError::Timeout(d) => write!(f, "timed out after {}ms", d.as_millis()),
            TransportError::Decode(e) => write!(f, "{e}"),
            TransportError::NotFound(what) => write!(f, "not found: {what}"),
            TransportError::Unauthorized => write!(f, "unauthorized (credentials rejected)"),
            TransportError::RateLimited => write!(f, "rate limited by upstream"),
            TransportError::Api { status, message } => write!(f, "API error {status}: {message}"),
            TransportError::Http(e) => write!(f, "HTTP error: {e}"),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransportError::Http(e) => Some(e),
            TransportError::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        TransportError::Http(err)
    }
}

impl From<DecodeError> for TransportError {
    fn from(err: DecodeError) -> Self {
        TransportError::Decode(err)
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Connection(err.to_string())
    }
}
