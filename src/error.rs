//! Error types for the Bugzilla REST client.

use crate::object::ResourceKind;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the client.
///
/// Only [`Error::Fetch`] is meant to be retried by the caller; every other
/// kind indicates a programming or schema-compatibility problem and is
/// surfaced as-is. A missing field is never silently turned into a default
/// value.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The field is genuinely absent, after any applicable lazy fetch.
    #[error("field '{field}' not found")]
    KeyNotFound { field: String },

    /// A lazy full-fetch attempt failed. The proxy is back in the partial
    /// state; a later access retries.
    #[error("lazy fetch failed: {reason}")]
    Fetch { reason: String },

    /// The response JSON did not match the expected shape for the
    /// kind/operation.
    #[error("decode error: {0}")]
    Decode(String),

    /// No request template is registered for this kind/operation pair.
    #[error("unsupported operation {operation} for {kind}")]
    UnsupportedOperation {
        kind: ResourceKind,
        operation: &'static str,
    },

    /// Opaque failure at the transport boundary: network error, non-2xx
    /// status without an API error envelope, or a malformed JSON body.
    #[error("transport fault: {reason}")]
    Transport {
        reason: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    /// The server returned a Bugzilla API error envelope.
    #[error("bugzilla error code {code}: {message}")]
    Api { code: i64, message: String },

    /// A record is missing fields required by the create/update endpoint.
    /// Raised before any network call.
    #[error("{kind} record does not have the required fields set")]
    IncompleteRecord { kind: ResourceKind },
}

impl Error {
    pub fn key_not_found(field: impl Into<String>) -> Self {
        Error::KeyNotFound {
            field: field.into(),
        }
    }

    pub(crate) fn decode(kind: ResourceKind, reason: impl std::fmt::Display) -> Self {
        Error::Decode(format!("cannot decode {kind}: {reason}"))
    }

    pub(crate) fn transport(reason: impl Into<String>) -> Self {
        Error::Transport {
            reason: reason.into(),
            source: None,
        }
    }

    /// True for errors the caller can meaningfully retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Fetch { .. })
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Transport {
            reason: err.to_string(),
            source: Some(err),
        }
    }
}
