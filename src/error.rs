use std::{fmt, time::Duration};

/// Boxed error returned by plugins, hooks and custom transports.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Why an attempt was cancelled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AbortReason {
    /// The configured timeout elapsed before the transport settled.
    Timeout(Duration),
    /// The caller-supplied cancellation token fired.
    Signal,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout(after) => write!(f, "timed out after {} ms", after.as_millis()),
            Self::Signal => f.write_str("cancelled by caller signal"),
        }
    }
}

/// Schema mismatch reported by a [`Validator`](crate::Validator).
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ValidationError {
    pub message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Network or request execution error raised by the transport.
    #[error("transport error: {0}")]
    Transport(BoxError),
    /// The attempt was cancelled before the transport settled.
    #[error("request aborted: {reason}")]
    Aborted { reason: AbortReason },
    /// Non-success HTTP status, raised only when `throw` is enabled.
    #[error("http error {status} {status_text}")]
    Http {
        status: u16,
        status_text: String,
        /// Best-effort parsed response body.
        body: serde_json::Value,
    },
    /// The assembled URL is not an absolute URL.
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    /// A header value could not be built.
    #[error("invalid header: {0}")]
    InvalidHeader(String),
    /// The explicit HTTP method is not a valid token.
    #[error("invalid method: {0}")]
    InvalidMethod(String),
    /// Request body could not be encoded.
    #[error("encode error: {0}")]
    Encode(String),
    /// Success response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
    /// Output, input or query schema rejected a value.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),
    /// A plugin failed; the call was aborted before any network activity.
    #[error("plugin '{id}' failed: {source}")]
    Plugin { id: String, source: BoxError },
    /// A lifecycle hook failed.
    #[error("{hook} hook failed: {source}")]
    Hook {
        hook: &'static str,
        source: BoxError,
    },
    /// A strict route registry has no schema for the requested URL.
    #[error("unknown route: {0}")]
    UnknownRoute(String),
    /// A streaming body was consumed by an earlier attempt.
    #[error("stream body was already consumed by a previous attempt")]
    BodyConsumed,
    /// Client configuration could not be loaded.
    #[error("config error: {0}")]
    Config(String),
}

impl FetchError {
    pub(crate) fn transport(err: impl Into<BoxError>) -> Self {
        Self::Transport(err.into())
    }

    /// Returns the HTTP status for [`FetchError::Http`].
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Aborted {
                reason: AbortReason::Timeout(_)
            }
        )
    }
}
