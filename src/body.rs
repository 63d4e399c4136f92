use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError},
};

use bytes::Bytes;
use futures::{stream::BoxStream, Stream, StreamExt, TryStreamExt};
use serde::Serialize;
use serde_json::Value;

use crate::{error::BoxError, FetchError, Result};

/// Chunked byte stream used for streaming request and response bodies.
pub type ByteStream = BoxStream<'static, std::result::Result<Bytes, BoxError>>;

/// Shareable handle to a one-shot byte stream.
///
/// Cloning the handle does not clone the stream: the first consumer takes it
/// and every later [`BodyStream::take`] returns `None`.
#[derive(Clone)]
pub struct BodyStream {
    inner: Arc<Mutex<Option<ByteStream>>>,
}

impl BodyStream {
    pub fn new<S, E>(stream: S) -> Self
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        Self::from_boxed(stream.map_err(Into::into).boxed())
    }

    pub(crate) fn from_boxed(stream: ByteStream) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(stream))),
        }
    }

    /// Takes the underlying stream, leaving the handle empty.
    pub fn take(&self) -> Option<ByteStream> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn is_consumed(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl fmt::Debug for BodyStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BodyStream")
            .field("consumed", &self.is_consumed())
            .finish()
    }
}

/// Request payload as supplied by the caller.
#[derive(Clone, Debug)]
pub enum Body {
    /// Structured value, serialized to JSON text during normalization.
    Json(Value),
    /// Text sent verbatim.
    Text(String),
    /// Binary payload sent verbatim.
    Bytes(Bytes),
    /// Streaming payload; forces half-duplex transport mode.
    Stream(BodyStream),
}

impl Body {
    /// Converts any serializable value into a body.
    ///
    /// A value that serializes to a JSON string becomes [`Body::Text`].
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        serde_json::to_value(value)
            .map(Self::from)
            .map_err(|err| FetchError::Encode(format!("body is not serializable: {err}")))
    }

    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn bytes(value: impl Into<Bytes>) -> Self {
        Self::Bytes(value.into())
    }

    pub fn stream<S, E>(stream: S) -> Self
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        Self::Stream(BodyStream::new(stream))
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }
}

impl From<Value> for Body {
    fn from(value: Value) -> Self {
        match value {
            Value::String(text) => Self::Text(text),
            other => Self::Json(other),
        }
    }
}

impl From<String> for Body {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for Body {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<Bytes> for Body {
    fn from(value: Bytes) -> Self {
        Self::Bytes(value)
    }
}

impl From<Vec<u8>> for Body {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value.into())
    }
}

/// Encoded body handed to the transport.
#[derive(Clone, Debug)]
pub enum RequestBody {
    Text(String),
    Bytes(Bytes),
    Stream(BodyStream),
}

impl RequestBody {
    /// Returns the buffered bytes, or `None` for a stream.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Text(text) => Some(text.as_bytes()),
            Self::Bytes(bytes) => Some(bytes),
            Self::Stream(_) => None,
        }
    }
}
