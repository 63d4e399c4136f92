use std::{fmt, sync::Arc};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{stream, StreamExt, TryStreamExt};
use reqwest::{
    header::{self, HeaderMap},
    Method, StatusCode, Url,
};

use crate::{
    body::{BodyStream, ByteStream, RequestBody},
    error::BoxError,
    options::Duplex,
    FetchError, FetchOptions, Result,
};

/// Fully normalized request handed to a [`Transport`].
#[derive(Debug)]
pub struct TransportRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<RequestBody>,
    pub duplex: Option<Duplex>,
}

/// Raw response returned by a [`Transport`].
pub struct TransportResponse {
    pub status: StatusCode,
    pub status_text: String,
    pub headers: HeaderMap,
    pub url: Url,
    body: Option<ByteStream>,
}

impl fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("status_text", &self.status_text)
            .field("url", &self.url.as_str())
            .field("has_body", &self.body.is_some())
            .finish()
    }
}

impl TransportResponse {
    /// Builds a response; `body: None` means the response carries no body.
    pub fn new(status: StatusCode, headers: HeaderMap, url: Url, body: Option<ByteStream>) -> Self {
        Self {
            status,
            status_text: status.canonical_reason().unwrap_or_default().to_owned(),
            headers,
            url,
            body,
        }
    }

    /// Builds a response with a fully buffered body.
    pub fn from_bytes(
        status: StatusCode,
        headers: HeaderMap,
        url: Url,
        body: impl Into<Bytes>,
    ) -> Self {
        let chunk: Bytes = body.into();
        let body = stream::once(async move { Ok::<_, BoxError>(chunk) }).boxed();
        Self::new(status, headers, url, Some(body))
    }

    pub fn with_status_text(mut self, status_text: impl Into<String>) -> Self {
        self.status_text = status_text.into();
        self
    }

    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
    }

    /// Reads the whole body.
    pub async fn bytes(self) -> Result<Bytes> {
        let Some(mut body) = self.body else {
            return Ok(Bytes::new());
        };
        let mut buffer = BytesMut::new();
        while let Some(chunk) = body.next().await {
            buffer.extend_from_slice(&chunk.map_err(FetchError::Transport)?);
        }
        Ok(buffer.freeze())
    }

    /// Reads the whole body as UTF-8, replacing invalid sequences.
    pub async fn text(self) -> Result<String> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn into_stream(self) -> BodyStream {
        BodyStream::from_boxed(self.body.unwrap_or_else(|| stream::empty().boxed()))
    }
}

/// Network capability the executor issues requests through.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, request: TransportRequest) -> Result<TransportResponse>;
}

/// Default transport backed by `reqwest`.
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn fetch(&self, request: TransportRequest) -> Result<TransportResponse> {
        let mut builder = self
            .http
            .request(request.method, request.url)
            .headers(request.headers);

        if let Some(body) = request.body {
            builder = builder.body(match body {
                RequestBody::Text(text) => reqwest::Body::from(text),
                RequestBody::Bytes(bytes) => reqwest::Body::from(bytes),
                RequestBody::Stream(stream) => {
                    reqwest::Body::wrap_stream(stream.take().ok_or(FetchError::BodyConsumed)?)
                }
            });
        }

        let response = builder.send().await.map_err(FetchError::transport)?;
        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let empty = matches!(
            status,
            StatusCode::NO_CONTENT | StatusCode::RESET_CONTENT | StatusCode::NOT_MODIFIED
        ) || response.content_length() == Some(0);

        let body = (!empty).then(|| {
            response
                .bytes_stream()
                .map_err(|err| Box::new(err) as BoxError)
                .boxed()
        });
        Ok(TransportResponse::new(status, headers, url, body))
    }
}

/// Capabilities picked for one attempt.
pub(crate) struct Capabilities {
    pub(crate) transport: Arc<dyn Transport>,
}

impl Capabilities {
    /// Prefers the per-call transport over the client's ambient one.
    pub(crate) fn resolve(options: &FetchOptions, ambient: &Arc<dyn Transport>) -> Self {
        Self {
            transport: options
                .custom_fetch_impl
                .clone()
                .unwrap_or_else(|| Arc::clone(ambient)),
        }
    }
}

#[cfg(test)]
mod tests {
    use reqwest::{
        header::{HeaderMap, HeaderValue, CONTENT_TYPE},
        StatusCode, Url,
    };

    use super::TransportResponse;

    fn url() -> Url {
        Url::parse("http://localhost/x").expect("valid url")
    }

    #[tokio::test]
    async fn buffered_body_reads_back_as_text() {
        let response =
            TransportResponse::from_bytes(StatusCode::OK, HeaderMap::new(), url(), "hello");
        assert!(response.has_body());
        assert_eq!(response.text().await.expect("must read"), "hello");
    }

    #[tokio::test]
    async fn missing_body_reads_as_empty() {
        let response = TransportResponse::new(StatusCode::NO_CONTENT, HeaderMap::new(), url(), None);
        assert!(!response.has_body());
        assert!(response.bytes().await.expect("must read").is_empty());
    }

    #[test]
    fn status_text_uses_canonical_reason() {
        let response = TransportResponse::new(StatusCode::NOT_FOUND, HeaderMap::new(), url(), None);
        assert_eq!(response.status_text, "Not Found");
        assert!(!response.ok());
    }

    #[test]
    fn content_type_reads_header() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/csv"));
        let response = TransportResponse::from_bytes(StatusCode::OK, headers, url(), "a,b");
        assert_eq!(response.content_type(), Some("text/csv"));

        let response = TransportResponse::new(StatusCode::OK, HeaderMap::new(), url(), None);
        assert_eq!(response.content_type(), None);
    }
}
