//! `typed-fetch` is an async HTTP request executor.
//!
//! Every call goes through the same lifecycle:
//! - plugins rewrite the URL and options in order ([`Plugin`])
//! - the request is normalized (URL, query, JSON body, headers, method)
//! - the transport is called under an optional timeout, with [`Hooks`]
//!   around it
//! - ok responses are decoded and checked by a [`Validator`]; other
//!   responses are retried or turned into an [`Envelope::Error`]
//!
//! ```no_run
//! use serde_json::json;
//! use typed_fetch::{Fetch, FetchOptions};
//!
//! # async fn run() -> typed_fetch::Result<()> {
//! let api = Fetch::new().with_options(FetchOptions::new().base_url("https://api.example.com"));
//! let envelope = api
//!     .call("/signin", FetchOptions::new().body(json!({"username": "a", "password": "b"})))
//!     .await?;
//! if let Some(error) = envelope.error() {
//!     eprintln!("sign-in failed with {}", error.status);
//! }
//! # Ok(())
//! # }
//! ```

mod body;
mod client;
mod decode;
mod envelope;
mod error;
mod hooks;
mod normalize;
mod options;
mod plugin;
mod registry;
mod retry;
mod transport;
mod validate;

pub use body::{Body, BodyStream, ByteStream, RequestBody};
pub use client::Fetch;
pub use decode::{DefaultJsonParser, JsonParser, Payload, ResponseType};
pub use envelope::{Envelope, ErrorPayload};
pub use error::{AbortReason, BoxError, FetchError, ValidationError};
pub use hooks::{Hooks, RequestContext, ResponseContext};
pub use options::{Auth, ClientConfig, Duplex, FetchOptions};
pub use plugin::{plugin_fn, Plugin};
pub use registry::{Route, RouteRegistry, RouteSchema};
pub use retry::{RetryDelay, RetryPolicy};
pub use transport::{ReqwestTransport, Transport, TransportRequest, TransportResponse};
pub use validate::{Passthrough, TypedValidator, Validator};

pub type Result<T> = std::result::Result<T, FetchError>;
