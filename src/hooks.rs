//! Lifecycle hooks run at fixed points of every attempt.
//!
//! Order within one attempt: `on_request` → transport → `on_response` →
//! `on_success` | (`on_error` → `on_retry`?).

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{header::HeaderMap, Method, StatusCode, Url};
use tokio_util::sync::CancellationToken;

use crate::{
    body::RequestBody, decode::Payload, error::BoxError, options::Duplex,
    transport::TransportResponse, FetchError, FetchOptions, Result,
};

/// Realized outbound request of one attempt.
#[derive(Debug)]
pub struct RequestContext {
    /// 0-based attempt number.
    pub attempt: u32,
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<RequestBody>,
    pub duplex: Option<Duplex>,
    /// Cancellation handle of this attempt.
    pub signal: CancellationToken,
    /// Options after the plugin pipeline.
    pub options: FetchOptions,
}

/// Response metadata of one attempt.
#[derive(Clone, Debug)]
pub struct ResponseContext {
    pub attempt: u32,
    pub method: Method,
    pub status: StatusCode,
    pub status_text: String,
    pub headers: HeaderMap,
    pub url: Url,
}

impl ResponseContext {
    pub(crate) fn new(response: &TransportResponse, method: Method, attempt: u32) -> Self {
        Self {
            attempt,
            method,
            status: response.status,
            status_text: response.status_text.clone(),
            headers: response.headers.clone(),
            url: response.url.clone(),
        }
    }

    pub fn ok(&self) -> bool {
        self.status.is_success()
    }
}

/// Caller-supplied lifecycle callbacks. Every method defaults to a no-op.
#[async_trait]
pub trait Hooks: Send + Sync {
    async fn on_request(&self, _ctx: &RequestContext) -> std::result::Result<(), BoxError> {
        Ok(())
    }

    async fn on_response(&self, _ctx: &ResponseContext) -> std::result::Result<(), BoxError> {
        Ok(())
    }

    async fn on_success(
        &self,
        _ctx: &ResponseContext,
        _data: &Payload,
    ) -> std::result::Result<(), BoxError> {
        Ok(())
    }

    async fn on_error(&self, _ctx: &ResponseContext) -> std::result::Result<(), BoxError> {
        Ok(())
    }

    async fn on_retry(&self, _ctx: &ResponseContext) -> std::result::Result<(), BoxError> {
        Ok(())
    }
}

/// Runs every registered hook set in registration order.
pub(crate) struct HookRunner {
    hooks: Vec<Arc<dyn Hooks>>,
}

impl HookRunner {
    pub(crate) fn new(hooks: Vec<Arc<dyn Hooks>>) -> Self {
        Self { hooks }
    }

    pub(crate) async fn on_request(&self, ctx: &RequestContext) -> Result<()> {
        for hooks in &self.hooks {
            hooks.on_request(ctx).await.map_err(failed("on_request"))?;
        }
        Ok(())
    }

    pub(crate) async fn on_response(&self, ctx: &ResponseContext) -> Result<()> {
        for hooks in &self.hooks {
            hooks.on_response(ctx).await.map_err(failed("on_response"))?;
        }
        Ok(())
    }

    pub(crate) async fn on_success(&self, ctx: &ResponseContext, data: &Payload) -> Result<()> {
        for hooks in &self.hooks {
            hooks
                .on_success(ctx, data)
                .await
                .map_err(failed("on_success"))?;
        }
        Ok(())
    }

    pub(crate) async fn on_error(&self, ctx: &ResponseContext) -> Result<()> {
        for hooks in &self.hooks {
            hooks.on_error(ctx).await.map_err(failed("on_error"))?;
        }
        Ok(())
    }

    pub(crate) async fn on_retry(&self, ctx: &ResponseContext) -> Result<()> {
        for hooks in &self.hooks {
            hooks.on_retry(ctx).await.map_err(failed("on_retry"))?;
        }
        Ok(())
    }
}

fn failed(hook: &'static str) -> impl Fn(BoxError) -> FetchError {
    move |source| match source.downcast::<FetchError>() {
        Ok(err) => *err,
        Err(source) => FetchError::Hook { hook, source },
    }
}
