use std::{fmt, sync::Arc, time::Duration};

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::{task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;

use crate::{
    decode::{decode_success, error_details, DefaultJsonParser, JsonParser, Payload, ResponseType},
    hooks::{HookRunner, RequestContext, ResponseContext},
    normalize::normalize,
    plugin::{run_plugins, Plugin},
    registry::{Route, RouteRegistry},
    transport::{Capabilities, ReqwestTransport, Transport, TransportRequest},
    validate::{Passthrough, TypedValidator, Validator},
    AbortReason, Body, ClientConfig, Envelope, ErrorPayload, FetchError, FetchOptions, Result,
};

/// HTTP request executor with plugins, hooks, validation and retry.
#[derive(Clone)]
pub struct Fetch {
    transport: Arc<dyn Transport>,
    defaults: FetchOptions,
    registry: Option<Arc<RouteRegistry>>,
}

impl fmt::Debug for Fetch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fetch")
            .field("defaults", &self.defaults)
            .field("registry", &self.registry)
            .finish()
    }
}

impl Default for Fetch {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of one attempt.
enum Attempt {
    Done(Envelope<Payload>),
    Retry { remaining: u32, delay: Duration },
}

/// Cancels the attempt's token once the timeout elapses; dropping it
/// clears the pending cancellation.
struct TimeoutGuard {
    task: JoinHandle<()>,
}

impl TimeoutGuard {
    fn install(signal: CancellationToken, timeout: Duration) -> Self {
        let task = tokio::spawn(async move {
            sleep(timeout).await;
            #[cfg(feature = "tracing")]
            tracing::debug!("request timed out after {} ms", timeout.as_millis());
            signal.cancel();
        });
        Self { task }
    }
}

impl Drop for TimeoutGuard {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl Fetch {
    /// Creates a client using the default `reqwest` transport.
    pub fn new() -> Self {
        Self {
            transport: Arc::new(ReqwestTransport::new()),
            defaults: FetchOptions::default(),
            registry: None,
        }
    }

    /// Creates a client whose defaults come from a [`ClientConfig`].
    pub fn from_config(config: ClientConfig) -> Self {
        Self::new().with_options(config.into_options())
    }

    /// Creates a client configured from `TYPED_FETCH_*` environment variables.
    ///
    /// See [`ClientConfig::from_env`].
    pub fn from_env() -> Result<Self> {
        ClientConfig::from_env().map(Self::from_config)
    }

    /// Replaces the options every call is merged onto.
    pub fn with_options(mut self, defaults: FetchOptions) -> Self {
        self.defaults = defaults;
        self
    }

    /// Replaces the ambient transport.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    /// Installs a route registry that runs ahead of every other plugin.
    pub fn with_registry(mut self, registry: RouteRegistry) -> Self {
        self.registry = Some(Arc::new(registry));
        self
    }

    pub fn defaults(&self) -> &FetchOptions {
        &self.defaults
    }

    /// Runs one logical call: plugins, normalization, execution, decoding and
    /// retry.
    ///
    /// Non-ok responses become [`Envelope::Error`] unless `throw` is set, in
    /// which case they raise [`FetchError::Http`]. Every other failure raises.
    pub async fn call(&self, url: &str, options: FetchOptions) -> Result<Envelope<Payload>> {
        let mut options = self.defaults.merge(options);
        if let Some(registry) = &self.registry {
            options
                .plugins
                .insert(0, Arc::clone(registry) as Arc<dyn Plugin>);
        }

        // Fixed by the first attempt; plugins may lower it but never raise it.
        let mut budget: Option<u32> = None;
        let mut attempt = 0u32;
        loop {
            let mut attempt_options = options.clone();
            if let (Some(retry), Some(remaining)) = (attempt_options.retry.as_mut(), budget) {
                retry.attempts = remaining;
            }

            match self.attempt(url, attempt_options, attempt, budget).await? {
                Attempt::Done(envelope) => return Ok(envelope),
                Attempt::Retry {
                    remaining: left,
                    delay,
                } => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(
                        url,
                        attempt,
                        remaining = left,
                        "retrying request after {} ms",
                        delay.as_millis()
                    );
                    if !delay.is_zero() {
                        sleep(delay).await;
                    }
                    budget = Some(left);
                    attempt += 1;
                }
            }
        }
    }

    /// Like [`Fetch::call`], deserializing success data into `T`.
    pub async fn call_as<T: DeserializeOwned>(
        &self,
        url: &str,
        options: FetchOptions,
    ) -> Result<Envelope<T>> {
        match self.call(url, options).await? {
            Envelope::Data(payload) => {
                let value = payload.into_json().ok_or_else(|| {
                    FetchError::Decode(
                        "binary response cannot be decoded into a typed value".to_owned(),
                    )
                })?;
                serde_json::from_value(value)
                    .map(Envelope::Data)
                    .map_err(|err| FetchError::Decode(format!("unexpected response shape: {err}")))
            }
            Envelope::Error(error) => Ok(Envelope::Error(error)),
        }
    }

    /// Calls the endpoint described by `R` with typed input and query.
    ///
    /// The output is validated against `R::Output` unless `options` carries
    /// its own validator.
    pub async fn route<R: Route>(
        &self,
        input: Option<&R::Input>,
        query: Option<&R::Query>,
        options: FetchOptions,
    ) -> Result<Envelope<R::Output>> {
        let mut options = options;
        if let Some(input) = input {
            options.body = Some(Body::json(input)?);
        }
        if let Some(query) = query {
            let value = serde_json::to_value(query)
                .map_err(|err| FetchError::Encode(format!("query is not serializable: {err}")))?;
            match value {
                Value::Object(object) => options.query.extend(object),
                Value::Null => {}
                other => {
                    return Err(FetchError::Encode(format!(
                        "query must serialize to an object, got {other}"
                    )))
                }
            }
        }
        if options.method.is_none() {
            options.method = R::METHOD.map(str::to_owned);
        }
        if options.output_validator.is_none() {
            options.output_validator = Some(Arc::new(TypedValidator::<R::Output>::new()));
        }
        self.call_as(R::PATH, options).await
    }

    async fn attempt(
        &self,
        url: &str,
        options: FetchOptions,
        attempt: u32,
        budget: Option<u32>,
    ) -> Result<Attempt> {
        let (url, options) = run_plugins(url.to_owned(), options).await?;
        let policy = options.retry.clone().unwrap_or_default();
        let remaining = budget.map_or(policy.attempts, |budget| budget.min(policy.attempts));
        let capabilities = Capabilities::resolve(&options, &self.transport);
        let prepared = normalize(&url, &options)?;
        let hooks = HookRunner::new(options.hooks.clone());

        #[cfg(feature = "tracing")]
        tracing::debug!(
            method = %prepared.method,
            url = %prepared.url,
            attempt,
            "sending request"
        );

        let external = options.signal.clone();
        let signal = external.clone().unwrap_or_default();
        let (reason, timer) = match (external, options.timeout) {
            (None, Some(timeout)) => (
                AbortReason::Timeout(timeout),
                Some(TimeoutGuard::install(signal.clone(), timeout)),
            ),
            _ => (AbortReason::Signal, None),
        };

        let context = RequestContext {
            attempt,
            method: prepared.method,
            url: prepared.url,
            headers: prepared.headers,
            body: prepared.body,
            duplex: prepared.duplex,
            signal: signal.clone(),
            options,
        };
        hooks.on_request(&context).await?;

        let RequestContext {
            method,
            url,
            headers,
            body,
            duplex,
            options,
            ..
        } = context;
        let request = TransportRequest {
            method: method.clone(),
            url,
            headers,
            body,
            duplex,
        };

        let settled = tokio::select! {
            biased;
            _ = signal.cancelled() => Err(FetchError::Aborted { reason }),
            result = capabilities.transport.fetch(request) => result,
        };
        drop(timer);
        let response = settled?;

        let response_context = ResponseContext::new(&response, method.clone(), attempt);
        hooks.on_response(&response_context).await?;

        let parser: Arc<dyn JsonParser> = options
            .json_parser
            .clone()
            .unwrap_or_else(|| Arc::new(DefaultJsonParser));

        if response.ok() {
            let payload = if !response.has_body() || method == Method::HEAD {
                Payload::Empty
            } else {
                let kind = options
                    .response_type
                    .unwrap_or_else(|| ResponseType::classify(&response.headers));
                let validator: Arc<dyn Validator> = options
                    .output_validator
                    .clone()
                    .unwrap_or_else(|| Arc::new(Passthrough));
                decode_success(response, kind, parser.as_ref(), validator.as_ref()).await?
            };
            hooks.on_success(&response_context, &payload).await?;
            return Ok(Attempt::Done(Envelope::Data(payload)));
        }

        hooks.on_error(&response_context).await?;

        if remaining > 0 && policy.should_retry(response_context.status) {
            hooks.on_retry(&response_context).await?;
            return Ok(Attempt::Retry {
                remaining: remaining - 1,
                delay: policy.delay.for_attempt(attempt),
            });
        }

        let text = response.text().await?;
        let error = ErrorPayload {
            status: response_context.status.as_u16(),
            status_text: response_context.status_text.clone(),
            details: error_details(&text, parser.as_ref()),
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(
            status = error.status,
            attempt,
            "request failed with non-success status"
        );

        if options.throw.unwrap_or(false) {
            return Err(FetchError::Http {
                status: error.status,
                status_text: error.status_text,
                body: Value::Object(error.details),
            });
        }
        Ok(Attempt::Done(Envelope::Error(error)))
    }
}
