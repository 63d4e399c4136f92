use std::{fmt, sync::Arc, time::Duration};

use base64::Engine as _;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::{
    decode::{JsonParser, ResponseType},
    hooks::Hooks,
    plugin::Plugin,
    retry::RetryPolicy,
    transport::Transport,
    validate::Validator,
    Body, FetchError, Result,
};

/// Transport duplex mode for streaming request bodies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Duplex {
    Half,
    Full,
}

/// Credentials turned into an `authorization` header.
#[derive(Clone, PartialEq, Eq)]
pub enum Auth {
    /// Bearer token; the `Bearer ` prefix is added when missing.
    Bearer(String),
    Basic { username: String, password: String },
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bearer(_) => f.debug_tuple("Bearer").field(&"<redacted>").finish(),
            Self::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
        }
    }
}

impl Auth {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self::Bearer(token.into())
    }

    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Renders the `authorization` header value.
    pub fn header_value(&self) -> String {
        match self {
            Self::Bearer(token) => normalize_bearer_authorization(token),
            Self::Basic { username, password } => {
                let encoded = base64::engine::general_purpose::STANDARD
                    .encode(format!("{username}:{password}"));
                format!("Basic {encoded}")
            }
        }
    }
}

/// Per-call request configuration.
///
/// Every field is optional; [`FetchOptions::merge`] layers per-call values
/// over a client's defaults. Plugins receive and return this value.
#[derive(Clone, Default)]
pub struct FetchOptions {
    /// Prefix concatenated in front of the call URL.
    pub base_url: Option<String>,
    pub headers: HeaderMap,
    pub body: Option<Body>,
    /// Appended to the query string in order, one value per entry.
    pub query: Vec<(String, Value)>,
    /// Replacements for `:name` path segments.
    pub params: Vec<(String, String)>,
    pub method: Option<String>,
    pub timeout: Option<Duration>,
    pub retry: Option<RetryPolicy>,
    pub plugins: Vec<Arc<dyn Plugin>>,
    pub hooks: Vec<Arc<dyn Hooks>>,
    pub json_parser: Option<Arc<dyn JsonParser>>,
    pub output_validator: Option<Arc<dyn Validator>>,
    /// Raise [`FetchError::Http`] instead of returning an error envelope.
    pub throw: Option<bool>,
    pub duplex: Option<Duplex>,
    /// External cancellation; when set, `timeout` is not installed.
    pub signal: Option<CancellationToken>,
    pub auth: Option<Auth>,
    pub response_type: Option<ResponseType>,
    pub custom_fetch_impl: Option<Arc<dyn Transport>>,
}

impl fmt::Debug for FetchOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let plugins: Vec<&str> = self.plugins.iter().map(|plugin| plugin.id()).collect();
        f.debug_struct("FetchOptions")
            .field("base_url", &self.base_url)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("query", &self.query)
            .field("params", &self.params)
            .field("method", &self.method)
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .field("plugins", &plugins)
            .field("hooks", &self.hooks.len())
            .field("json_parser", &self.json_parser.is_some())
            .field("output_validator", &self.output_validator.is_some())
            .field("throw", &self.throw)
            .field("duplex", &self.duplex)
            .field("signal", &self.signal.is_some())
            .field("auth", &self.auth)
            .field("response_type", &self.response_type)
            .field("custom_fetch_impl", &self.custom_fetch_impl.is_some())
            .finish()
    }
}

impl FetchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Sets a header, replacing earlier values with the same name.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serializes `value` into a body.
    pub fn json<T: serde::Serialize + ?Sized>(mut self, value: &T) -> Result<Self> {
        self.body = Some(Body::json(value)?);
        Ok(self)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn retry(mut self, retry: impl Into<RetryPolicy>) -> Self {
        self.retry = Some(retry.into());
        self
    }

    pub fn plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn hooks(mut self, hooks: Arc<dyn Hooks>) -> Self {
        self.hooks.push(hooks);
        self
    }

    pub fn json_parser(mut self, parser: Arc<dyn JsonParser>) -> Self {
        self.json_parser = Some(parser);
        self
    }

    pub fn output_validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.output_validator = Some(validator);
        self
    }

    pub fn throw(mut self, throw: bool) -> Self {
        self.throw = Some(throw);
        self
    }

    pub fn duplex(mut self, duplex: Duplex) -> Self {
        self.duplex = Some(duplex);
        self
    }

    pub fn signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn auth(mut self, auth: Auth) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn response_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = Some(response_type);
        self
    }

    pub fn custom_fetch_impl(mut self, transport: Arc<dyn Transport>) -> Self {
        self.custom_fetch_impl = Some(transport);
        self
    }

    /// Layers `overrides` on top of `self`.
    ///
    /// Set fields of `overrides` win. Headers merge by name with the override
    /// replacing every base value of that name; plugins and hooks are
    /// concatenated, base first.
    pub fn merge(&self, overrides: FetchOptions) -> FetchOptions {
        let mut headers = self.headers.clone();
        let mut last: Option<HeaderName> = None;
        for (name, value) in overrides.headers {
            match name {
                Some(name) => {
                    headers.insert(name.clone(), value);
                    last = Some(name);
                }
                None => {
                    if let Some(name) = &last {
                        headers.append(name, value);
                    }
                }
            }
        }

        let mut plugins = self.plugins.clone();
        plugins.extend(overrides.plugins);
        let mut hooks = self.hooks.clone();
        hooks.extend(overrides.hooks);

        FetchOptions {
            base_url: overrides.base_url.or_else(|| self.base_url.clone()),
            headers,
            body: overrides.body.or_else(|| self.body.clone()),
            query: non_empty_or(overrides.query, &self.query),
            params: non_empty_or(overrides.params, &self.params),
            method: overrides.method.or_else(|| self.method.clone()),
            timeout: overrides.timeout.or(self.timeout),
            retry: overrides.retry.or_else(|| self.retry.clone()),
            plugins,
            hooks,
            json_parser: overrides.json_parser.or_else(|| self.json_parser.clone()),
            output_validator: overrides
                .output_validator
                .or_else(|| self.output_validator.clone()),
            throw: overrides.throw.or(self.throw),
            duplex: overrides.duplex.or(self.duplex),
            signal: overrides.signal.or_else(|| self.signal.clone()),
            auth: overrides.auth.or_else(|| self.auth.clone()),
            response_type: overrides.response_type.or(self.response_type),
            custom_fetch_impl: overrides
                .custom_fetch_impl
                .or_else(|| self.custom_fetch_impl.clone()),
        }
    }
}

fn non_empty_or<T: Clone>(value: Vec<T>, fallback: &[T]) -> Vec<T> {
    if value.is_empty() {
        fallback.to_vec()
    } else {
        value
    }
}

/// Client-wide defaults loadable from the environment or any serde source.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: Option<String>,
    /// Per-attempt timeout in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Maximum number of retries after the initial attempt.
    pub retry: u32,
    /// Base retry backoff in milliseconds (exponential strategy).
    pub retry_backoff_ms: u64,
    pub throw: bool,
}

const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(30);

impl ClientConfig {
    /// Reads configuration from the environment.
    ///
    /// Recognized variables:
    /// - `TYPED_FETCH_BASE_URL`
    /// - `TYPED_FETCH_TIMEOUT_MS`
    /// - `TYPED_FETCH_RETRY`
    /// - `TYPED_FETCH_RETRY_BACKOFF_MS`
    /// - `TYPED_FETCH_THROW` (`true`/`false`/`1`/`0`)
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(base_url) = lookup("TYPED_FETCH_BASE_URL") {
            if base_url.trim().is_empty() {
                return Err(FetchError::Config(
                    "TYPED_FETCH_BASE_URL is set but empty".to_owned(),
                ));
            }
            config.base_url = Some(base_url.trim().to_owned());
        }
        if let Some(value) = lookup("TYPED_FETCH_TIMEOUT_MS") {
            config.timeout_ms = Some(parse_var("TYPED_FETCH_TIMEOUT_MS", &value)?);
        }
        if let Some(value) = lookup("TYPED_FETCH_RETRY") {
            config.retry = parse_var("TYPED_FETCH_RETRY", &value)?;
        }
        if let Some(value) = lookup("TYPED_FETCH_RETRY_BACKOFF_MS") {
            config.retry_backoff_ms = parse_var("TYPED_FETCH_RETRY_BACKOFF_MS", &value)?;
        }
        if let Some(value) = lookup("TYPED_FETCH_THROW") {
            config.throw = match value.trim() {
                "1" => true,
                "0" => false,
                other => parse_var("TYPED_FETCH_THROW", other)?,
            };
        }
        Ok(config)
    }

    /// Converts the configuration into client default options.
    pub fn into_options(self) -> FetchOptions {
        let retry = (self.retry > 0).then(|| {
            if self.retry_backoff_ms == 0 {
                RetryPolicy::new(self.retry)
            } else {
                RetryPolicy::exponential(
                    self.retry,
                    Duration::from_millis(self.retry_backoff_ms),
                    MAX_RETRY_BACKOFF,
                )
            }
        });

        FetchOptions {
            base_url: self.base_url,
            timeout: self.timeout_ms.map(Duration::from_millis),
            retry,
            throw: Some(self.throw),
            ..FetchOptions::default()
        }
    }
}

fn parse_var<T>(name: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|err| FetchError::Config(format!("invalid {name} '{value}': {err}")))
}

fn normalize_bearer_authorization(token: &str) -> String {
    let trimmed = token.trim();
    let prefix = trimmed.get(..7);
    if prefix.is_some_and(|value| value.eq_ignore_ascii_case("bearer ")) {
        trimmed.to_owned()
    } else {
        format!("Bearer {trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, time::Duration};

    use reqwest::header::{HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};

    use super::{normalize_bearer_authorization, Auth, ClientConfig, FetchOptions};
    use crate::{plugin::plugin_fn, retry::RetryDelay, BoxError, FetchError};

    #[test]
    fn normalize_bearer_adds_prefix_when_missing() {
        assert_eq!(
            normalize_bearer_authorization("abc123"),
            "Bearer abc123".to_owned()
        );
    }

    #[test]
    fn normalize_bearer_keeps_existing_prefix() {
        assert_eq!(
            normalize_bearer_authorization("bEaReR abc123"),
            "bEaReR abc123".to_owned()
        );
    }

    #[test]
    fn basic_auth_is_base64_encoded() {
        assert_eq!(
            Auth::basic("user", "pass").header_value(),
            "Basic dXNlcjpwYXNz"
        );
    }

    #[test]
    fn debug_redacts_credentials() {
        let debug = format!("{:?}", Auth::bearer("secret-token"));
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("secret-token"));
    }

    #[test]
    fn merge_prefers_override_values() {
        let base = FetchOptions::new()
            .base_url("http://base")
            .timeout(Duration::from_secs(1))
            .method("PUT");
        let merged = base.merge(FetchOptions::new().base_url("http://call").throw(true));

        assert_eq!(merged.base_url.as_deref(), Some("http://call"));
        assert_eq!(merged.timeout, Some(Duration::from_secs(1)));
        assert_eq!(merged.method.as_deref(), Some("PUT"));
        assert_eq!(merged.throw, Some(true));
    }

    #[test]
    fn merge_headers_last_writer_wins() {
        let base = FetchOptions::new()
            .header(ACCEPT, HeaderValue::from_static("text/plain"))
            .header(AUTHORIZATION, HeaderValue::from_static("Bearer base"));
        let merged = base.merge(
            FetchOptions::new().header(AUTHORIZATION, HeaderValue::from_static("Bearer call")),
        );

        assert_eq!(merged.headers[ACCEPT], "text/plain");
        assert_eq!(merged.headers[AUTHORIZATION], "Bearer call");
        assert_eq!(merged.headers.get_all(AUTHORIZATION).iter().count(), 1);
        assert!(merged.headers.get(CONTENT_TYPE).is_none());
    }

    #[test]
    fn merge_concatenates_plugins_base_first() {
        let noop = |id: &'static str| {
            plugin_fn(id, |url, options| async move { Ok::<_, BoxError>((url, options)) })
        };
        let base = FetchOptions::new().plugin(noop("base"));
        let merged = base.merge(FetchOptions::new().plugin(noop("call")));
        let ids: Vec<&str> = merged.plugins.iter().map(|plugin| plugin.id()).collect();
        assert_eq!(ids, ["base", "call"]);
    }

    #[test]
    fn config_from_lookup_parses_values() {
        let vars = HashMap::from([
            ("TYPED_FETCH_BASE_URL", " http://api.local "),
            ("TYPED_FETCH_TIMEOUT_MS", "2500"),
            ("TYPED_FETCH_RETRY", "2"),
            ("TYPED_FETCH_RETRY_BACKOFF_MS", "100"),
            ("TYPED_FETCH_THROW", "1"),
        ]);
        let config = ClientConfig::from_lookup(|name| vars.get(name).map(|v| (*v).to_owned()))
            .expect("config must parse");

        assert_eq!(config.base_url.as_deref(), Some("http://api.local"));
        assert_eq!(config.timeout_ms, Some(2500));
        assert!(config.throw);

        let options = config.into_options();
        let retry = options.retry.expect("retry policy must be set");
        assert_eq!(retry.attempts, 2);
        assert!(matches!(retry.delay, RetryDelay::Exponential { .. }));
        assert_eq!(options.timeout, Some(Duration::from_millis(2500)));
    }

    #[test]
    fn config_rejects_invalid_numbers() {
        let err = ClientConfig::from_lookup(|name| {
            (name == "TYPED_FETCH_RETRY").then(|| "many".to_owned())
        })
        .expect_err("must fail");
        assert!(matches!(err, FetchError::Config(_)));
    }

    #[test]
    fn default_config_has_no_retry() {
        let options = ClientConfig::default().into_options();
        assert!(options.retry.is_none());
        assert!(options.timeout.is_none());
        assert_eq!(options.throw, Some(false));
    }
}
