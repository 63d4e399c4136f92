//! Route registry mapping known URLs to input, query and output schemas.
//!
//! Keys may carry a method prefix: `@post/signin` matches calls made with
//! that exact URL, strips the prefix and sets `POST` unless the call already
//! chose a method.

use std::{collections::HashMap, fmt, sync::Arc};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

use crate::{
    error::BoxError, plugin::Plugin, validate::TypedValidator, Body, FetchError, FetchOptions,
    Validator,
};

/// Compile-time description of an endpoint.
pub trait Route {
    const PATH: &'static str;
    const METHOD: Option<&'static str> = None;
    type Input: Serialize + DeserializeOwned + 'static;
    type Query: Serialize + DeserializeOwned + 'static;
    type Output: Serialize + DeserializeOwned + 'static;
}

/// Schemas attached to one registry key.
#[derive(Clone, Default)]
pub struct RouteSchema {
    pub input: Option<Arc<dyn Validator>>,
    pub query: Option<Arc<dyn Validator>>,
    pub output: Option<Arc<dyn Validator>>,
}

impl fmt::Debug for RouteSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteSchema")
            .field("input", &self.input.is_some())
            .field("query", &self.query.is_some())
            .field("output", &self.output.is_some())
            .finish()
    }
}

impl RouteSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input(mut self, validator: impl Validator + 'static) -> Self {
        self.input = Some(Arc::new(validator));
        self
    }

    pub fn query(mut self, validator: impl Validator + 'static) -> Self {
        self.query = Some(Arc::new(validator));
        self
    }

    pub fn output(mut self, validator: impl Validator + 'static) -> Self {
        self.output = Some(Arc::new(validator));
        self
    }

    /// Schemas derived from a [`Route`]'s associated types.
    pub fn typed<R: Route>() -> Self {
        Self::new()
            .input(TypedValidator::<R::Input>::new())
            .query(TypedValidator::<R::Query>::new())
            .output(TypedValidator::<R::Output>::new())
    }
}

/// Lookup table from URL keys to [`RouteSchema`]s, applied as a plugin.
#[derive(Clone, Debug, Default)]
pub struct RouteRegistry {
    routes: HashMap<String, RouteSchema>,
    strict: bool,
}

impl RouteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects URLs that have no registered schema.
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    pub fn route(mut self, key: impl Into<String>, schema: RouteSchema) -> Self {
        self.routes.insert(key.into(), schema);
        self
    }

    /// Registers `R` under its path, prefixed with its method if any.
    pub fn register<R: Route>(self) -> Self {
        let key = match R::METHOD {
            Some(method) => format!("@{}{}", method.to_ascii_lowercase(), R::PATH),
            None => R::PATH.to_owned(),
        };
        self.route(key, RouteSchema::typed::<R>())
    }

    /// Finds the schema for `url`, ignoring any query string or fragment.
    pub fn lookup(&self, url: &str) -> Option<&RouteSchema> {
        self.routes.get(url).or_else(|| {
            let path = url.split(['?', '#']).next().unwrap_or_default();
            self.routes.get(path)
        })
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Splits `@method/path` into its method and path.
pub(crate) fn split_method_prefix(url: &str) -> (Option<&str>, &str) {
    let Some(rest) = url.strip_prefix('@') else {
        return (None, url);
    };
    match rest.find('/') {
        Some(index) if index > 0 => (Some(&rest[..index]), &rest[index..]),
        _ => (None, url),
    }
}

#[async_trait]
impl Plugin for RouteRegistry {
    fn id(&self) -> &str {
        "route-registry"
    }

    async fn init(
        &self,
        url: String,
        mut options: FetchOptions,
    ) -> std::result::Result<(String, FetchOptions), BoxError> {
        let schema = self.lookup(&url);
        if schema.is_none() && self.strict {
            return Err(FetchError::UnknownRoute(url).into());
        }

        let (method, path) = split_method_prefix(&url);
        if options.method.is_none() {
            options.method = method.map(str::to_ascii_uppercase);
        }

        if let Some(schema) = schema {
            if let (Some(input), Some(Body::Json(value))) = (&schema.input, &options.body) {
                let validated = input.parse(value.clone()).map_err(FetchError::Validation)?;
                options.body = Some(Body::Json(validated));
            }

            if let Some(query) = &schema.query {
                if !options.query.is_empty() {
                    let object: Map<String, Value> = options.query.drain(..).collect();
                    options.query = match query
                        .parse(Value::Object(object))
                        .map_err(FetchError::Validation)?
                    {
                        Value::Object(object) => object.into_iter().collect(),
                        _ => Vec::new(),
                    };
                }
            }

            if options.output_validator.is_none() {
                options.output_validator = schema.output.clone();
            }
        }

        #[cfg(feature = "tracing")]
        tracing::trace!(url = %url, known = schema.is_some(), "route registry resolved");

        Ok((path.to_owned(), options))
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use serde_json::{json, Value};

    use super::{split_method_prefix, Route, RouteRegistry, RouteSchema};
    use crate::{plugin::Plugin, Body, FetchError, FetchOptions, Passthrough, ValidationError};

    #[derive(Serialize, Deserialize)]
    struct SignIn {
        username: String,
        password: String,
    }

    #[derive(Serialize, Deserialize)]
    struct Token {
        token: String,
    }

    struct SignInRoute;

    impl Route for SignInRoute {
        const PATH: &'static str = "/signin";
        const METHOD: Option<&'static str> = Some("POST");
        type Input = SignIn;
        type Query = Value;
        type Output = Token;
    }

    #[test]
    fn method_prefix_is_split() {
        assert_eq!(split_method_prefix("@post/signin"), (Some("post"), "/signin"));
        assert_eq!(split_method_prefix("/signin"), (None, "/signin"));
        assert_eq!(split_method_prefix("@/x"), (None, "@/x"));
    }

    #[test]
    fn lookup_ignores_query_string() {
        let registry = RouteRegistry::new().route("/query", RouteSchema::new());
        assert!(registry.lookup("/query?term=x").is_some());
        assert!(registry.lookup("/other").is_none());
    }

    #[test]
    fn register_uses_method_prefixed_key() {
        let registry = RouteRegistry::new().register::<SignInRoute>();
        assert!(registry.lookup("@post/signin").is_some());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn known_route_injects_output_validator_and_method() {
        let registry = RouteRegistry::new().register::<SignInRoute>();
        let options = FetchOptions::new().body(json!({"username": "a", "password": "b"}));

        let (url, options) = registry
            .init("@post/signin".to_owned(), options)
            .await
            .expect("plugin must succeed");

        assert_eq!(url, "/signin");
        assert_eq!(options.method.as_deref(), Some("POST"));
        let validator = options.output_validator.expect("validator injected");
        assert!(validator.parse(json!({"token": "t"})).is_ok());
        assert!(validator.parse(json!({"nope": 1})).is_err());
    }

    #[tokio::test]
    async fn invalid_input_is_rejected() {
        let registry = RouteRegistry::new().register::<SignInRoute>();
        let options = FetchOptions::new().body(json!({"username": "a"}));

        let err = registry
            .init("@post/signin".to_owned(), options)
            .await
            .expect_err("plugin must fail");
        let err = err.downcast::<FetchError>().expect("crate error");
        assert!(matches!(*err, FetchError::Validation(_)));
    }

    #[tokio::test]
    async fn query_schema_rewrites_query() {
        let upper = |value: Value| -> Result<Value, ValidationError> {
            let term = value["term"].as_str().unwrap_or_default().to_uppercase();
            Ok(json!({"term": term}))
        };
        let registry = RouteRegistry::new().route("/query", RouteSchema::new().query(upper));
        let options = FetchOptions::new().query("term", "x");

        let (_, options) = registry
            .init("/query".to_owned(), options)
            .await
            .expect("plugin must succeed");
        assert_eq!(options.query, vec![("term".to_owned(), json!("X"))]);
    }

    #[tokio::test]
    async fn explicit_validator_wins_over_registry() {
        let registry = RouteRegistry::new().register::<SignInRoute>();
        let options = FetchOptions::new()
            .body(Body::json(&json!({"username": "a", "password": "b"})).expect("json"))
            .output_validator(std::sync::Arc::new(Passthrough));

        let (_, options) = registry
            .init("@post/signin".to_owned(), options)
            .await
            .expect("plugin must succeed");
        let validator = options.output_validator.expect("validator kept");
        assert!(validator.parse(json!({"nope": 1})).is_ok());
    }

    #[tokio::test]
    async fn strict_registry_rejects_unknown_urls() {
        let registry = RouteRegistry::new().strict();
        let err = registry
            .init("/unknown".to_owned(), FetchOptions::new())
            .await
            .expect_err("plugin must fail");
        let err = err.downcast::<FetchError>().expect("crate error");
        assert!(matches!(*err, FetchError::UnknownRoute(_)));
    }

    #[tokio::test]
    async fn lenient_registry_leaves_unknown_urls_alone() {
        let registry = RouteRegistry::new();
        let (url, options) = registry
            .init("/unknown?x=1".to_owned(), FetchOptions::new())
            .await
            .expect("plugin must succeed");
        assert_eq!(url, "/unknown?x=1");
        assert!(options.output_validator.is_none());
        assert!(options.method.is_none());
    }
}
