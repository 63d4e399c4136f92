use std::{future::Future, sync::Arc};

use async_trait::async_trait;

use crate::{error::BoxError, FetchError, FetchOptions, Result};

/// Transform applied to `(url, options)` before a request is built.
///
/// Plugins run in registration order on every attempt, retries included.
/// Returning a [`FetchError`] inside the boxed error surfaces it unchanged.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn id(&self) -> &str;

    async fn init(
        &self,
        url: String,
        options: FetchOptions,
    ) -> std::result::Result<(String, FetchOptions), BoxError>;
}

struct FnPlugin<F> {
    id: String,
    f: F,
}

#[async_trait]
impl<F, Fut> Plugin for FnPlugin<F>
where
    F: Fn(String, FetchOptions) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<(String, FetchOptions), BoxError>> + Send,
{
    fn id(&self) -> &str {
        &self.id
    }

    async fn init(
        &self,
        url: String,
        options: FetchOptions,
    ) -> std::result::Result<(String, FetchOptions), BoxError> {
        (self.f)(url, options).await
    }
}

/// Builds a plugin from an async closure.
pub fn plugin_fn<F, Fut>(id: impl Into<String>, f: F) -> Arc<dyn Plugin>
where
    F: Fn(String, FetchOptions) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<(String, FetchOptions), BoxError>> + Send + 'static,
{
    Arc::new(FnPlugin { id: id.into(), f })
}

/// Applies the plugins of `options` in order.
///
/// The plugin list is snapshotted up front; plugins added by a plugin take
/// effect from the next attempt.
pub(crate) async fn run_plugins(url: String, options: FetchOptions) -> Result<(String, FetchOptions)> {
    let plugins = options.plugins.clone();
    let (mut url, mut options) = (url, options);

    for plugin in &plugins {
        (url, options) = plugin
            .init(url, options)
            .await
            .map_err(|source| match source.downcast::<FetchError>() {
                Ok(err) => *err,
                Err(source) => FetchError::Plugin {
                    id: plugin.id().to_owned(),
                    source,
                },
            })?;
    }

    Ok((url, options))
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    };

    use reqwest::header::{HeaderName, HeaderValue};

    use super::{plugin_fn, run_plugins};
    use crate::{BoxError, FetchError, FetchOptions};

    #[tokio::test]
    async fn plugins_run_in_order_and_see_previous_output() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let first_seen = Arc::clone(&seen);
        let second_seen = Arc::clone(&seen);

        let options = FetchOptions::new()
            .plugin(plugin_fn("first", move |url, options| {
                let seen = Arc::clone(&first_seen);
                async move {
                    seen.lock().expect("lock").push(url.clone());
                    Ok::<_, BoxError>((format!("{url}/v2"), options))
                }
            }))
            .plugin(plugin_fn("second", move |url, options| {
                let seen = Arc::clone(&second_seen);
                async move {
                    seen.lock().expect("lock").push(url.clone());
                    let options = options.header(
                        HeaderName::from_static("x-plugin"),
                        HeaderValue::from_static("second"),
                    );
                    Ok::<_, BoxError>((url, options))
                }
            }));

        let (url, options) = run_plugins("/users".to_owned(), options)
            .await
            .expect("plugins must succeed");

        assert_eq!(url, "/users/v2");
        assert_eq!(options.headers["x-plugin"], "second");
        assert_eq!(*seen.lock().expect("lock"), ["/users", "/users/v2"]);
    }

    #[tokio::test]
    async fn plugin_error_aborts_pipeline() {
        let reached = Arc::new(AtomicBool::new(false));
        let second_reached = Arc::clone(&reached);
        let options = FetchOptions::new()
            .plugin(plugin_fn("broken", |_url, _options| async move {
                Err::<(String, FetchOptions), BoxError>("token refresh failed".into())
            }))
            .plugin(plugin_fn("never", move |url, options| {
                second_reached.store(true, Ordering::SeqCst);
                async move { Ok::<_, BoxError>((url, options)) }
            }));

        let err = run_plugins("/x".to_owned(), options)
            .await
            .expect_err("pipeline must fail");

        match err {
            FetchError::Plugin { id, source } => {
                assert_eq!(id, "broken");
                assert_eq!(source.to_string(), "token refresh failed");
            }
            other => panic!("expected plugin error, got {other:?}"),
        }
        assert!(!reached.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn crate_errors_pass_through_unchanged() {
        let options = FetchOptions::new().plugin(plugin_fn("strict", |url, _options| async move {
            Err::<(String, FetchOptions), BoxError>(FetchError::UnknownRoute(url).into())
        }));

        let err = run_plugins("/nope".to_owned(), options)
            .await
            .expect_err("pipeline must fail");
        assert!(matches!(err, FetchError::UnknownRoute(url) if url == "/nope"));
    }
}
