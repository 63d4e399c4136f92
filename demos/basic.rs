use std::time::Duration;

use serde_json::json;
use typed_fetch::{Auth, Fetch, FetchOptions, Payload, RetryPolicy};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Reads TYPED_FETCH_BASE_URL, TYPED_FETCH_TIMEOUT_MS and friends.
    let api = Fetch::from_env()?;
    let token = std::env::var("API_TOKEN")?;

    let envelope = api
        .call(
            "/signin",
            FetchOptions::new()
                .auth(Auth::bearer(token))
                .body(json!({"username": "kit", "password": "hunter2"}))
                .retry(RetryPolicy::linear(2, Duration::from_millis(250))),
        )
        .await?;

    match envelope.into_result() {
        Ok(Payload::Json(value)) => println!("{value:#}"),
        Ok(other) => println!("{other:?}"),
        Err(error) => eprintln!("{} {}: {:?}", error.status, error.status_text, error.message()),
    }

    Ok(())
}
