use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    Method, Url,
};
use serde_json::Value;

use crate::{
    body::RequestBody, decode::is_json_content_type, options::Duplex, registry::split_method_prefix,
    Body, FetchError, FetchOptions, Result,
};

const APPLICATION_JSON: &str = "application/json";

/// Request produced by the normalizer, ready for the executor.
#[derive(Debug)]
pub(crate) struct PreparedRequest {
    pub(crate) method: Method,
    pub(crate) url: Url,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Option<RequestBody>,
    pub(crate) duplex: Option<Duplex>,
}

/// Builds the final request from the post-plugin URL and options.
pub(crate) fn normalize(url: &str, options: &FetchOptions) -> Result<PreparedRequest> {
    let (prefixed_method, url) = split_method_prefix(url);
    let joined = format!("{}{url}", options.base_url.as_deref().unwrap_or_default());
    let joined = substitute_params(&joined, &options.params);
    let mut url =
        Url::parse(&joined).map_err(|err| FetchError::InvalidUrl(format!("'{joined}': {err}")))?;

    let mut headers = options.headers.clone();
    if let Some(auth) = &options.auth {
        if !headers.contains_key(AUTHORIZATION) {
            let value = HeaderValue::from_str(&auth.header_value())
                .map_err(|err| FetchError::InvalidHeader(format!("authorization: {err}")))?;
            headers.insert(AUTHORIZATION, value);
        }
    }

    let body = match options.body.clone() {
        None => None,
        Some(Body::Json(value)) => {
            let text = serde_json::to_string(&value)
                .map_err(|err| FetchError::Encode(format!("invalid JSON body: {err}")))?;
            let json_content_type = headers
                .get(CONTENT_TYPE)
                .map_or(true, |value| value.to_str().is_ok_and(is_json_content_type));
            if json_content_type {
                headers
                    .entry(CONTENT_TYPE)
                    .or_insert(HeaderValue::from_static(APPLICATION_JSON));
                headers
                    .entry(ACCEPT)
                    .or_insert(HeaderValue::from_static(APPLICATION_JSON));
            }
            Some(RequestBody::Text(text))
        }
        Some(Body::Text(text)) => Some(RequestBody::Text(text)),
        Some(Body::Bytes(bytes)) => Some(RequestBody::Bytes(bytes)),
        Some(Body::Stream(stream)) => Some(RequestBody::Stream(stream)),
    };

    if !options.query.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in &options.query {
            pairs.append_pair(key, &coerce_query_value(value));
        }
    }

    let explicit = options
        .method
        .as_deref()
        .map(str::trim)
        .filter(|method| !method.is_empty())
        .or(prefixed_method);
    let method = match explicit {
        Some(method) => Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .map_err(|err| FetchError::InvalidMethod(format!("'{method}': {err}")))?,
        None if options.body.is_some() => Method::POST,
        None => Method::GET,
    };

    let duplex = match &options.body {
        Some(body) if body.is_stream() => options.duplex.or(Some(Duplex::Half)),
        _ => options.duplex,
    };

    Ok(PreparedRequest {
        method,
        url,
        headers,
        body,
        duplex,
    })
}

/// String coercion for query values: one appended value per key.
fn coerce_query_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Array(items) => items
            .iter()
            .map(coerce_query_value)
            .collect::<Vec<_>>()
            .join(","),
        other => other.to_string(),
    }
}

/// Replaces `:name` path segments with percent-encoded parameter values.
fn substitute_params(url: &str, params: &[(String, String)]) -> String {
    if params.is_empty() {
        return url.to_owned();
    }

    let split = url.find(['?', '#']).unwrap_or(url.len());
    let (path, rest) = url.split_at(split);
    let path = path
        .split('/')
        .map(|segment| {
            let value = segment
                .strip_prefix(':')
                .and_then(|name| params.iter().find(|(key, _)| key == name));
            match value {
                Some((_, value)) => encode_path_segment(value),
                None => segment.to_owned(),
            }
        })
        .collect::<Vec<_>>()
        .join("/");

    format!("{path}{rest}")
}

fn encode_path_segment(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}
