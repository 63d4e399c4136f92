use std::fmt;

use bytes::Bytes;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use serde_json::{Map, Value};

use crate::{
    body::BodyStream, transport::TransportResponse, validate::Validator, FetchError, Result,
};

/// Text-to-value parser used for success and error bodies.
///
/// Returns `None` when the text is not parseable instead of failing.
pub trait JsonParser: Send + Sync {
    fn parse(&self, text: &str) -> Option<Value>;
}

impl<F> JsonParser for F
where
    F: Fn(&str) -> Option<Value> + Send + Sync,
{
    fn parse(&self, text: &str) -> Option<Value> {
        self(text)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultJsonParser;

impl JsonParser for DefaultJsonParser {
    fn parse(&self, text: &str) -> Option<Value> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return None;
        }
        serde_json::from_str(trimmed).ok()
    }
}

/// How a success body is decoded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseType {
    Json,
    Text,
    Blob,
    ArrayBuffer,
    FormData,
    Stream,
}

const TEXT_TYPES: [&str; 4] = [
    "image/svg",
    "application/xml",
    "application/xhtml",
    "application/html",
];

impl ResponseType {
    /// Classifies a response from its `content-type` header.
    pub fn classify(headers: &HeaderMap) -> Self {
        let Some(content_type) = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()) else {
            return Self::Json;
        };
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        if is_json_essence(&essence) {
            Self::Json
        } else if essence.starts_with("text/") || TEXT_TYPES.contains(&essence.as_str()) {
            Self::Text
        } else if essence == "application/x-www-form-urlencoded" {
            Self::FormData
        } else {
            Self::Blob
        }
    }
}

fn is_json_essence(essence: &str) -> bool {
    essence == "application/json"
        || essence
            .strip_prefix("application/")
            .is_some_and(|subtype| subtype.ends_with("+json"))
}

/// Whether a `content-type` value denotes JSON.
pub(crate) fn is_json_content_type(value: &str) -> bool {
    let essence = value.split(';').next().unwrap_or_default().trim();
    is_json_essence(&essence.to_ascii_lowercase())
}

/// Decoded success data.
pub enum Payload {
    /// The response had no body.
    Empty,
    /// JSON or text body after validation.
    Json(Value),
    Blob(Bytes),
    ArrayBuffer(Bytes),
    FormData(Vec<(String, String)>),
    Stream(BodyStream),
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Json(value) => f.debug_tuple("Json").field(value).finish(),
            Self::Blob(bytes) => f.debug_tuple("Blob").field(&bytes.len()).finish(),
            Self::ArrayBuffer(bytes) => f.debug_tuple("ArrayBuffer").field(&bytes.len()).finish(),
            Self::FormData(fields) => f.debug_tuple("FormData").field(fields).finish(),
            Self::Stream(stream) => f.debug_tuple("Stream").field(stream).finish(),
        }
    }
}

impl Payload {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Converts structured data into JSON; binary kinds return `None`.
    pub fn into_json(self) -> Option<Value> {
        match self {
            Self::Empty => Some(Value::Null),
            Self::Json(value) => Some(value),
            Self::FormData(fields) => Some(Value::Object(
                fields
                    .into_iter()
                    .map(|(key, value)| (key, Value::String(value)))
                    .collect(),
            )),
            Self::Blob(_) | Self::ArrayBuffer(_) | Self::Stream(_) => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Blob(bytes) | Self::ArrayBuffer(bytes) => Some(bytes),
            _ => None,
        }
    }
}

pub(crate) async fn decode_success(
    response: TransportResponse,
    kind: ResponseType,
    parser: &dyn JsonParser,
    validator: &dyn Validator,
) -> Result<Payload> {
    match kind {
        ResponseType::Json | ResponseType::Text => {
            let text = response.text().await?;
            let value = match parser.parse(&text) {
                Some(value) => value,
                None if text.trim().is_empty() => Value::Null,
                None if kind == ResponseType::Text => Value::String(text),
                None => {
                    return Err(FetchError::Decode(format!(
                        "response body is not valid JSON: {}",
                        preview(&text)
                    )))
                }
            };
            Ok(Payload::Json(validator.parse(value)?))
        }
        ResponseType::Blob => Ok(Payload::Blob(response.bytes().await?)),
        ResponseType::ArrayBuffer => Ok(Payload::ArrayBuffer(response.bytes().await?)),
        ResponseType::FormData => {
            let bytes = response.bytes().await?;
            Ok(Payload::FormData(
                url::form_urlencoded::parse(&bytes).into_owned().collect(),
            ))
        }
        ResponseType::Stream => Ok(Payload::Stream(response.into_stream())),
    }
}

/// Best-effort parse of an error body into envelope fields.
pub(crate) fn error_details(text: &str, parser: &dyn JsonParser) -> Map<String, Value> {
    let mut details = match parser.parse(text) {
        Some(Value::Object(map)) => map,
        Some(other) => Map::from_iter([("message".to_owned(), other)]),
        None if !text.is_empty() => {
            Map::from_iter([("message".to_owned(), Value::String(text.to_owned()))])
        }
        None => Map::new(),
    };
    details.remove("status");
    details.remove("statusText");
    details
}

fn preview(text: &str) -> String {
    const LIMIT: usize = 256;
    match text.char_indices().nth(LIMIT) {
        Some((index, _)) => format!("{}...", &text[..index]),
        None => text.to_owned(),
    }
}
