use serde::{ser::SerializeStruct, Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

/// Error side of an [`Envelope`].
///
/// Serializes as the parsed error body's fields with `status` and
/// `statusText` set on top.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub status: u16,
    #[serde(rename = "statusText")]
    pub status_text: String,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl ErrorPayload {
    pub fn message(&self) -> Option<&str> {
        self.details.get("message")?.as_str()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.details.get(key)
    }
}

/// Result of a call: either decoded data or an HTTP error payload.
#[derive(Clone, Debug, PartialEq)]
pub enum Envelope<T> {
    Data(T),
    Error(ErrorPayload),
}

impl<T> Envelope<T> {
    pub fn data(&self) -> Option<&T> {
        match self {
            Self::Data(data) => Some(data),
            Self::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&ErrorPayload> {
        match self {
            Self::Data(_) => None,
            Self::Error(error) => Some(error),
        }
    }

    pub fn into_data(self) -> Option<T> {
        match self {
            Self::Data(data) => Some(data),
            Self::Error(_) => None,
        }
    }

    pub fn into_result(self) -> Result<T, ErrorPayload> {
        match self {
            Self::Data(data) => Ok(data),
            Self::Error(error) => Err(error),
        }
    }

    pub fn is_data(&self) -> bool {
        matches!(self, Self::Data(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Envelope<U> {
        match self {
            Self::Data(data) => Envelope::Data(f(data)),
            Self::Error(error) => Envelope::Error(error),
        }
    }
}

impl<T: Serialize> Serialize for Envelope<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Envelope", 2)?;
        match self {
            Self::Data(data) => {
                state.serialize_field("data", data)?;
                state.serialize_field("error", &None::<ErrorPayload>)?;
            }
            Self::Error(error) => {
                state.serialize_field("data", &None::<T>)?;
                state.serialize_field("error", error)?;
            }
        }
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map};

    use super::{Envelope, ErrorPayload};

    #[test]
    fn data_side_serializes_with_null_error() {
        let envelope = Envelope::Data(json!({"token": "t"}));
        assert_eq!(
            serde_json::to_value(&envelope).expect("must serialize"),
            json!({"data": {"token": "t"}, "error": null})
        );
    }

    #[test]
    fn error_side_flattens_details() {
        let envelope: Envelope<()> = Envelope::Error(ErrorPayload {
            status: 404,
            status_text: "Not Found".to_owned(),
            details: Map::from_iter([("message".to_owned(), json!("not found"))]),
        });
        assert_eq!(
            serde_json::to_value(&envelope).expect("must serialize"),
            json!({
                "data": null,
                "error": {"message": "not found", "status": 404, "statusText": "Not Found"}
            })
        );
        assert_eq!(envelope.error().and_then(ErrorPayload::message), Some("not found"));
    }

    #[test]
    fn map_keeps_error_side() {
        let envelope: Envelope<u8> = Envelope::Error(ErrorPayload {
            status: 500,
            status_text: "Internal Server Error".to_owned(),
            details: Map::new(),
        });
        assert!(!envelope.map(|value| value + 1).is_data());
    }
}
