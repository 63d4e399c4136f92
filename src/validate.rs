use std::{fmt, marker::PhantomData};

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::ValidationError;

/// Schema check applied to decoded values.
///
/// Returns the (possibly normalized) value, or an error on mismatch.
pub trait Validator: Send + Sync {
    fn parse(&self, value: Value) -> Result<Value, ValidationError>;
}

impl<F> Validator for F
where
    F: Fn(Value) -> Result<Value, ValidationError> + Send + Sync,
{
    fn parse(&self, value: Value) -> Result<Value, ValidationError> {
        self(value)
    }
}

/// Accepts every value unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct Passthrough;

impl Validator for Passthrough {
    fn parse(&self, value: Value) -> Result<Value, ValidationError> {
        Ok(value)
    }
}

/// Validates by deserializing into `T` and serializing back.
///
/// Unknown fields are dropped unless `T` keeps them; defaults declared on
/// `T` are filled in.
pub struct TypedValidator<T> {
    _type: PhantomData<fn() -> T>,
}

impl<T> TypedValidator<T> {
    pub fn new() -> Self {
        Self { _type: PhantomData }
    }
}

impl<T> Default for TypedValidator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for TypedValidator<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for TypedValidator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TypedValidator")
            .field(&std::any::type_name::<T>())
            .finish()
    }
}

impl<T> Validator for TypedValidator<T>
where
    T: DeserializeOwned + Serialize,
{
    fn parse(&self, value: Value) -> Result<Value, ValidationError> {
        let typed: T = serde_json::from_value(value).map_err(|err| {
            ValidationError::new(format!(
                "expected {}: {err}",
                std::any::type_name::<T>()
            ))
        })?;
        serde_json::to_value(typed).map_err(|err| ValidationError::new(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use serde_json::{json, Value};

    use super::{Passthrough, TypedValidator, Validator};
    use crate::ValidationError;

    #[derive(Serialize, Deserialize)]
    struct Token {
        token: String,
        #[serde(default)]
        expires_in: u64,
    }

    #[test]
    fn passthrough_keeps_value() {
        let value = json!({"anything": [1, 2]});
        assert_eq!(Passthrough.parse(value.clone()), Ok(value));
    }

    #[test]
    fn typed_validator_fills_defaults() {
        let parsed = TypedValidator::<Token>::new()
            .parse(json!({"token": "t"}))
            .expect("must validate");
        assert_eq!(parsed, json!({"token": "t", "expires_in": 0}));
    }

    #[test]
    fn typed_validator_rejects_mismatch() {
        let err = TypedValidator::<Token>::new()
            .parse(json!({"token": 5}))
            .expect_err("must reject");
        assert!(err.message.contains("Token"));
    }

    #[test]
    fn closures_are_validators() {
        let non_null = |value: Value| {
            if value.is_null() {
                Err(ValidationError::new("null"))
            } else {
                Ok(value)
            }
        };
        assert!(non_null.parse(Value::Null).is_err());
        assert!(non_null.parse(json!(1)).is_ok());
    }
}
