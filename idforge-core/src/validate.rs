//! Response validation.
//!
//! Every call site names the shape it expects through a [`Validator`]. The
//! response cache re-runs the validator on every read, so two call sites may
//! ask for different projections of the same cached resource.

use std::fmt;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

/// A response body did not match the expected shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct ValidationError {
    /// The offending field, when it can be identified.
    pub field: Option<String>,
    pub message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            field: None,
            message: message.into(),
        }
    }

    pub fn for_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "invalid response field '{}': {}", field, self.message),
            None => write!(f, "invalid response: {}", self.message),
        }
    }
}

/// Converts an untyped JSON body into `T`, or explains why it cannot.
pub trait Validator<T>: Send + Sync {
    fn validate(&self, value: &Value) -> Result<T, ValidationError>;
}

impl<T, F> Validator<T> for F
where
    F: Fn(&Value) -> Result<T, ValidationError> + Send + Sync,
{
    fn validate(&self, value: &Value) -> Result<T, ValidationError> {
        self(value)
    }
}

/// Validates by deserializing into `T`.
///
/// Missing required fields and type mismatches are reported with the field
/// name serde identifies.
pub struct JsonSchema<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonSchema<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonSchema<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for JsonSchema<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JsonSchema<{}>", std::any::type_name::<T>())
    }
}

impl<T: DeserializeOwned> Validator<T> for JsonSchema<T> {
    fn validate(&self, value: &Value) -> Result<T, ValidationError> {
        T::deserialize(value).map_err(|e| {
            let message = e.to_string();
            match backticked(&message).map(str::to_owned) {
                Some(field) => ValidationError::for_field(field, message),
                None => ValidationError::new(message),
            }
        })
    }
}

/// Accepts any body and returns it untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct AnyJson;

impl Validator<Value> for AnyJson {
    fn validate(&self, value: &Value) -> Result<Value, ValidationError> {
        Ok(value.clone())
    }
}

/// serde reports field names as `` missing field `email` ``. Other messages
/// quote values, not fields.
fn backticked(message: &str) -> Option<&str> {
    const FIELD_PREFIXES: [&str; 3] = ["missing field", "unknown field", "duplicate field"];
    if !FIELD_PREFIXES.iter().any(|p| message.starts_with(p)) {
        return None;
    }
    let start = message.find('`')? + 1;
    let len = message[start..].find('`')?;
    Some(&message[start..start + len])
}
