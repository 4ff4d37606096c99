//! Structural validation of model output.
//!
//! The core depends only on the [`Schema`] capability. [`TypedSchema`] is the
//! usual implementation: serde for parsing and schemars for the structural
//! descriptor that fork conflict detection compares.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

/// Model output did not match the expected shape.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("validation failed at '{path}': {message}")]
pub struct ValidationError {
    /// Dotted path to the offending field, `.` for the root.
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn root(message: impl Into<String>) -> Self {
        Self::new(".", message)
    }
}

/// Parse-and-validate capability for values of type `T`.
pub trait Schema<T>: Send + Sync {
    /// Validate raw model output.
    fn parse(&self, input: &Value) -> Result<T, ValidationError>;

    /// Structural description; equal descriptors mean compatible schemas.
    fn descriptor(&self) -> Value;
}

impl<T, S: Schema<T> + ?Sized> Schema<T> for Arc<S> {
    fn parse(&self, input: &Value) -> Result<T, ValidationError> {
        (**self).parse(input)
    }

    fn descriptor(&self) -> Value {
        (**self).descriptor()
    }
}

/// Serde-backed schema with a schemars-generated descriptor.
pub struct TypedSchema<T> {
    descriptor: Value,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned + JsonSchema> TypedSchema<T> {
    pub fn new() -> Self {
        let descriptor = serde_json::to_value(schemars::schema_for!(T)).unwrap_or(Value::Null);
        Self {
            descriptor,
            _marker: PhantomData,
        }
    }
}

impl<T: DeserializeOwned + JsonSchema> Default for TypedSchema<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for TypedSchema<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedSchema")
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T: DeserializeOwned> Schema<T> for TypedSchema<T> {
    fn parse(&self, input: &Value) -> Result<T, ValidationError> {
        serde_path_to_error::deserialize(input.clone()).map_err(|err| {
            let path = err.path().to_string();
            ValidationError::new(path, err.into_inner().to_string())
        })
    }

    fn descriptor(&self) -> Value {
        self.descriptor.clone()
    }
}

/// Schema from a validator closure and an explicit descriptor.
pub struct FnSchema<T> {
    descriptor: Value,
    validate: Box<dyn Fn(&Value) -> Result<T, ValidationError> + Send + Sync>,
}

impl<T> FnSchema<T> {
    pub fn new(
        descriptor: Value,
        validate: impl Fn(&Value) -> Result<T, ValidationError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            descriptor,
            validate: Box::new(validate),
        }
    }
}

impl<T> fmt::Debug for FnSchema<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnSchema")
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

impl<T> Schema<T> for FnSchema<T> {
    fn parse(&self, input: &Value) -> Result<T, ValidationError> {
        (self.validate)(input)
    }

    fn descriptor(&self) -> Value {
        self.descriptor.clone()
    }
}
