//! Payload schemas applied to decoded JSON before dispatch.

use std::{fmt, marker::PhantomData};

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("expected a JSON object, found {0}")]
    NotAnObject(FieldKind),
    #[error("missing required field '{0}'")]
    MissingField(String),
    #[error("field '{field}' must be {expected}, found {found}")]
    WrongType {
        field: String,
        expected: FieldKind,
        found: FieldKind,
    },
    #[error("payload does not match model: {0}")]
    Model(#[source] serde_json::Error),
}

/// Validates a decoded payload and turns it into the value handed to the handler.
pub trait PayloadSchema: Send + Sync {
    type Output: Send + 'static;

    fn validate(&self, value: Value) -> Result<Self::Output, ValidationError>;
}

/// Schema defined by a serde model: the payload must deserialize into `T`.
pub struct JsonModel<T> {
    _model: PhantomData<fn() -> T>,
}

impl<T> JsonModel<T> {
    pub fn new() -> Self {
        Self {
            _model: PhantomData,
        }
    }
}

impl<T> Default for JsonModel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonModel<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for JsonModel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JsonModel<{}>", std::any::type_name::<T>())
    }
}

impl<T> PayloadSchema for JsonModel<T>
where
    T: DeserializeOwned + Send + 'static,
{
    type Output = T;

    fn validate(&self, value: Value) -> Result<T, ValidationError> {
        serde_json::from_value(value).map_err(ValidationError::Model)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Null,
    Bool,
    Number,
    String,
    Array,
    Object,
    Any,
}

impl FieldKind {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => FieldKind::Null,
            Value::Bool(_) => FieldKind::Bool,
            Value::Number(_) => FieldKind::Number,
            Value::String(_) => FieldKind::String,
            Value::Array(_) => FieldKind::Array,
            Value::Object(_) => FieldKind::Object,
        }
    }

    fn accepts(self, value: &Value) -> bool {
        self == FieldKind::Any || self == FieldKind::of(value)
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldKind::Null => "null",
            FieldKind::Bool => "a boolean",
            FieldKind::Number => "a number",
            FieldKind::String => "a string",
            FieldKind::Array => "an array",
            FieldKind::Object => "an object",
            FieldKind::Any => "any value",
        };
        f.write_str(name)
    }
}

/// Schema for untyped payloads: a JSON object with required, typed fields.
/// Extra fields are allowed. The handler receives the object unchanged.
#[derive(Debug, Clone, Default)]
pub struct ObjectSchema {
    required: Vec<(String, FieldKind)>,
}

impl ObjectSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require(mut self, field: impl Into<String>, kind: FieldKind) -> Self {
        self.required.push((field.into(), kind));
        self
    }
}

impl PayloadSchema for ObjectSchema {
    type Output = Value;

    fn validate(&self, value: Value) -> Result<Value, ValidationError> {
        let Value::Object(fields) = &value else {
            return Err(ValidationError::NotAnObject(FieldKind::of(&value)));
        };

        for (name, kind) in &self.required {
            let field = fields
                .get(name)
                .ok_or_else(|| ValidationError::MissingField(name.clone()))?;
            if !kind.accepts(field) {
                return Err(ValidationError::WrongType {
                    field: name.clone(),
                    expected: *kind,
                    found: FieldKind::of(field),
                });
            }
        }

        Ok(value)
    }
}
