//! Input/Output Contracts
//!
//! Structural checks applied to trigger data and to step inputs and
//! outputs. The engine only cares whether a value passes; what "passes"
//! means is up to the [`Contract`] implementation. [`Shape`] covers the
//! common case of "an object with these typed fields".

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// A value did not match its declared contract.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("validation failed at '{path}': {message}")]
pub struct ValidationError {
    /// Location of the offending value (`$` is the root)
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
}

/// Structural validation for a JSON value.
pub trait Contract: Send + Sync + fmt::Debug {
    fn validate(&self, value: &Value) -> Result<(), ValidationError>;
}

/// JSON type expected for a field.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Any,
    Null,
    Bool,
    Number,
    Integer,
    String,
    Array,
    Object,
}

impl FieldType {
    fn matches(self, value: &Value) -> bool {
        match self {
            Self::Any => true,
            Self::Null => value.is_null(),
            Self::Bool => value.is_boolean(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::String => value.is_string(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Any => "any",
            Self::Null => "null",
            Self::Bool => "bool",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::String => "string",
            Self::Array => "array",
            Self::Object => "object",
        };
        f.write_str(label)
    }
}

/// Describes one field of an object [`Shape`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldType,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

/// An object with typed fields.
///
/// # Example
///
/// ```
/// use durastep::workflow::contract::{Contract, FieldType, Shape};
/// use serde_json::json;
///
/// let shape = Shape::object()
///     .field("v", FieldType::Integer)
///     .optional("note", FieldType::String);
///
/// assert!(shape.validate(&json!({"v": 5})).is_ok());
/// assert!(shape.validate(&json!({"v": "five"})).is_err());
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct Shape {
    #[serde(default)]
    pub fields: Vec<FieldSpec>,

    /// Reject keys not listed in `fields`
    #[serde(default)]
    pub strict: bool,
}

impl Shape {
    /// An object shape with no declared fields.
    pub fn object() -> Self {
        Self::default()
    }

    /// Adds a required field.
    pub fn field(mut self, name: impl Into<String>, kind: FieldType) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            kind,
            required: true,
        });
        self
    }

    /// Adds an optional field (type-checked only when present).
    pub fn optional(mut self, name: impl Into<String>, kind: FieldType) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            kind,
            required: false,
        });
        self
    }

    /// Rejects keys that are not declared.
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }
}

impl Contract for Shape {
    fn validate(&self, value: &Value) -> Result<(), ValidationError> {
        let object = value
            .as_object()
            .ok_or_else(|| ValidationError::new("$", "expected an object"))?;

        for spec in &self.fields {
            match object.get(&spec.name) {
                None if spec.required => {
                    return Err(ValidationError::new(
                        format!("$.{}", spec.name),
                        "required field is missing",
                    ));
                }
                None => {}
                Some(field) if !spec.kind.matches(field) => {
                    return Err(ValidationError::new(
                        format!("$.{}", spec.name),
                        format!("expected {}", spec.kind),
                    ));
                }
                Some(_) => {}
            }
        }

        if self.strict {
            if let Some(extra) = object
                .keys()
                .find(|key| !self.fields.iter().any(|f| &f.name == *key))
            {
                return Err(ValidationError::new(
                    format!("$.{}", extra),
                    "field is not declared",
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn shape() -> Shape {
        Shape::object()
            .field("v", FieldType::Integer)
            .optional("label", FieldType::String)
    }

    #[test]
    fn test_shape_accepts_matching_object() {
        assert!(shape().validate(&json!({"v": 5})).is_ok());
        assert!(shape().validate(&json!({"v": 5, "label": "x"})).is_ok());
    }

    #[test]
    fn test_shape_missing_required() {
        let err = shape().validate(&json!({"label": "x"})).unwrap_err();
        assert_eq!(err.path, "$.v");
        assert!(err.message.contains("missing"));
    }

    #[test]
    fn test_shape_wrong_type() {
        let err = shape().validate(&json!({"v": 1.5})).unwrap_err();
        assert_eq!(err.message, "expected integer");
    }

    #[test]
    fn test_shape_optional_wrong_type() {
        assert!(shape().validate(&json!({"v": 1, "label": 3})).is_err());
    }

    #[test]
    fn test_shape_rejects_non_object() {
        let err = shape().validate(&json!([1, 2])).unwrap_err();
        assert_eq!(err.path, "$");
    }

    #[test]
    fn test_shape_strict() {
        let strict = shape().strict();
        assert!(strict.validate(&json!({"v": 1})).is_ok());

        let err = strict.validate(&json!({"v": 1, "extra": true})).unwrap_err();
        assert_eq!(err.path, "$.extra");
    }

    #[test]
    fn test_shape_from_yaml() {
        let yaml = "fields:\n  - name: v\n    kind: number\n  - name: tag\n    kind: string\n    required: false\nstrict: true\n";
        let shape: Shape = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(shape.fields.len(), 2);
        assert!(shape.fields[0].required);
        assert!(!shape.fields[1].required);
        assert!(shape.validate(&json!({"v": 2.5})).is_ok());
    }

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::new("$.v", "expected integer");
        assert_eq!(err.to_string(), "validation failed at '$.v': expected integer");
    }
}
