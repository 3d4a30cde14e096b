//! Validation errors for tool-call arguments.

use thiserror::Error;

use crate::tool::SchemaType;

/// An argument failed schema validation. Always names the offending field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing required field '{field}'")]
    MissingRequired { field: String },

    #[error("invalid field '{field}': expected {expected}, got {actual}")]
    WrongType {
        field: String,
        expected: SchemaType,
        actual: &'static str,
    },
}

impl ValidationError {
    /// The name of the field that failed validation.
    pub fn field(&self) -> &str {
        match self {
            Self::MissingRequired { field } | Self::WrongType { field, .. } => field,
        }
    }
}
