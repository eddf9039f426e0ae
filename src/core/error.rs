//! Core capability errors (identifier validation, envelope schema).
//!
//! These are bounded and stable: core errors represent domain/refusal states,
//! not library implementation details. Every core error maps to exit code 2
//! at the CLI boundary.

use thiserror::Error;

/// Identifier rejected before any path derivation.
#[derive(Debug, Error, Clone)]
#[error("{field} `{raw}` is unsafe: {reason}")]
pub struct UnsafeIdentifier {
    pub field: &'static str,
    pub raw: String,
    pub reason: &'static str,
}

/// Envelope or event failed schema validation.
#[derive(Debug, Error, Clone)]
#[error("schema violation: {reason}")]
pub struct SchemaError {
    pub reason: String,
}

/// Message type outside the enumerated set.
#[derive(Debug, Error, Clone)]
#[error("unknown message type `{raw}`")]
pub struct UnknownType {
    pub raw: String,
}

/// Canonical error enum for the core capability.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum CoreError {
    #[error(transparent)]
    UnsafeIdentifier(#[from] UnsafeIdentifier),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    UnknownType(#[from] UnknownType),
    #[error("bootstrap: {reason}")]
    Bootstrap { reason: String },
}

impl CoreError {
    pub fn schema(reason: impl Into<String>) -> Self {
        CoreError::Schema(SchemaError {
            reason: reason.into(),
        })
    }

    pub fn bootstrap(reason: impl Into<String>) -> Self {
        CoreError::Bootstrap {
            reason: reason.into(),
        }
    }
}
