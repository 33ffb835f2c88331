//! Error types for the ODM
//!
//! Configuration mistakes (unknown models, conflicting registrations) and
//! data-integrity failures (dangling references, unsaved dependencies) share
//! one error type so they surface unchanged through nested restores.

use thiserror::Error;

use crate::object_id::ObjectId;

/// Result type alias for model operations
pub type ModelResult<T> = Result<T, ModelError>;

/// ODM error type alias
pub type OdmError = ModelError;

/// ODM result type alias
pub type OdmResult<T> = ModelResult<T>;

/// Boxed driver error carried through `ModelError::Backend`
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error types for ODM operations
#[derive(Debug, Error)]
pub enum ModelError {
    /// A model name was looked up but never registered
    #[error("Model '{0}' is not registered")]
    UnknownModel(String),

    /// A field name is not declared on the model
    #[error("Model '{model}' has no field '{field}'")]
    UnknownField { model: String, field: String },

    /// A different descriptor is already registered under this name
    #[error("Model '{0}' is already registered with a different descriptor")]
    DuplicateModel(String),

    /// A reference points at a record the backend no longer has
    #[error("Reference to {model}({id}) could not be resolved")]
    DanglingReference { model: String, id: ObjectId },

    /// A backend that stores references as keys met an unsaved nested instance
    #[error("Field '{field}' of '{model}' refers to an unsaved {dependency} instance")]
    UnsavedDependency {
        model: String,
        field: String,
        dependency: String,
    },

    /// The operation needs a stored identifier and the instance has none
    #[error("{0} instance has not been saved")]
    NotPersisted(String),

    /// An unsaved instance embeds itself through its own fields
    #[error("Unsaved {0} instance embeds itself; save one side of the cycle first")]
    CyclicEmbed(String),

    /// A state record or handle belongs to another model
    #[error("Expected '{expected}' but found '{found}'")]
    TypeMismatch { expected: String, found: String },

    /// A stored value cannot be coerced to the declared field type
    #[error("Invalid value: expected {expected}, found {found}")]
    InvalidValue { expected: String, found: String },

    /// A persisted instance's record is gone from the backend
    #[error("Record {id} not found in '{model}'")]
    NotFound { model: String, id: ObjectId },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Connection pool error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Driver error, passed through unchanged
    #[error("Backend error: {0}")]
    Backend(#[source] BoxError),
}

impl ModelError {
    /// Wrap a driver error without altering it
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        ModelError::Backend(Box::new(err))
    }

    pub fn unknown_field(model: impl Into<String>, field: impl Into<String>) -> Self {
        ModelError::UnknownField {
            model: model.into(),
            field: field.into(),
        }
    }

    pub fn invalid_value(expected: impl Into<String>, found: impl Into<String>) -> Self {
        ModelError::InvalidValue {
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Whether the error comes from how models are declared or wired
    /// rather than from stored data
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ModelError::UnknownModel(_)
                | ModelError::UnknownField { .. }
                | ModelError::DuplicateModel(_)
                | ModelError::Configuration(_)
        )
    }
}

impl From<sqlx::Error> for ModelError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                ModelError::Connection(err.to_string())
            }
            other => ModelError::backend(other),
        }
    }
}

impl From<serde_json::Error> for ModelError {
    fn from(err: serde_json::Error) -> Self {
        ModelError::Serialization(err.to_string())
    }
}
