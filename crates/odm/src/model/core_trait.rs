//! Core Model Trait - Base definition for mapped objects
//!
//! Declares the model name, the storage collection, the field table and the
//! accessors the serializer uses to read and write fields by name.

use std::fmt::Debug;
use std::sync::Arc;

use crate::error::{ModelError, ModelResult};
use crate::fields::FieldDescriptor;
use crate::manager::Manager;
use crate::object_id::ObjectId;
use crate::serializer::Serializer;
use crate::value::Value;

/// Core trait for objects persisted through the ODM
pub trait Model: Send + Sync + Debug + Default + 'static {
    /// Registered name of this model, unique per registry
    fn model_name() -> &'static str;

    /// Collection or table holding this model's records
    fn collection_name() -> &'static str {
        Self::model_name()
    }

    /// Primary key column for relational backends
    fn primary_key_name() -> &'static str {
        "id"
    }

    /// Declared fields, in the order they are flattened
    fn fields() -> Vec<FieldDescriptor>;

    /// Storage identifier, absent until first save
    fn object_id(&self) -> Option<ObjectId>;

    fn set_object_id(&mut self, id: Option<ObjectId>);

    /// Read a declared field
    fn get_field(&self, name: &str) -> ModelResult<Value>;

    /// Assign a declared field from a restored value
    fn set_field(&mut self, name: &str, value: Value) -> ModelResult<()>;

    /// Manager bound to this model instead of the registry default
    fn declared_manager() -> Option<Arc<dyn Manager>> {
        None
    }

    /// Serializer bound to this model instead of the one matching its manager
    fn declared_serializer() -> Option<Arc<dyn Serializer>> {
        None
    }

    /// Error for a field name this model does not declare
    fn unknown_field(name: &str) -> ModelError {
        ModelError::unknown_field(Self::model_name(), name)
    }
}
