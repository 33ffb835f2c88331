//! Shared model instances
//!
//! `Handle<T>` is the typed, shared form of an instance; nested fields hold
//! handles so one stored record maps to one live instance no matter how
//! many fields point at it. `ModelHandle` erases the type for the
//! serializer, which walks graphs of mixed models by name.

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::ModelResult;
use crate::object_id::ObjectId;
use crate::registry::{ModelDescriptor, Registry};
use crate::value::Value;

use super::core_trait::Model;

/// Shared, lockable model instance
pub struct Handle<T: Model>(Arc<RwLock<T>>);

impl<T: Model> Handle<T> {
    pub fn new(model: T) -> Self {
        Self(Arc::new(RwLock::new(model)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.0.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.0.write()
    }

    /// Whether both handles point at the same instance
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn object_id(&self) -> Option<ObjectId> {
        self.0.read().object_id()
    }

    pub fn is_persisted(&self) -> bool {
        self.object_id().is_some()
    }

    /// Type-erased view of the same instance
    pub fn erase(&self) -> ModelHandle {
        let erased: Arc<dyn ErasedModel> = self.0.clone();
        ModelHandle(erased)
    }
}

impl<T: Model> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T: Model> Default for Handle<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Model> From<T> for Handle<T> {
    fn from(model: T) -> Self {
        Self::new(model)
    }
}

impl<T: Model> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl<T: Model> Eq for Handle<T> {}

impl<T: Model> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as *const () as usize).hash(state);
    }
}

// Graphs may be cyclic, so only the identity is printed
impl<T: Model> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_read() {
            Some(guard) => write!(f, "Handle<{}>({:?})", T::model_name(), guard.object_id()),
            None => write!(f, "Handle<{}>(<locked>)", T::model_name()),
        }
    }
}

/// Object-safe access to a locked model of any type
pub(crate) trait ErasedModel: Send + Sync {
    fn model_name(&self) -> &'static str;
    fn object_id(&self) -> Option<ObjectId>;
    fn try_object_id(&self) -> Option<Option<ObjectId>>;
    fn set_object_id(&self, id: Option<ObjectId>);
    fn read_fields(&self, names: &[&str]) -> ModelResult<Vec<Value>>;
    fn write_fields(&self, values: Vec<(String, Value)>) -> ModelResult<()>;
    fn ensure_registered(&self, registry: &Registry) -> ModelResult<Arc<ModelDescriptor>>;
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Model> ErasedModel for RwLock<T> {
    fn model_name(&self) -> &'static str {
        T::model_name()
    }

    fn object_id(&self) -> Option<ObjectId> {
        self.read().object_id()
    }

    fn try_object_id(&self) -> Option<Option<ObjectId>> {
        self.try_read().map(|guard| guard.object_id())
    }

    fn set_object_id(&self, id: Option<ObjectId>) {
        self.write().set_object_id(id);
    }

    fn read_fields(&self, names: &[&str]) -> ModelResult<Vec<Value>> {
        let guard = self.read();
        names.iter().map(|name| guard.get_field(name)).collect()
    }

    fn write_fields(&self, values: Vec<(String, Value)>) -> ModelResult<()> {
        // a rejected value must leave the live instance untouched
        let mut staged = T::default();
        for (name, value) in &values {
            staged.set_field(name, value.clone())?;
        }

        let mut guard = self.write();
        for (name, value) in values {
            guard.set_field(&name, value)?;
        }
        Ok(())
    }

    fn ensure_registered(&self, registry: &Registry) -> ModelResult<Arc<ModelDescriptor>> {
        registry.ensure_registered::<T>()
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Type-erased shared model instance
#[derive(Clone)]
pub struct ModelHandle(Arc<dyn ErasedModel>);

impl ModelHandle {
    /// Blank instance of `T`
    pub fn blank<T: Model>() -> Self {
        Handle::new(T::default()).erase()
    }

    pub fn model_name(&self) -> &'static str {
        self.0.model_name()
    }

    pub fn object_id(&self) -> Option<ObjectId> {
        self.0.object_id()
    }

    pub fn set_object_id(&self, id: Option<ObjectId>) {
        self.0.set_object_id(id);
    }

    /// Read one field
    pub fn get(&self, field: &str) -> ModelResult<Value> {
        let mut values = self.0.read_fields(&[field])?;
        Ok(values.pop().unwrap_or(Value::Null))
    }

    /// Assign one field
    pub fn set(&self, field: &str, value: Value) -> ModelResult<()> {
        self.0.write_fields(vec![(field.to_string(), value)])
    }

    /// Read several fields under a single lock
    pub fn read_fields(&self, names: &[&str]) -> ModelResult<Vec<Value>> {
        self.0.read_fields(names)
    }

    /// Assign several fields, in order, under a single lock. Values are
    /// tried on a blank instance first; if any is rejected nothing is
    /// assigned.
    pub fn write_fields(&self, values: Vec<(String, Value)>) -> ModelResult<()> {
        self.0.write_fields(values)
    }

    /// Descriptor of this instance's model, registering it on first use
    pub fn descriptor(&self, registry: &Registry) -> ModelResult<Arc<ModelDescriptor>> {
        self.0.ensure_registered(registry)
    }

    pub fn downcast<T: Model>(&self) -> Option<Handle<T>> {
        Arc::clone(&self.0)
            .into_any()
            .downcast::<RwLock<T>>()
            .ok()
            .map(Handle)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

impl PartialEq for ModelHandle {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for ModelHandle {}

impl Hash for ModelHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_object_id() {
            Some(id) => write!(f, "ModelHandle<{}>({:?})", self.model_name(), id),
            None => write!(f, "ModelHandle<{}>(<locked>)", self.model_name()),
        }
    }
}
