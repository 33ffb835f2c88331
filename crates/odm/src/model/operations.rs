//! Model Operations - Save, restore, delete and lookup
//!
//! Type-level operations live on `ModelExt`, which every `Model` gets for
//! free. Instance operations live on `Handle<T>` because they need the
//! shared instance: a save assigns the identifier in place, and a reload
//! rewrites the fields every other holder of the handle sees.

use std::sync::Arc;

use futures::stream::TryStreamExt;

use crate::error::{ModelError, ModelResult};
use crate::manager::Manager;
use crate::object_id::ObjectId;
use crate::registry::{ModelDescriptor, Registry};
use crate::serializer::{FlattenContext, RestoreContext, Serializer};
use crate::state::{Filter, StateRecord};

use super::core_trait::Model;
use super::handle::Handle;

/// Type-level operations available on every model
#[allow(async_fn_in_trait)]
pub trait ModelExt: Model + Sized {
    /// Descriptor of this model, registering it on first use
    fn descriptor(registry: &Registry) -> ModelResult<Arc<ModelDescriptor>> {
        registry.ensure_registered::<Self>()
    }

    /// Manager bound to this model
    fn objects(registry: &Registry) -> ModelResult<Arc<dyn Manager>> {
        let descriptor = Self::descriptor(registry)?;
        registry.manager_for(descriptor.name())
    }

    /// Serializer bound to this model
    fn serializer(registry: &Registry) -> ModelResult<Arc<dyn Serializer>> {
        let descriptor = Self::descriptor(registry)?;
        registry.serializer_for(descriptor.name())
    }

    /// Build an instance graph from a flattened record. References are
    /// fetched through their models' managers; each stored record becomes
    /// exactly one instance within the call.
    async fn restore(registry: &Registry, state: StateRecord) -> ModelResult<Handle<Self>> {
        Self::descriptor(registry)?;
        let context = RestoreContext::new(registry);
        let instance = context.restore(Self::model_name(), state).await?;
        tracing::debug!(model = Self::model_name(), stats = %context.stats(), "Restored instance");

        instance.downcast::<Self>().ok_or_else(|| ModelError::TypeMismatch {
            expected: Self::model_name().to_string(),
            found: instance.model_name().to_string(),
        })
    }

    /// Restore the record stored under `id`
    async fn get(registry: &Registry, id: &ObjectId) -> ModelResult<Option<Handle<Self>>> {
        match Self::objects(registry)?.get(id).await? {
            Some(state) => Self::restore(registry, state).await.map(Some),
            None => Ok(None),
        }
    }

    async fn find_one(registry: &Registry, filter: Filter) -> ModelResult<Option<Handle<Self>>> {
        match Self::objects(registry)?.find_one(filter).await? {
            Some(state) => Self::restore(registry, state).await.map(Some),
            None => Ok(None),
        }
    }

    /// Restore every matching record. All results share one resolution
    /// scope, so records referencing each other resolve to the same
    /// instances.
    async fn find(registry: &Registry, filter: Filter) -> ModelResult<Vec<Handle<Self>>> {
        let descriptor = Self::descriptor(registry)?;
        let manager = registry.manager_for(descriptor.name())?;
        let states: Vec<StateRecord> = manager.find(filter).await?.try_collect().await?;

        let context = RestoreContext::new(registry);
        let mut instances = Vec::with_capacity(states.len());
        for state in states {
            let existing = state
                .id()
                .and_then(|id| context.scope().get(descriptor.name(), &id));
            let instance = match existing {
                Some(instance) => instance,
                None => context.restore(descriptor.name(), state).await?,
            };
            let typed = instance.downcast::<Self>().ok_or_else(|| ModelError::TypeMismatch {
                expected: Self::model_name().to_string(),
                found: instance.model_name().to_string(),
            })?;
            instances.push(typed);
        }

        tracing::debug!(
            model = Self::model_name(),
            found = instances.len(),
            stats = %context.stats(),
            "Restored query results"
        );
        Ok(instances)
    }

    async fn count(registry: &Registry, filter: Filter) -> ModelResult<u64> {
        Self::objects(registry)?.count(filter).await
    }
}

impl<T: Model> ModelExt for T {}

impl<T: Model> Handle<T> {
    /// Flatten this instance into the record its manager stores
    pub fn flatten(&self, registry: &Registry) -> ModelResult<StateRecord> {
        FlattenContext::new(registry).flatten_model(&self.erase())
    }

    /// Store this instance. The first save assigns the identifier; later
    /// saves replace the record stored under it.
    pub async fn save(&self, registry: &Registry) -> ModelResult<ObjectId> {
        let manager = T::objects(registry)?;
        let record = self.flatten(registry)?;
        let current = self.object_id();

        let id = manager.upsert(current.clone(), record).await?;
        self.write().set_object_id(Some(id.clone()));

        tracing::debug!(
            model = T::model_name(),
            id = %id,
            created = current.is_none(),
            "Saved instance"
        );
        Ok(id)
    }

    /// Remove the stored record and make this instance transient again.
    /// Records referencing it are left as they are.
    pub async fn delete(&self, registry: &Registry) -> ModelResult<()> {
        let id = self
            .object_id()
            .ok_or_else(|| ModelError::NotPersisted(T::model_name().to_string()))?;

        let removed = T::objects(registry)?.delete(Filter::by_id(id.clone())).await?;
        if removed == 0 {
            tracing::warn!(model = T::model_name(), id = %id, "Delete matched no stored record");
        } else {
            tracing::debug!(model = T::model_name(), id = %id, "Deleted instance");
        }

        self.write().set_object_id(None);
        Ok(())
    }

    /// Re-read the stored record into this instance
    pub async fn reload(&self, registry: &Registry) -> ModelResult<()> {
        let id = self
            .object_id()
            .ok_or_else(|| ModelError::NotPersisted(T::model_name().to_string()))?;

        let descriptor = T::descriptor(registry)?;
        let manager = registry.manager_for(descriptor.name())?;
        let state = manager.get(&id).await?.ok_or_else(|| ModelError::NotFound {
            model: T::model_name().to_string(),
            id: id.clone(),
        })?;

        RestoreContext::new(registry)
            .restore_into(self.erase(), descriptor, state)
            .await
    }
}
