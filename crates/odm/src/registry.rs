//! Model Registry - runtime table of model descriptors and their bindings
//!
//! Every model is registered once under its name. Managers and serializers
//! are bound on first lookup and cached for the registry's lifetime, so
//! forward references between models only need to resolve when used.

use std::any::TypeId;
use std::fmt;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use once_cell::sync::{Lazy, OnceCell};
use parking_lot::RwLock;

use crate::backends::{MemoryDocumentStore, MemoryRelationalStore, PgStore};
use crate::config::OdmConfig;
use crate::error::{ModelError, ModelResult};
use crate::fields::{FieldDescriptor, FieldTable};
use crate::manager::{
    BackendKind, DocumentManager, DocumentStore, Manager, RelationalManager, RelationalStore,
};
use crate::model::{Model, ModelHandle};
use crate::schema::TableSchema;
use crate::serializer::{self, Serializer};

static GLOBAL_REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// Immutable description of one model type
#[derive(Clone)]
pub struct ModelDescriptor {
    name: String,
    collection: String,
    primary_key: String,
    fields: FieldTable,
    type_id: Option<TypeId>,
    constructor: Option<fn() -> ModelHandle>,
    manager: Option<Arc<dyn Manager>>,
    serializer: Option<Arc<dyn Serializer>>,
}

impl ModelDescriptor {
    /// Describe a model type from its trait implementation
    pub fn of<T: Model>() -> ModelResult<Self> {
        let fields = FieldTable::new(T::model_name(), T::fields())?;
        let mut builder = Self::builder(T::model_name(), fields)
            .collection(T::collection_name())
            .primary_key(T::primary_key_name())
            .constructor::<T>();

        if let Some(manager) = T::declared_manager() {
            builder = builder.manager(manager);
        }
        if let Some(serializer) = T::declared_serializer() {
            builder = builder.serializer(serializer);
        }
        Ok(builder.build())
    }

    pub fn builder(name: impl Into<String>, fields: FieldTable) -> DescriptorBuilder {
        let name = name.into();
        DescriptorBuilder {
            descriptor: ModelDescriptor {
                collection: name.clone(),
                name,
                primary_key: "id".to_string(),
                fields,
                type_id: None,
                constructor: None,
                manager: None,
                serializer: None,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    pub fn fields(&self) -> &FieldTable {
        &self.fields
    }

    pub fn field(&self, name: &str) -> ModelResult<&FieldDescriptor> {
        self.fields.get(name)
    }

    pub fn type_id(&self) -> Option<TypeId> {
        self.type_id
    }

    pub fn declared_manager(&self) -> Option<&Arc<dyn Manager>> {
        self.manager.as_ref()
    }

    pub fn declared_serializer(&self) -> Option<&Arc<dyn Serializer>> {
        self.serializer.as_ref()
    }

    /// Blank instance to restore state into
    pub fn instantiate(&self) -> ModelResult<ModelHandle> {
        self.constructor.map(|construct| construct()).ok_or_else(|| {
            ModelError::Configuration(format!(
                "Model '{}' has no Rust type to instantiate",
                self.name
            ))
        })
    }

    /// Same model declaration, including the declared manager and serializer
    pub fn is_compatible(&self, other: &ModelDescriptor) -> bool {
        self.name == other.name
            && self.collection == other.collection
            && self.primary_key == other.primary_key
            && self.fields == other.fields
            && self.type_id == other.type_id
            && same_binding(&self.manager, &other.manager)
            && same_binding(&self.serializer, &other.serializer)
    }
}

fn same_binding<T: ?Sized>(left: &Option<Arc<T>>, right: &Option<Arc<T>>) -> bool {
    match (left, right) {
        (None, None) => true,
        (Some(left), Some(right)) => Arc::ptr_eq(left, right),
        _ => false,
    }
}

impl fmt::Debug for ModelDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelDescriptor")
            .field("name", &self.name)
            .field("collection", &self.collection)
            .field("primary_key", &self.primary_key)
            .field("fields", &self.fields.len())
            .field("declared_manager", &self.manager.is_some())
            .field("declared_serializer", &self.serializer.is_some())
            .finish()
    }
}

/// Builder for descriptors of models without a hand-written `Model` impl
pub struct DescriptorBuilder {
    descriptor: ModelDescriptor,
}

impl DescriptorBuilder {
    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.descriptor.collection = collection.into();
        self
    }

    pub fn primary_key(mut self, column: impl Into<String>) -> Self {
        self.descriptor.primary_key = column.into();
        self
    }

    pub fn constructor<T: Model>(mut self) -> Self {
        self.descriptor.type_id = Some(TypeId::of::<T>());
        self.descriptor.constructor = Some(ModelHandle::blank::<T>);
        self
    }

    pub fn manager(mut self, manager: Arc<dyn Manager>) -> Self {
        self.descriptor.manager = Some(manager);
        self
    }

    pub fn serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.descriptor.serializer = Some(serializer);
        self
    }

    pub fn build(self) -> ModelDescriptor {
        self.descriptor
    }
}

/// Backend used for models that declare no manager
#[derive(Debug, Clone)]
pub enum DefaultBackend {
    Document(Arc<dyn DocumentStore>),
    Relational(Arc<dyn RelationalStore>),
}

impl DefaultBackend {
    pub fn kind(&self) -> BackendKind {
        match self {
            DefaultBackend::Document(_) => BackendKind::Document,
            DefaultBackend::Relational(_) => BackendKind::Relational,
        }
    }
}

struct RegisteredModel {
    descriptor: Arc<ModelDescriptor>,
    manager: OnceCell<Arc<dyn Manager>>,
    serializer: OnceCell<Arc<dyn Serializer>>,
}

/// Thread-safe model registry
#[derive(Clone)]
pub struct Registry {
    models: Arc<DashMap<String, Arc<RegisteredModel>>>,
    backend: Arc<RwLock<Option<DefaultBackend>>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("models", &self.model_names())
            .field("backend", &self.backend.read().as_ref().map(DefaultBackend::kind))
            .finish()
    }
}

impl Registry {
    /// Create a new empty registry without a default backend
    pub fn new() -> Self {
        Self {
            models: Arc::new(DashMap::new()),
            backend: Arc::new(RwLock::new(None)),
        }
    }

    /// Process-wide registry
    pub fn global() -> &'static Registry {
        &GLOBAL_REGISTRY
    }

    /// Build a registry whose default backend follows the configuration
    pub async fn connect(config: &OdmConfig) -> ModelResult<Self> {
        config.validate()?;

        let backend = match (config.backend, config.database_url.as_deref()) {
            (BackendKind::Document, _) => DefaultBackend::Document(Arc::new(
                MemoryDocumentStore::with_id_strategy(config.id_strategy),
            )),
            (BackendKind::Relational, Some(_)) => {
                DefaultBackend::Relational(Arc::new(PgStore::connect(config).await?))
            }
            (BackendKind::Relational, None) => {
                DefaultBackend::Relational(Arc::new(MemoryRelationalStore::new()))
            }
        };

        tracing::debug!(backend = %backend.kind(), "Registry connected");
        let registry = Self::new();
        registry.set_default_backend(backend);
        Ok(registry)
    }

    pub fn with_document_store(self, store: Arc<dyn DocumentStore>) -> Self {
        self.set_default_backend(DefaultBackend::Document(store));
        self
    }

    pub fn with_relational_store(self, store: Arc<dyn RelationalStore>) -> Self {
        self.set_default_backend(DefaultBackend::Relational(store));
        self
    }

    /// Replace the default backend. Managers already bound keep theirs.
    pub fn set_default_backend(&self, backend: DefaultBackend) {
        *self.backend.write() = Some(backend);
    }

    pub fn default_backend(&self) -> Option<DefaultBackend> {
        self.backend.read().clone()
    }

    /// Register a model type; re-registering the same type is a no-op
    pub fn register<T: Model>(&self) -> ModelResult<Arc<ModelDescriptor>> {
        if let Some(entry) = self.models.get(T::model_name()) {
            if entry.descriptor.type_id() == Some(TypeId::of::<T>()) {
                return Ok(Arc::clone(&entry.descriptor));
            }
        }
        self.register_descriptor(ModelDescriptor::of::<T>()?)
    }

    /// Register a descriptor; a different descriptor under a taken name
    /// fails with `DuplicateModel`
    pub fn register_descriptor(
        &self,
        descriptor: ModelDescriptor,
    ) -> ModelResult<Arc<ModelDescriptor>> {
        match self.models.entry(descriptor.name().to_string()) {
            Entry::Occupied(existing) => {
                let registered = &existing.get().descriptor;
                if registered.is_compatible(&descriptor) {
                    Ok(Arc::clone(registered))
                } else {
                    Err(ModelError::DuplicateModel(descriptor.name().to_string()))
                }
            }
            Entry::Vacant(slot) => {
                let descriptor = Arc::new(descriptor);
                tracing::debug!(
                    model = %descriptor.name(),
                    collection = %descriptor.collection(),
                    fields = descriptor.fields().len(),
                    "Registered model"
                );
                slot.insert(Arc::new(RegisteredModel {
                    descriptor: Arc::clone(&descriptor),
                    manager: OnceCell::new(),
                    serializer: OnceCell::new(),
                }));
                Ok(descriptor)
            }
        }
    }

    /// Descriptor of `T`, registering it on first use
    pub fn ensure_registered<T: Model>(&self) -> ModelResult<Arc<ModelDescriptor>> {
        let existing = self
            .models
            .get(T::model_name())
            .map(|entry| Arc::clone(&entry.descriptor));

        match existing {
            Some(descriptor) if descriptor.type_id() == Some(TypeId::of::<T>()) => Ok(descriptor),
            Some(_) => Err(ModelError::DuplicateModel(T::model_name().to_string())),
            None => self.register::<T>(),
        }
    }

    pub fn resolve(&self, name: &str) -> ModelResult<Arc<ModelDescriptor>> {
        self.entry(name).map(|entry| Arc::clone(&entry.descriptor))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    /// Registered model names, sorted
    pub fn model_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.models.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    /// Manager of a model, bound on first access
    pub fn manager_for(&self, name: &str) -> ModelResult<Arc<dyn Manager>> {
        let entry = self.entry(name)?;
        let manager = entry
            .manager
            .get_or_try_init(|| self.bind_manager(&entry.descriptor))?;
        Ok(Arc::clone(manager))
    }

    /// Serializer of a model, bound on first access. Without a declared
    /// serializer the one matching the manager's backend kind is used.
    pub fn serializer_for(&self, name: &str) -> ModelResult<Arc<dyn Serializer>> {
        let entry = self.entry(name)?;
        let serializer = entry.serializer.get_or_try_init(|| {
            match entry.descriptor.declared_serializer() {
                Some(declared) => Ok::<_, ModelError>(Arc::clone(declared)),
                None => {
                    let manager = self.manager_for(name)?;
                    Ok(serializer::for_backend(manager.kind()))
                }
            }
        })?;
        Ok(Arc::clone(serializer))
    }

    /// Table layout of a registered model
    pub fn table_schema(&self, name: &str) -> ModelResult<TableSchema> {
        let descriptor = self.resolve(name)?;
        TableSchema::from_descriptor(&descriptor, self)
    }

    /// DDL for every registered model, tables first, then indexes
    pub fn schema_sql(&self) -> ModelResult<Vec<String>> {
        let mut tables = Vec::new();
        let mut indexes = Vec::new();
        for name in self.model_names() {
            let schema = self.table_schema(&name)?;
            tables.push(schema.create_table_sql());
            indexes.extend(schema.create_index_sql());
        }
        tables.extend(indexes);
        Ok(tables)
    }

    fn entry(&self, name: &str) -> ModelResult<Arc<RegisteredModel>> {
        self.models
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| ModelError::UnknownModel(name.to_string()))
    }

    fn bind_manager(&self, descriptor: &ModelDescriptor) -> ModelResult<Arc<dyn Manager>> {
        if let Some(declared) = descriptor.declared_manager() {
            return Ok(Arc::clone(declared));
        }

        let backend = self.default_backend().ok_or_else(|| {
            ModelError::Configuration(format!(
                "Model '{}' declares no manager and the registry has no default backend",
                descriptor.name()
            ))
        })?;

        let manager: Arc<dyn Manager> = match backend {
            DefaultBackend::Document(store) => Arc::new(DocumentManager::from_store(
                store.as_ref(),
                descriptor.collection(),
            )),
            DefaultBackend::Relational(store) => {
                let schema = TableSchema::from_descriptor(descriptor, self)?;
                Arc::new(RelationalManager::new(store.table(schema)))
            }
        };

        tracing::debug!(
            model = %descriptor.name(),
            kind = %manager.kind(),
            collection = %manager.collection(),
            "Bound default manager"
        );
        Ok(manager)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::PrimitiveType;
    use crate::serializer::ReferencePolicy;

    fn descriptor(name: &str, fields: Vec<FieldDescriptor>) -> ModelDescriptor {
        ModelDescriptor::builder(name, FieldTable::new(name, fields).unwrap()).build()
    }

    fn name_field() -> FieldDescriptor {
        FieldDescriptor::primitive("name", PrimitiveType::String)
    }

    #[test]
    fn test_register_is_idempotent() {
        let registry = Registry::new();
        let first = registry.register_descriptor(descriptor("Group", vec![name_field()])).unwrap();
        let second = registry.register_descriptor(descriptor("Group", vec![name_field()])).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.model_names(), vec!["Group".to_string()]);
    }

    #[test]
    fn test_conflicting_registration() {
        let registry = Registry::new();
        registry.register_descriptor(descriptor("Group", vec![name_field()])).unwrap();

        let other = descriptor(
            "Group",
            vec![FieldDescriptor::primitive("title", PrimitiveType::String)],
        );
        match registry.register_descriptor(other) {
            Err(ModelError::DuplicateModel(name)) => assert_eq!(name, "Group"),
            other => panic!("expected DuplicateModel, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_model() {
        let registry = Registry::new();
        assert!(matches!(registry.resolve("Ghost"), Err(ModelError::UnknownModel(_))));
        assert!(matches!(registry.manager_for("Ghost"), Err(ModelError::UnknownModel(_))));
    }

    #[test]
    fn test_bindings_are_lazy_and_cached() {
        let registry = Registry::new();
        registry.register_descriptor(descriptor("Group", vec![name_field()])).unwrap();

        // no backend yet, binding fails but nothing is cached
        assert!(matches!(
            registry.manager_for("Group"),
            Err(ModelError::Configuration(_))
        ));

        let registry = registry.with_document_store(Arc::new(MemoryDocumentStore::new()));
        let first = registry.manager_for("Group").unwrap();
        let second = registry.manager_for("Group").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.kind(), BackendKind::Document);
        assert_eq!(first.collection(), "Group");

        let serializer = registry.serializer_for("Group").unwrap();
        assert_eq!(serializer.policy(), ReferencePolicy::EmbedTransient);
    }

    #[test]
    fn test_relational_default_binding() {
        let registry =
            Registry::new().with_relational_store(Arc::new(MemoryRelationalStore::new()));
        registry.register_descriptor(descriptor("Group", vec![name_field()])).unwrap();

        let manager = registry.manager_for("Group").unwrap();
        assert_eq!(manager.kind(), BackendKind::Relational);
        assert_eq!(
            registry.serializer_for("Group").unwrap().policy(),
            ReferencePolicy::RequireSaved
        );
    }

    #[test]
    fn test_declared_manager_wins() {
        let store = MemoryDocumentStore::new();
        let declared: Arc<dyn Manager> = Arc::new(DocumentManager::from_store(&store, "archive"));

        let registry =
            Registry::new().with_relational_store(Arc::new(MemoryRelationalStore::new()));
        let fields = FieldTable::new("Group", vec![name_field()]).unwrap();
        let group = ModelDescriptor::builder("Group", fields)
            .manager(Arc::clone(&declared))
            .build();
        registry.register_descriptor(group).unwrap();

        let bound = registry.manager_for("Group").unwrap();
        assert!(Arc::ptr_eq(&bound, &declared));
        assert_eq!(bound.collection(), "archive");
    }

    #[test]
    fn test_rebinding_declared_manager_conflicts() {
        let store = MemoryDocumentStore::new();
        let archive: Arc<dyn Manager> = Arc::new(DocumentManager::from_store(&store, "archive"));
        let group = |manager: &Arc<dyn Manager>| {
            let fields = FieldTable::new("Group", vec![name_field()]).unwrap();
            ModelDescriptor::builder("Group", fields)
                .manager(Arc::clone(manager))
                .build()
        };

        let registry = Registry::new();
        registry.register_descriptor(group(&archive)).unwrap();
        // the same binding again is compatible
        assert!(registry.register_descriptor(group(&archive)).is_ok());

        let other: Arc<dyn Manager> = Arc::new(DocumentManager::from_store(&store, "archive"));
        assert!(matches!(
            registry.register_descriptor(group(&other)),
            Err(ModelError::DuplicateModel(name)) if name == "Group"
        ));
        assert!(matches!(
            registry.register_descriptor(descriptor("Group", vec![name_field()])),
            Err(ModelError::DuplicateModel(_))
        ));
        assert!(Arc::ptr_eq(&registry.manager_for("Group").unwrap(), &archive));
    }

    #[test]
    fn test_descriptor_without_type_cannot_instantiate() {
        let group = descriptor("Group", vec![name_field()]);
        assert!(matches!(group.instantiate(), Err(ModelError::Configuration(_))));
    }

    #[test]
    fn test_schema_sql_covers_all_models() {
        let registry = Registry::new();
        registry.register_descriptor(descriptor("Group", vec![name_field()])).unwrap();
        registry
            .register_descriptor(descriptor(
                "User",
                vec![name_field(), FieldDescriptor::model("group", "Group")],
            ))
            .unwrap();

        let statements = registry.schema_sql().unwrap();
        assert_eq!(statements.len(), 2);
        assert!(statements[1].contains("\"group\" BIGINT REFERENCES \"Group\" (\"id\")"));
    }

    #[test]
    fn test_connect_selects_backend() {
        let document = tokio_test::block_on(Registry::connect(&OdmConfig::testing())).unwrap();
        assert_eq!(document.default_backend().map(|b| b.kind()), Some(BackendKind::Document));

        let relational = OdmConfig {
            backend: BackendKind::Relational,
            ..OdmConfig::default()
        };
        let relational = tokio_test::block_on(Registry::connect(&relational)).unwrap();
        assert_eq!(relational.default_backend().map(|b| b.kind()), Some(BackendKind::Relational));

        let invalid = OdmConfig::postgres("mysql://localhost/app");
        assert!(matches!(
            tokio_test::block_on(Registry::connect(&invalid)),
            Err(ModelError::Configuration(_))
        ));
    }

    #[test]
    fn test_global_registry_is_shared() {
        assert!(std::ptr::eq(Registry::global(), Registry::global()));
    }
}
