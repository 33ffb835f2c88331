//! Serializers - converting live model graphs to state records and back
//!
//! Both directions walk the model's field table. Nested models with an
//! identifier always become references. What happens to unsaved nested
//! models depends on the serializer's `ReferencePolicy`: document stores
//! embed them, relational stores refuse them.

use std::fmt::Debug;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::ModelResult;
use crate::manager::BackendKind;
use crate::model::ModelHandle;
use crate::registry::ModelDescriptor;
use crate::state::StateRecord;

pub mod flatten;
pub mod restore;

pub use flatten::FlattenContext;
pub use restore::{ResolutionScope, RestoreContext, ScopeStats};

/// How unsaved nested instances are flattened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferencePolicy {
    /// Embed the nested instance's fields in place
    EmbedTransient,
    /// Fail with `UnsavedDependency`; the nested instance must be saved first
    RequireSaved,
}

/// Per-model conversion between instances and state records
pub trait Serializer: Send + Sync + Debug {
    fn policy(&self) -> ReferencePolicy;

    /// Flatten one instance's stored fields
    fn flatten(
        &self,
        context: &mut FlattenContext<'_>,
        instance: &ModelHandle,
        descriptor: &ModelDescriptor,
    ) -> ModelResult<StateRecord> {
        context.flatten_fields(instance, descriptor, self.policy())
    }

    /// Fill `target` from a state record, resolving nested values through
    /// the restore context
    fn unflatten<'a>(
        &'a self,
        context: &'a RestoreContext<'a>,
        target: ModelHandle,
        descriptor: Arc<ModelDescriptor>,
        state: StateRecord,
    ) -> BoxFuture<'a, ModelResult<()>> {
        context.populate(target, descriptor, state)
    }
}

/// Serializer for document stores
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentSerializer;

impl Serializer for DocumentSerializer {
    fn policy(&self) -> ReferencePolicy {
        ReferencePolicy::EmbedTransient
    }
}

/// Serializer for relational stores
#[derive(Debug, Clone, Copy, Default)]
pub struct RelationalSerializer;

impl Serializer for RelationalSerializer {
    fn policy(&self) -> ReferencePolicy {
        ReferencePolicy::RequireSaved
    }
}

/// Default serializer for a manager of the given kind
pub fn for_backend(kind: BackendKind) -> Arc<dyn Serializer> {
    match kind {
        BackendKind::Document => Arc::new(DocumentSerializer),
        BackendKind::Relational => Arc::new(RelationalSerializer),
    }
}
