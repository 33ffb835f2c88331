//! Document store manager and the driver boundary it talks to

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::ModelResult;
use crate::object_id::ObjectId;
use crate::state::{Filter, StateRecord, ID_KEY, TYPE_KEY};

use super::{BackendKind, Manager, RecordStream};

/// Lazily consumed query results of a document collection
pub type DocumentCursor = BoxStream<'static, ModelResult<StateRecord>>;

/// One named collection of a document store
#[async_trait]
pub trait DocumentCollection: Send + Sync + Debug {
    fn name(&self) -> &str;

    /// Documents matching the filter, each carrying its `_id`
    async fn find(&self, filter: &Filter) -> ModelResult<DocumentCursor>;

    /// Insert under a fresh identifier when `id` is absent, otherwise
    /// replace the whole document stored under `id`
    async fn replace_or_insert(
        &self,
        id: Option<ObjectId>,
        document: StateRecord,
    ) -> ModelResult<ObjectId>;

    async fn delete_many(&self, filter: &Filter) -> ModelResult<u64>;
}

/// Document store driver, handing out collections by name
pub trait DocumentStore: Send + Sync + Debug {
    fn collection(&self, name: &str) -> Arc<dyn DocumentCollection>;
}

/// Manager for models kept in a document collection
#[derive(Debug, Clone)]
pub struct DocumentManager {
    collection: Arc<dyn DocumentCollection>,
}

impl DocumentManager {
    pub fn new(collection: Arc<dyn DocumentCollection>) -> Self {
        Self { collection }
    }

    pub fn from_store(store: &dyn DocumentStore, collection: &str) -> Self {
        Self::new(store.collection(collection))
    }

    pub fn inner(&self) -> &Arc<dyn DocumentCollection> {
        &self.collection
    }
}

#[async_trait]
impl Manager for DocumentManager {
    fn kind(&self) -> BackendKind {
        BackendKind::Document
    }

    fn collection(&self) -> &str {
        self.collection.name()
    }

    async fn find(&self, filter: Filter) -> ModelResult<RecordStream> {
        self.collection.find(&filter).await
    }

    async fn upsert(&self, id: Option<ObjectId>, mut record: StateRecord) -> ModelResult<ObjectId> {
        // identity is passed separately, never as document content
        record.remove(ID_KEY);
        record.remove(TYPE_KEY);

        let id = self.collection.replace_or_insert(id, record).await?;
        tracing::debug!(collection = %self.collection.name(), id = %id, "Upserted document");
        Ok(id)
    }

    async fn delete(&self, filter: Filter) -> ModelResult<u64> {
        let removed = self.collection.delete_many(&filter).await?;
        tracing::debug!(collection = %self.collection.name(), removed, "Deleted documents");
        Ok(removed)
    }
}
