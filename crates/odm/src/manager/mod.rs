//! Managers - the per-model gateway to a storage backend
//!
//! A manager speaks flattened `StateRecord`s only. `DocumentManager` hands
//! them to a document collection as-is; `RelationalManager` maps them onto
//! table rows, turning references into foreign-key columns.

use std::fmt::Debug;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};

use crate::error::ModelResult;
use crate::object_id::ObjectId;
use crate::state::{Filter, StateRecord};

pub mod document;
pub mod relational;

pub use document::{DocumentCollection, DocumentCursor, DocumentManager, DocumentStore};
pub use relational::{Predicate, RelationalManager, RelationalStore, RelationalTable, Row};

/// Stream of matching records; calling `find` again restarts it
pub type RecordStream = BoxStream<'static, ModelResult<StateRecord>>;

/// Storage paradigm behind a manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Nested documents may be embedded
    Document,
    /// References become foreign keys; nested models must be saved first
    Relational,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Document => write!(f, "document"),
            BackendKind::Relational => write!(f, "relational"),
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "document" | "memory" => Ok(BackendKind::Document),
            "relational" | "sql" | "postgres" | "postgresql" => Ok(BackendKind::Relational),
            other => Err(format!("unknown backend kind '{}'", other)),
        }
    }
}

/// Query and persistence gateway for one model's records
#[async_trait]
pub trait Manager: Send + Sync + Debug {
    fn kind(&self) -> BackendKind;

    /// Collection or table this manager reads and writes
    fn collection(&self) -> &str;

    /// Records matching the filter, in backend order
    async fn find(&self, filter: Filter) -> ModelResult<RecordStream>;

    /// First matching record
    async fn find_one(&self, filter: Filter) -> ModelResult<Option<StateRecord>> {
        let mut stream = self.find(filter).await?;
        stream.next().await.transpose()
    }

    /// Record stored under an identifier
    async fn get(&self, id: &ObjectId) -> ModelResult<Option<StateRecord>> {
        self.find_one(Filter::by_id(id.clone())).await
    }

    /// Create the record when `id` is absent, replace it otherwise.
    /// Returns the identifier the record is stored under.
    async fn upsert(&self, id: Option<ObjectId>, record: StateRecord) -> ModelResult<ObjectId>;

    /// Remove matching records, returning how many were removed
    async fn delete(&self, filter: Filter) -> ModelResult<u64>;

    async fn count(&self, filter: Filter) -> ModelResult<u64> {
        self.find(filter)
            .await?
            .try_fold(0u64, |count, _| async move { Ok(count + 1) })
            .await
    }

    async fn find_all(&self, filter: Filter) -> ModelResult<Vec<StateRecord>> {
        self.find(filter).await?.try_collect().await
    }
}
