//! In-memory document and relational stores
//!
//! Both keep their data behind `parking_lot` locks and count operations so
//! callers can observe how many backend round trips a restore made.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use parking_lot::RwLock;
use serde_json::Value as JsonValue;

use crate::config::IdStrategy;
use crate::error::{ModelError, ModelResult};
use crate::manager::{
    DocumentCollection, DocumentCursor, DocumentStore, Predicate, RelationalStore,
    RelationalTable, Row,
};
use crate::object_id::ObjectId;
use crate::schema::TableSchema;
use crate::state::{json_kind, Filter, StateRecord};

#[derive(Debug, Default)]
struct OperationCounters {
    finds: AtomicU64,
    upserts: AtomicU64,
    deletes: AtomicU64,
}

impl OperationCounters {
    fn snapshot(&self) -> OperationStats {
        OperationStats {
            finds: self.finds.load(Ordering::Relaxed),
            upserts: self.upserts.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
        }
    }
}

/// Operations served by one collection or table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperationStats {
    pub finds: u64,
    pub upserts: u64,
    pub deletes: u64,
}

/// Collection of an in-memory document store
#[derive(Debug)]
pub struct MemoryCollection {
    name: String,
    id_strategy: IdStrategy,
    documents: RwLock<BTreeMap<ObjectId, StateRecord>>,
    sequence: AtomicI64,
    counters: OperationCounters,
}

impl MemoryCollection {
    pub fn new(name: impl Into<String>, id_strategy: IdStrategy) -> Self {
        Self {
            name: name.into(),
            id_strategy,
            documents: RwLock::new(BTreeMap::new()),
            sequence: AtomicI64::new(0),
            counters: OperationCounters::default(),
        }
    }

    pub fn stats(&self) -> OperationStats {
        self.counters.snapshot()
    }

    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }

    /// Stored document, read without counting as a find
    pub fn document(&self, id: &ObjectId) -> Option<StateRecord> {
        self.documents.read().get(id).cloned()
    }

    fn next_id(&self) -> ObjectId {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        self.id_strategy.next_id(sequence)
    }
}

#[async_trait]
impl DocumentCollection for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn find(&self, filter: &Filter) -> ModelResult<DocumentCursor> {
        self.counters.finds.fetch_add(1, Ordering::Relaxed);

        let documents = self.documents.read();
        let matches: Vec<ModelResult<StateRecord>> = match filter.id() {
            Some(id) => documents
                .get(&id)
                .filter(|document| filter.matches(document))
                .cloned()
                .map(Ok)
                .into_iter()
                .collect(),
            None => documents
                .values()
                .filter(|document| filter.matches(document))
                .cloned()
                .map(Ok)
                .collect(),
        };
        Ok(stream::iter(matches).boxed())
    }

    async fn replace_or_insert(
        &self,
        id: Option<ObjectId>,
        document: StateRecord,
    ) -> ModelResult<ObjectId> {
        self.counters.upserts.fetch_add(1, Ordering::Relaxed);

        let id = match id {
            Some(id) => {
                if let Some(key) = id.as_i64() {
                    self.sequence.fetch_max(key, Ordering::Relaxed);
                }
                id
            }
            None => self.next_id(),
        };

        self.documents
            .write()
            .insert(id.clone(), document.with_id(&id));
        Ok(id)
    }

    async fn delete_many(&self, filter: &Filter) -> ModelResult<u64> {
        self.counters.deletes.fetch_add(1, Ordering::Relaxed);

        let mut documents = self.documents.write();
        let before = documents.len();
        documents.retain(|_, document| !filter.matches(document));
        Ok((before - documents.len()) as u64)
    }
}

/// Thread-safe in-memory document store
#[derive(Debug, Clone, Default)]
pub struct MemoryDocumentStore {
    collections: Arc<DashMap<String, Arc<MemoryCollection>>>,
    id_strategy: IdStrategy,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id_strategy(id_strategy: IdStrategy) -> Self {
        Self {
            collections: Arc::new(DashMap::new()),
            id_strategy,
        }
    }

    /// Typed handle to a collection, created on first use
    pub fn collection_handle(&self, name: &str) -> Arc<MemoryCollection> {
        self.collections
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryCollection::new(name, self.id_strategy)))
            .clone()
    }

    pub fn stats(&self, collection: &str) -> OperationStats {
        self.collections
            .get(collection)
            .map(|entry| entry.stats())
            .unwrap_or_default()
    }

    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn collection(&self, name: &str) -> Arc<dyn DocumentCollection> {
        self.collection_handle(name)
    }
}

/// Table of an in-memory relational store with auto-increment keys
#[derive(Debug)]
pub struct MemoryTable {
    schema: TableSchema,
    rows: RwLock<BTreeMap<ObjectId, Row>>,
    sequence: AtomicI64,
    counters: OperationCounters,
}

impl MemoryTable {
    pub fn new(schema: TableSchema) -> Self {
        Self {
            schema,
            rows: RwLock::new(BTreeMap::new()),
            sequence: AtomicI64::new(0),
            counters: OperationCounters::default(),
        }
    }

    pub fn stats(&self) -> OperationStats {
        self.counters.snapshot()
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    /// Stored row, read without counting as a select
    pub fn row(&self, key: &ObjectId) -> Option<Row> {
        self.rows.read().get(key).cloned()
    }

    fn check_not_null(&self, row: &Row) -> ModelResult<()> {
        for column in self.schema.columns.iter().filter(|column| !column.nullable) {
            let value = row.get(&column.name).unwrap_or(&JsonValue::Null);
            if value.is_null() {
                return Err(ModelError::invalid_value(
                    format!("non-null value for {}.{}", self.schema.table, column.name),
                    json_kind(value),
                ));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RelationalTable for MemoryTable {
    fn schema(&self) -> &TableSchema {
        &self.schema
    }

    async fn select(&self, predicate: &Predicate) -> ModelResult<Vec<Row>> {
        self.counters.finds.fetch_add(1, Ordering::Relaxed);
        Ok(self
            .rows
            .read()
            .values()
            .filter(|row| predicate.matches(row))
            .cloned()
            .collect())
    }

    async fn upsert(&self, mut row: Row) -> ModelResult<JsonValue> {
        self.counters.upserts.fetch_add(1, Ordering::Relaxed);
        self.check_not_null(&row)?;

        let key = match row.get(&self.schema.primary_key).and_then(ObjectId::from_json) {
            Some(key) => {
                if let Some(value) = key.as_i64() {
                    self.sequence.fetch_max(value, Ordering::Relaxed);
                }
                key
            }
            None => ObjectId::Integer(self.sequence.fetch_add(1, Ordering::Relaxed) + 1),
        };

        row.insert(self.schema.primary_key.clone(), key.to_json());
        self.rows.write().insert(key.clone(), row);
        Ok(key.to_json())
    }

    async fn delete(&self, predicate: &Predicate) -> ModelResult<u64> {
        self.counters.deletes.fetch_add(1, Ordering::Relaxed);

        let mut rows = self.rows.write();
        let before = rows.len();
        rows.retain(|_, row| !predicate.matches(row));
        Ok((before - rows.len()) as u64)
    }
}

/// Thread-safe in-memory relational store
#[derive(Debug, Clone, Default)]
pub struct MemoryRelationalStore {
    tables: Arc<DashMap<String, Arc<MemoryTable>>>,
}

impl MemoryRelationalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Typed handle to a table created through `table`
    pub fn table_handle(&self, name: &str) -> Option<Arc<MemoryTable>> {
        self.tables.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn stats(&self, table: &str) -> OperationStats {
        self.table_handle(table)
            .map(|table| table.stats())
            .unwrap_or_default()
    }
}

impl RelationalStore for MemoryRelationalStore {
    fn table(&self, schema: TableSchema) -> Arc<dyn RelationalTable> {
        let table = self
            .tables
            .entry(schema.table.clone())
            .or_insert_with(|| Arc::new(MemoryTable::new(schema)))
            .clone();
        table
    }
}
