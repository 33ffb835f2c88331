//! Relational manager and the table driver boundary it talks to
//!
//! Rows are JSON maps keyed by column name. References in state records
//! become the referenced key in a foreign-key column and are turned back
//! into `{"_id", "_type"}` references when rows are read.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::{Map, Value as JsonValue};

use crate::error::{ModelError, ModelResult};
use crate::object_id::ObjectId;
use crate::schema::{ColumnRole, ColumnSchema, TableSchema};
use crate::state::{json_kind, Filter, ObjectRef, StateRecord, ID_KEY, TYPE_KEY};

use super::{BackendKind, Manager, RecordStream};

/// One table row, keyed by column name
pub type Row = Map<String, JsonValue>;

/// Conjunction of column equalities
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Predicate {
    pub conditions: Vec<(String, JsonValue)>,
}

impl Predicate {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: impl Into<String>, value: JsonValue) -> Self {
        self.conditions.push((column.into(), value));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Whether a row satisfies every condition; array columns match when
    /// they hold the value
    pub fn matches(&self, row: &Row) -> bool {
        self.conditions.iter().all(|(column, expected)| {
            row.get(column)
                .map(|actual| crate::state::value_matches(actual, expected))
                .unwrap_or_else(|| expected.is_null())
        })
    }
}

/// One table of a relational store
#[async_trait]
pub trait RelationalTable: Send + Sync + Debug {
    fn schema(&self) -> &TableSchema;

    async fn select(&self, predicate: &Predicate) -> ModelResult<Vec<Row>>;

    /// Insert the row, or replace the row with the same primary key.
    /// Returns the primary key value.
    async fn upsert(&self, row: Row) -> ModelResult<JsonValue>;

    async fn delete(&self, predicate: &Predicate) -> ModelResult<u64>;
}

/// Relational store driver, handing out tables by schema
pub trait RelationalStore: Send + Sync + Debug {
    fn table(&self, schema: TableSchema) -> Arc<dyn RelationalTable>;
}

/// Manager for models kept in a relational table
#[derive(Debug, Clone)]
pub struct RelationalManager {
    table: Arc<dyn RelationalTable>,
}

impl RelationalManager {
    pub fn new(table: Arc<dyn RelationalTable>) -> Self {
        Self { table }
    }

    pub fn schema(&self) -> &TableSchema {
        self.table.schema()
    }

    pub fn inner(&self) -> &Arc<dyn RelationalTable> {
        &self.table
    }

    /// Map a flattened record onto a row. Missing fields become NULL.
    pub fn to_row(&self, id: Option<&ObjectId>, record: &StateRecord) -> ModelResult<Row> {
        let schema = self.schema();
        let mut row = Row::new();

        if let Some(id) = id {
            row.insert(schema.primary_key.clone(), id.to_json());
        }

        for column in &schema.columns {
            let value = record.get(&column.field).cloned().unwrap_or(JsonValue::Null);
            let stored = match &column.role {
                ColumnRole::Value => value,
                ColumnRole::ForeignKey(_) => foreign_key_value(schema, column, value)?,
                ColumnRole::ForeignKeyList(_) => match value {
                    JsonValue::Null => JsonValue::Null,
                    JsonValue::Array(items) => JsonValue::Array(
                        items
                            .into_iter()
                            .map(|item| foreign_key_value(schema, column, item))
                            .collect::<ModelResult<Vec<_>>>()?,
                    ),
                    other => {
                        return Err(ModelError::invalid_value(
                            format!("list of references for {}.{}", schema.model, column.field),
                            json_kind(&other),
                        ))
                    }
                },
            };
            row.insert(column.name.clone(), stored);
        }

        Ok(row)
    }

    /// Map a row back onto a flattened record carrying `_id`
    pub fn to_record(&self, mut row: Row) -> ModelResult<StateRecord> {
        let schema = self.schema();
        let key = row.remove(&schema.primary_key).unwrap_or(JsonValue::Null);
        let id = ObjectId::from_json(&key).ok_or_else(|| {
            ModelError::Serialization(format!(
                "row of '{}' has no usable primary key in '{}'",
                schema.table, schema.primary_key
            ))
        })?;

        let mut record = StateRecord::new();
        record.insert(ID_KEY, id.to_json());

        for column in &schema.columns {
            let value = row.remove(&column.name).unwrap_or(JsonValue::Null);
            let restored = match &column.role {
                ColumnRole::Value => value,
                ColumnRole::ForeignKey(fk) => reference_value(&fk.model, value),
                ColumnRole::ForeignKeyList(fk) => match value {
                    JsonValue::Array(items) => JsonValue::Array(
                        items
                            .into_iter()
                            .map(|item| reference_value(&fk.model, item))
                            .collect(),
                    ),
                    other => other,
                },
            };
            record.insert(column.field.clone(), restored);
        }

        Ok(record)
    }

    /// Translate field conditions into column conditions
    pub fn to_predicate(&self, filter: &Filter) -> ModelResult<Predicate> {
        let schema = self.schema();
        let mut predicate = Predicate::all();

        for (field, value) in filter.conditions() {
            if field == ID_KEY {
                predicate = predicate.eq(schema.primary_key.clone(), value.clone());
                continue;
            }
            let column = schema.column_for_field(field)?;
            let value = match column.role {
                ColumnRole::Value => value.clone(),
                _ => foreign_key_value(schema, column, value.clone())?,
            };
            predicate = predicate.eq(column.name.clone(), value);
        }

        Ok(predicate)
    }
}

/// Key stored for a reference; embedded documents have no key to store.
/// The column only records the key, so a reference must be to the model
/// the column points at.
fn foreign_key_value(
    schema: &TableSchema,
    column: &ColumnSchema,
    value: JsonValue,
) -> ModelResult<JsonValue> {
    match value {
        JsonValue::Object(ref object) => match object.get(ID_KEY) {
            Some(key) => {
                let referenced = object.get(TYPE_KEY).and_then(JsonValue::as_str);
                match (column.role.foreign_key(), referenced) {
                    (Some(fk), Some(found)) if fk.model != found => {
                        Err(ModelError::TypeMismatch {
                            expected: fk.model.clone(),
                            found: found.to_string(),
                        })
                    }
                    _ => Ok(key.clone()),
                }
            }
            None => Err(ModelError::UnsavedDependency {
                model: schema.model.clone(),
                field: column.field.clone(),
                dependency: object
                    .get(TYPE_KEY)
                    .and_then(JsonValue::as_str)
                    .or_else(|| column.role.foreign_key().map(|fk| fk.model.as_str()))
                    .unwrap_or("unknown")
                    .to_string(),
            }),
        },
        other => Ok(other),
    }
}

fn reference_value(model: &str, key: JsonValue) -> JsonValue {
    match ObjectId::from_json(&key) {
        Some(id) => ObjectRef::new(model, id).to_json(),
        None => JsonValue::Null,
    }
}

#[async_trait]
impl Manager for RelationalManager {
    fn kind(&self) -> BackendKind {
        BackendKind::Relational
    }

    fn collection(&self) -> &str {
        &self.schema().table
    }

    async fn find(&self, filter: Filter) -> ModelResult<RecordStream> {
        let predicate = self.to_predicate(&filter)?;
        let rows = self.table.select(&predicate).await?;
        let records: Vec<ModelResult<StateRecord>> =
            rows.into_iter().map(|row| self.to_record(row)).collect();
        Ok(stream::iter(records).boxed())
    }

    async fn upsert(&self, id: Option<ObjectId>, record: StateRecord) -> ModelResult<ObjectId> {
        let row = self.to_row(id.as_ref(), &record)?;
        let key = self.table.upsert(row).await?;
        let id = ObjectId::from_json(&key).ok_or_else(|| {
            ModelError::Serialization(format!(
                "table '{}' returned an unusable key: {}",
                self.schema().table,
                key
            ))
        })?;
        tracing::debug!(table = %self.schema().table, id = %id, "Upserted row");
        Ok(id)
    }

    async fn delete(&self, filter: Filter) -> ModelResult<u64> {
        let predicate = self.to_predicate(&filter)?;
        let removed = self.table.delete(&predicate).await?;
        tracing::debug!(table = %self.schema().table, removed, "Deleted rows");
        Ok(removed)
    }
}
