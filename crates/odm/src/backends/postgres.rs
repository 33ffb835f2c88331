//! PostgreSQL relational store
//!
//! Implements the table driver boundary with sqlx. Statements are built as
//! text with positional parameters; values are bound and decoded according
//! to each column's declared type.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde_json::{Number, Value as JsonValue};
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row as SqlxRow};
use uuid::Uuid;

use crate::config::OdmConfig;
use crate::error::{ModelError, ModelResult};
use crate::manager::{Predicate, RelationalStore, RelationalTable, Row};
use crate::schema::{quote_ident, ColumnType, TableSchema};
use crate::state::json_kind;
use crate::value::{DATE_FORMAT, TIME_FORMAT};

type PgQuery<'q> = sqlx::query::Query<'q, Postgres, PgArguments>;

/// PostgreSQL-backed relational store
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Open a connection pool with the configured settings
    pub async fn connect(config: &OdmConfig) -> ModelResult<Self> {
        let database_url = config.database_url.as_deref().ok_or_else(|| {
            ModelError::Configuration("DATABASE_URL is required for PostgreSQL".to_string())
        })?;

        let pool_config = &config.pool;
        let mut options = PgPoolOptions::new()
            .max_connections(pool_config.max_connections)
            .min_connections(pool_config.min_connections)
            .acquire_timeout(pool_config.acquire_timeout())
            .test_before_acquire(pool_config.test_before_acquire);

        if let Some(idle_timeout) = pool_config.idle_timeout_seconds {
            options = options.idle_timeout(std::time::Duration::from_secs(idle_timeout));
        }

        if let Some(max_lifetime) = pool_config.max_lifetime_seconds {
            options = options.max_lifetime(std::time::Duration::from_secs(max_lifetime));
        }

        let pool = options
            .connect(database_url)
            .await
            .map_err(|e| {
                ModelError::Connection(format!("Failed to create PostgreSQL pool: {}", e))
            })?;

        tracing::debug!(max_connections = pool_config.max_connections, "PostgreSQL pool ready");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl RelationalStore for PgStore {
    fn table(&self, schema: TableSchema) -> Arc<dyn RelationalTable> {
        Arc::new(PgTable::new(self.pool.clone(), schema))
    }
}

/// SQL text plus typed parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<(ColumnType, JsonValue)>,
}

/// Builds the statements a `PgTable` runs
#[derive(Debug, Clone, Copy)]
pub struct SqlStatements<'a> {
    schema: &'a TableSchema,
}

impl<'a> SqlStatements<'a> {
    pub fn new(schema: &'a TableSchema) -> Self {
        Self { schema }
    }

    fn column_type(&self, column: &str) -> ModelResult<ColumnType> {
        if column == self.schema.primary_key {
            return Ok(ColumnType::BigInt);
        }
        self.schema
            .column(column)
            .map(|c| c.column_type.clone())
            .ok_or_else(|| {
                ModelError::Configuration(format!(
                    "table '{}' has no column '{}'",
                    self.schema.table, column
                ))
            })
    }

    fn selected_columns(&self) -> String {
        std::iter::once(self.schema.primary_key.as_str())
            .chain(self.schema.columns.iter().map(|c| c.name.as_str()))
            .map(quote_ident)
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn where_clause(
        &self,
        predicate: &Predicate,
        params: &mut Vec<(ColumnType, JsonValue)>,
    ) -> ModelResult<String> {
        if predicate.is_empty() {
            return Ok(String::new());
        }

        let mut conditions = Vec::with_capacity(predicate.conditions.len());
        for (column, value) in &predicate.conditions {
            let column_type = self.column_type(column)?;
            let quoted = quote_ident(column);

            if value.is_null() {
                conditions.push(format!("{} IS NULL", quoted));
                continue;
            }

            match column_type {
                ColumnType::Array(element) if !value.is_array() => {
                    params.push((*element, value.clone()));
                    conditions.push(format!("${} = ANY({})", params.len(), quoted));
                }
                other => {
                    params.push((other, value.clone()));
                    conditions.push(format!("{} = ${}", quoted, params.len()));
                }
            }
        }

        Ok(format!(" WHERE {}", conditions.join(" AND ")))
    }

    pub fn select(&self, predicate: &Predicate) -> ModelResult<Statement> {
        let mut params = Vec::new();
        let where_clause = self.where_clause(predicate, &mut params)?;
        Ok(Statement {
            sql: format!(
                "SELECT {} FROM {}{}",
                self.selected_columns(),
                quote_ident(&self.schema.table),
                where_clause
            ),
            params,
        })
    }

    /// Insert, or replace on primary key conflict, returning the key
    pub fn upsert(&self, row: &Row) -> Statement {
        let table = quote_ident(&self.schema.table);
        let primary_key = quote_ident(&self.schema.primary_key);
        let key = row
            .get(&self.schema.primary_key)
            .filter(|value| !value.is_null());

        let mut names = Vec::new();
        let mut params = Vec::new();
        if let Some(key) = key {
            names.push(primary_key.clone());
            params.push((ColumnType::BigInt, key.clone()));
        }
        for column in &self.schema.columns {
            names.push(quote_ident(&column.name));
            params.push((
                column.column_type.clone(),
                row.get(&column.name).cloned().unwrap_or(JsonValue::Null),
            ));
        }

        if names.is_empty() {
            return Statement {
                sql: format!("INSERT INTO {} DEFAULT VALUES RETURNING {}", table, primary_key),
                params,
            };
        }

        let placeholders: Vec<String> = (1..=params.len()).map(|i| format!("${}", i)).collect();
        let mut sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            names.join(", "),
            placeholders.join(", ")
        );

        if key.is_some() {
            let updates: Vec<String> = self
                .schema
                .columns
                .iter()
                .map(|column| {
                    let name = quote_ident(&column.name);
                    format!("{} = EXCLUDED.{}", name, name)
                })
                .collect();
            if updates.is_empty() {
                sql.push_str(&format!(" ON CONFLICT ({}) DO NOTHING", primary_key));
            } else {
                sql.push_str(&format!(
                    " ON CONFLICT ({}) DO UPDATE SET {}",
                    primary_key,
                    updates.join(", ")
                ));
            }
        }

        sql.push_str(&format!(" RETURNING {}", primary_key));
        Statement { sql, params }
    }

    pub fn delete(&self, predicate: &Predicate) -> ModelResult<Statement> {
        let mut params = Vec::new();
        let where_clause = self.where_clause(predicate, &mut params)?;
        Ok(Statement {
            sql: format!("DELETE FROM {}{}", quote_ident(&self.schema.table), where_clause),
            params,
        })
    }
}

/// One table of a PostgreSQL database
#[derive(Debug, Clone)]
pub struct PgTable {
    pool: PgPool,
    schema: TableSchema,
}

impl PgTable {
    pub fn new(pool: PgPool, schema: TableSchema) -> Self {
        Self { pool, schema }
    }

    fn statements(&self) -> SqlStatements<'_> {
        SqlStatements::new(&self.schema)
    }

    fn decode_row(&self, row: &PgRow) -> ModelResult<Row> {
        let mut decoded = Row::new();
        decoded.insert(
            self.schema.primary_key.clone(),
            decode_column(row, &self.schema.primary_key, &ColumnType::BigInt)?,
        );
        for column in &self.schema.columns {
            decoded.insert(
                column.name.clone(),
                decode_column(row, &column.name, &column.column_type)?,
            );
        }
        Ok(decoded)
    }
}

fn bind_all<'q>(sql: &'q str, params: &[(ColumnType, JsonValue)]) -> ModelResult<PgQuery<'q>> {
    let mut query = sqlx::query(sql);
    for (column_type, value) in params {
        query = bind_json_value(query, column_type, value)?;
    }
    Ok(query)
}

#[async_trait]
impl RelationalTable for PgTable {
    fn schema(&self) -> &TableSchema {
        &self.schema
    }

    async fn select(&self, predicate: &Predicate) -> ModelResult<Vec<Row>> {
        let statement = self.statements().select(predicate)?;
        tracing::debug!(sql = %statement.sql, "Executing select");

        let rows = bind_all(&statement.sql, &statement.params)?
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(|row| self.decode_row(row)).collect()
    }

    async fn upsert(&self, row: Row) -> ModelResult<JsonValue> {
        let statement = self.statements().upsert(&row);
        tracing::debug!(sql = %statement.sql, "Executing upsert");

        let returned = bind_all(&statement.sql, &statement.params)?
            .fetch_optional(&self.pool)
            .await?;

        match returned {
            Some(returned) => {
                decode_column(&returned, &self.schema.primary_key, &ColumnType::BigInt)
            }
            // conflict with nothing to update returns no row
            None => row
                .get(&self.schema.primary_key)
                .cloned()
                .ok_or_else(|| ModelError::Serialization(format!(
                    "insert into '{}' returned no key",
                    self.schema.table
                ))),
        }
    }

    async fn delete(&self, predicate: &Predicate) -> ModelResult<u64> {
        let statement = self.statements().delete(predicate)?;
        tracing::debug!(sql = %statement.sql, "Executing delete");

        let result = bind_all(&statement.sql, &statement.params)?
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn typed<T>(value: &JsonValue, extract: impl Fn(&JsonValue) -> Option<T>) -> Option<Option<T>> {
    if value.is_null() {
        Some(None)
    } else {
        extract(value).map(Some)
    }
}

fn as_string(value: &JsonValue) -> Option<String> {
    value.as_str().map(str::to_string)
}

fn as_bytes(value: &JsonValue) -> Option<Vec<u8>> {
    value
        .as_array()?
        .iter()
        .map(|byte| byte.as_u64().and_then(|b| u8::try_from(b).ok()))
        .collect()
}

fn as_uuid(value: &JsonValue) -> Option<Uuid> {
    value.as_str().and_then(|s| Uuid::parse_str(s).ok())
}

fn as_datetime(value: &JsonValue) -> Option<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn as_date(value: &JsonValue) -> Option<NaiveDate> {
    value
        .as_str()
        .and_then(|s| NaiveDate::parse_from_str(s, DATE_FORMAT).ok())
}

fn as_time(value: &JsonValue) -> Option<NaiveTime> {
    value
        .as_str()
        .and_then(|s| NaiveTime::parse_from_str(s, TIME_FORMAT).ok())
}

fn date_json(date: &NaiveDate) -> JsonValue {
    JsonValue::String(date.format(DATE_FORMAT).to_string())
}

fn time_json(time: &NaiveTime) -> JsonValue {
    JsonValue::String(time.format(TIME_FORMAT).to_string())
}

fn as_vec<T>(value: &JsonValue, extract: impl Fn(&JsonValue) -> Option<T>) -> Option<Vec<T>> {
    value.as_array()?.iter().map(extract).collect()
}

/// Bind a JSON value as the column type's Rust counterpart
fn bind_json_value<'q>(
    query: PgQuery<'q>,
    column_type: &ColumnType,
    value: &JsonValue,
) -> ModelResult<PgQuery<'q>> {
    let mismatch = || {
        ModelError::invalid_value(format!("{} parameter", column_type.to_sql()), json_kind(value))
    };

    let query = match column_type {
        ColumnType::Boolean => query.bind(typed(value, JsonValue::as_bool).ok_or_else(mismatch)?),
        ColumnType::BigInt => query.bind(typed(value, JsonValue::as_i64).ok_or_else(mismatch)?),
        ColumnType::DoublePrecision => {
            query.bind(typed(value, JsonValue::as_f64).ok_or_else(mismatch)?)
        }
        ColumnType::Text | ColumnType::VarChar(_) => {
            query.bind(typed(value, as_string).ok_or_else(mismatch)?)
        }
        ColumnType::Bytea => query.bind(typed(value, as_bytes).ok_or_else(mismatch)?),
        ColumnType::Uuid => query.bind(typed(value, as_uuid).ok_or_else(mismatch)?),
        ColumnType::TimestampTz => query.bind(typed(value, as_datetime).ok_or_else(mismatch)?),
        ColumnType::Date => query.bind(typed(value, as_date).ok_or_else(mismatch)?),
        ColumnType::Time => query.bind(typed(value, as_time).ok_or_else(mismatch)?),
        ColumnType::Jsonb => {
            query.bind(typed(value, |v| Some(v.clone())).ok_or_else(mismatch)?)
        }
        // strings go out as text, anything else as JSON
        ColumnType::Custom(_) => match value {
            JsonValue::String(s) => query.bind(s.clone()),
            JsonValue::Null => query.bind(Option::<String>::None),
            other => query.bind(other.clone()),
        },
        ColumnType::Array(element) => match element.as_ref() {
            ColumnType::BigInt => query.bind(
                typed(value, |v| as_vec(v, JsonValue::as_i64)).ok_or_else(mismatch)?,
            ),
            ColumnType::DoublePrecision => query.bind(
                typed(value, |v| as_vec(v, JsonValue::as_f64)).ok_or_else(mismatch)?,
            ),
            ColumnType::Boolean => query.bind(
                typed(value, |v| as_vec(v, JsonValue::as_bool)).ok_or_else(mismatch)?,
            ),
            ColumnType::Text | ColumnType::VarChar(_) => query.bind(
                typed(value, |v| as_vec(v, as_string)).ok_or_else(mismatch)?,
            ),
            ColumnType::Uuid => {
                query.bind(typed(value, |v| as_vec(v, as_uuid)).ok_or_else(mismatch)?)
            }
            ColumnType::TimestampTz => query.bind(
                typed(value, |v| as_vec(v, as_datetime)).ok_or_else(mismatch)?,
            ),
            ColumnType::Date => {
                query.bind(typed(value, |v| as_vec(v, as_date)).ok_or_else(mismatch)?)
            }
            ColumnType::Time => {
                query.bind(typed(value, |v| as_vec(v, as_time)).ok_or_else(mismatch)?)
            }
            other => {
                return Err(ModelError::Configuration(format!(
                    "arrays of {} are not supported",
                    other.to_sql()
                )))
            }
        },
    };
    Ok(query)
}

/// Decode a column into its JSON form, mirroring how values are bound
fn decode_column(row: &PgRow, name: &str, column_type: &ColumnType) -> ModelResult<JsonValue> {
    fn float(f: f64) -> JsonValue {
        Number::from_f64(f).map(JsonValue::Number).unwrap_or(JsonValue::Null)
    }

    let value = match column_type {
        ColumnType::Boolean => row
            .try_get::<Option<bool>, _>(name)?
            .map_or(JsonValue::Null, JsonValue::Bool),
        ColumnType::BigInt => row
            .try_get::<Option<i64>, _>(name)?
            .map_or(JsonValue::Null, JsonValue::from),
        ColumnType::DoublePrecision => row
            .try_get::<Option<f64>, _>(name)?
            .map_or(JsonValue::Null, float),
        ColumnType::Text | ColumnType::VarChar(_) => row
            .try_get::<Option<String>, _>(name)?
            .map_or(JsonValue::Null, JsonValue::String),
        ColumnType::Custom(_) => decode_custom(row.try_get::<Option<JsonValue>, _>(name), || {
            row.try_get::<Option<String>, _>(name)
        })?,
        ColumnType::Bytea => row
            .try_get::<Option<Vec<u8>>, _>(name)?
            .map_or(JsonValue::Null, |bytes| {
                JsonValue::Array(bytes.into_iter().map(JsonValue::from).collect())
            }),
        ColumnType::Uuid => row
            .try_get::<Option<Uuid>, _>(name)?
            .map_or(JsonValue::Null, |u| JsonValue::String(u.to_string())),
        ColumnType::TimestampTz => row
            .try_get::<Option<DateTime<Utc>>, _>(name)?
            .map_or(JsonValue::Null, |dt| JsonValue::String(dt.to_rfc3339())),
        ColumnType::Date => row
            .try_get::<Option<NaiveDate>, _>(name)?
            .map_or(JsonValue::Null, |date| date_json(&date)),
        ColumnType::Time => row
            .try_get::<Option<NaiveTime>, _>(name)?
            .map_or(JsonValue::Null, |time| time_json(&time)),
        ColumnType::Jsonb => row
            .try_get::<Option<JsonValue>, _>(name)?
            .unwrap_or(JsonValue::Null),
        ColumnType::Array(element) => match element.as_ref() {
            ColumnType::BigInt => row
                .try_get::<Option<Vec<i64>>, _>(name)?
                .map_or(JsonValue::Null, |items| JsonValue::from(items)),
            ColumnType::DoublePrecision => row
                .try_get::<Option<Vec<f64>>, _>(name)?
                .map_or(JsonValue::Null, |items| {
                    JsonValue::Array(items.into_iter().map(float).collect())
                }),
            ColumnType::Boolean => row
                .try_get::<Option<Vec<bool>>, _>(name)?
                .map_or(JsonValue::Null, |items| JsonValue::from(items)),
            ColumnType::Text | ColumnType::VarChar(_) => row
                .try_get::<Option<Vec<String>>, _>(name)?
                .map_or(JsonValue::Null, |items| JsonValue::from(items)),
            ColumnType::Uuid => row
                .try_get::<Option<Vec<Uuid>>, _>(name)?
                .map_or(JsonValue::Null, |items| {
                    JsonValue::Array(
                        items.iter().map(|u| JsonValue::String(u.to_string())).collect(),
                    )
                }),
            ColumnType::TimestampTz => row
                .try_get::<Option<Vec<DateTime<Utc>>>, _>(name)?
                .map_or(JsonValue::Null, |items| {
                    JsonValue::Array(
                        items.iter().map(|dt| JsonValue::String(dt.to_rfc3339())).collect(),
                    )
                }),
            ColumnType::Date => row
                .try_get::<Option<Vec<NaiveDate>>, _>(name)?
                .map_or(JsonValue::Null, |items| {
                    JsonValue::Array(items.iter().map(date_json).collect())
                }),
            ColumnType::Time => row
                .try_get::<Option<Vec<NaiveTime>>, _>(name)?
                .map_or(JsonValue::Null, |items| {
                    JsonValue::Array(items.iter().map(time_json).collect())
                }),
            other => {
                return Err(ModelError::Configuration(format!(
                    "arrays of {} are not supported",
                    other.to_sql()
                )))
            }
        },
    };
    Ok(value)
}

/// Custom columns decode as JSON, like the non-string values bound to them.
/// Types sqlx cannot read as JSON fall back to their text form.
fn decode_custom(
    json: Result<Option<JsonValue>, sqlx::Error>,
    text: impl FnOnce() -> Result<Option<String>, sqlx::Error>,
) -> ModelResult<JsonValue> {
    match json {
        Ok(value) => Ok(value.unwrap_or(JsonValue::Null)),
        Err(sqlx::Error::ColumnDecode { .. }) => {
            Ok(text()?.map_or(JsonValue::Null, JsonValue::String))
        }
        Err(e) => Err(e.into()),
    }
}
