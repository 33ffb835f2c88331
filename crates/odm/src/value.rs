//! In-memory field values exchanged between models and the serializer
//!
//! Models hand their fields out as `Value`s and take them back the same way.
//! `ToValue`/`FromValue` cover the usual Rust field types so `get_field`
//! and `set_field` stay one-liners.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::hash::Hash;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::{ModelError, ModelResult};
use crate::model::{Handle, Model, ModelHandle};

/// Stored text form of `Value::Date`
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Stored text form of `Value::Time`; fractional seconds only when present
pub const TIME_FORMAT: &str = "%H:%M:%S%.f";

/// Field value of a live model instance
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    DateTime(DateTime<Utc>),
    Date(NaiveDate),
    Time(NaiveTime),
    Json(JsonValue),
    /// Nested model instance, shared
    Model(ModelHandle),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Uuid(_) => "uuid",
            Value::DateTime(_) => "datetime",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::Json(_) => "json",
            Value::Model(_) => "model",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_model(&self) -> Option<&ModelHandle> {
        match self {
            Value::Model(handle) => Some(handle),
            _ => None,
        }
    }

    fn mismatch<T>(self, expected: &str) -> ModelResult<T> {
        Err(ModelError::invalid_value(expected, self.kind_name()))
    }
}

/// Nested models compare by identity, everything else by value
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Uuid(a), Value::Uuid(b)) => a == b,
            (Value::DateTime(a), Value::DateTime(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Time(a), Value::Time(b)) => a == b,
            (Value::Json(a), Value::Json(b)) => a == b,
            (Value::Model(a), Value::Model(b)) => a.ptr_eq(b),
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            _ => false,
        }
    }
}

/// Conversion of a field into a `Value`
pub trait ToValue {
    fn to_value(&self) -> Value;
}

/// Conversion of a restored `Value` back into a field
pub trait FromValue: Sized {
    fn from_value(value: Value) -> ModelResult<Self>;
}

impl ToValue for Value {
    fn to_value(&self) -> Value {
        self.clone()
    }
}

impl FromValue for Value {
    fn from_value(value: Value) -> ModelResult<Self> {
        Ok(value)
    }
}

impl ToValue for bool {
    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> ModelResult<Self> {
        match value {
            Value::Bool(b) => Ok(b),
            other => other.mismatch("bool"),
        }
    }
}

impl ToValue for i64 {
    fn to_value(&self) -> Value {
        Value::Integer(*self)
    }
}

impl FromValue for i64 {
    fn from_value(value: Value) -> ModelResult<Self> {
        match value {
            Value::Integer(i) => Ok(i),
            other => other.mismatch("integer"),
        }
    }
}

impl ToValue for i32 {
    fn to_value(&self) -> Value {
        Value::Integer(i64::from(*self))
    }
}

impl FromValue for i32 {
    fn from_value(value: Value) -> ModelResult<Self> {
        let wide = i64::from_value(value)?;
        i32::try_from(wide)
            .map_err(|_| ModelError::invalid_value("32-bit integer", wide.to_string()))
    }
}

impl ToValue for u32 {
    fn to_value(&self) -> Value {
        Value::Integer(i64::from(*self))
    }
}

impl FromValue for u32 {
    fn from_value(value: Value) -> ModelResult<Self> {
        let wide = i64::from_value(value)?;
        u32::try_from(wide)
            .map_err(|_| ModelError::invalid_value("unsigned 32-bit integer", wide.to_string()))
    }
}

impl ToValue for f64 {
    fn to_value(&self) -> Value {
        Value::Float(*self)
    }
}

impl FromValue for f64 {
    fn from_value(value: Value) -> ModelResult<Self> {
        match value {
            Value::Float(f) => Ok(f),
            Value::Integer(i) => Ok(i as f64),
            other => other.mismatch("float"),
        }
    }
}

impl ToValue for String {
    fn to_value(&self) -> Value {
        Value::String(self.clone())
    }
}

impl ToValue for &str {
    fn to_value(&self) -> Value {
        Value::String((*self).to_string())
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> ModelResult<Self> {
        match value {
            Value::String(s) => Ok(s),
            other => other.mismatch("string"),
        }
    }
}

impl ToValue for Uuid {
    fn to_value(&self) -> Value {
        Value::Uuid(*self)
    }
}

impl FromValue for Uuid {
    fn from_value(value: Value) -> ModelResult<Self> {
        match value {
            Value::Uuid(u) => Ok(u),
            Value::String(s) => {
                Uuid::parse_str(&s).map_err(|_| ModelError::invalid_value("uuid", s))
            }
            other => other.mismatch("uuid"),
        }
    }
}

impl ToValue for DateTime<Utc> {
    fn to_value(&self) -> Value {
        Value::DateTime(*self)
    }
}

impl FromValue for DateTime<Utc> {
    fn from_value(value: Value) -> ModelResult<Self> {
        match value {
            Value::DateTime(dt) => Ok(dt),
            Value::String(s) => DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|_| ModelError::invalid_value("RFC 3339 datetime", s)),
            other => other.mismatch("datetime"),
        }
    }
}

impl ToValue for NaiveDate {
    fn to_value(&self) -> Value {
        Value::Date(*self)
    }
}

impl FromValue for NaiveDate {
    fn from_value(value: Value) -> ModelResult<Self> {
        match value {
            Value::Date(date) => Ok(date),
            Value::String(s) => NaiveDate::parse_from_str(&s, DATE_FORMAT)
                .map_err(|_| ModelError::invalid_value("ISO 8601 date", s)),
            other => other.mismatch("date"),
        }
    }
}

impl ToValue for NaiveTime {
    fn to_value(&self) -> Value {
        Value::Time(*self)
    }
}

impl FromValue for NaiveTime {
    fn from_value(value: Value) -> ModelResult<Self> {
        match value {
            Value::Time(time) => Ok(time),
            Value::String(s) => NaiveTime::parse_from_str(&s, TIME_FORMAT)
                .map_err(|_| ModelError::invalid_value("ISO 8601 time", s)),
            other => other.mismatch("time"),
        }
    }
}

impl ToValue for JsonValue {
    fn to_value(&self) -> Value {
        Value::Json(self.clone())
    }
}

impl FromValue for JsonValue {
    fn from_value(value: Value) -> ModelResult<Self> {
        match value {
            Value::Json(json) => Ok(json),
            Value::Null => Ok(JsonValue::Null),
            Value::Bool(b) => Ok(JsonValue::Bool(b)),
            Value::Integer(i) => Ok(JsonValue::from(i)),
            Value::String(s) => Ok(JsonValue::String(s)),
            other => other.mismatch("json"),
        }
    }
}

impl<T: ToValue> ToValue for Option<T> {
    fn to_value(&self) -> Value {
        match self {
            Some(inner) => inner.to_value(),
            None => Value::Null,
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> ModelResult<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl<T: ToValue> ToValue for Vec<T> {
    fn to_value(&self) -> Value {
        Value::List(self.iter().map(ToValue::to_value).collect())
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: Value) -> ModelResult<Self> {
        match value {
            Value::List(items) => items.into_iter().map(T::from_value).collect(),
            Value::Null => Ok(Vec::new()),
            other => other.mismatch("list"),
        }
    }
}

impl<T: ToValue> ToValue for BTreeSet<T> {
    fn to_value(&self) -> Value {
        Value::List(self.iter().map(ToValue::to_value).collect())
    }
}

impl<T: FromValue + Ord> FromValue for BTreeSet<T> {
    fn from_value(value: Value) -> ModelResult<Self> {
        Vec::<T>::from_value(value).map(|items| items.into_iter().collect())
    }
}

impl<T: ToValue> ToValue for HashSet<T> {
    fn to_value(&self) -> Value {
        Value::List(self.iter().map(ToValue::to_value).collect())
    }
}

impl<T: FromValue + Eq + Hash> FromValue for HashSet<T> {
    fn from_value(value: Value) -> ModelResult<Self> {
        Vec::<T>::from_value(value).map(|items| items.into_iter().collect())
    }
}

impl<T: ToValue> ToValue for BTreeMap<String, T> {
    fn to_value(&self) -> Value {
        Value::Map(
            self.iter()
                .map(|(key, value)| (key.clone(), value.to_value()))
                .collect(),
        )
    }
}

impl<T: FromValue> FromValue for BTreeMap<String, T> {
    fn from_value(value: Value) -> ModelResult<Self> {
        match value {
            Value::Map(entries) => entries
                .into_iter()
                .map(|(key, value)| T::from_value(value).map(|v| (key, v)))
                .collect(),
            Value::Null => Ok(BTreeMap::new()),
            other => other.mismatch("map"),
        }
    }
}

impl<T: ToValue> ToValue for HashMap<String, T> {
    fn to_value(&self) -> Value {
        Value::Map(
            self.iter()
                .map(|(key, value)| (key.clone(), value.to_value()))
                .collect(),
        )
    }
}

impl<T: FromValue> FromValue for HashMap<String, T> {
    fn from_value(value: Value) -> ModelResult<Self> {
        BTreeMap::<String, T>::from_value(value).map(|entries| entries.into_iter().collect())
    }
}

impl<T: Model> ToValue for Handle<T> {
    fn to_value(&self) -> Value {
        Value::Model(self.erase())
    }
}

impl<T: Model> FromValue for Handle<T> {
    fn from_value(value: Value) -> ModelResult<Self> {
        match value {
            Value::Model(handle) => {
                handle.downcast::<T>().ok_or_else(|| ModelError::TypeMismatch {
                    expected: T::model_name().to_string(),
                    found: handle.model_name().to_string(),
                })
            }
            other => other.mismatch(T::model_name()),
        }
    }
}

impl ToValue for ModelHandle {
    fn to_value(&self) -> Value {
        Value::Model(self.clone())
    }
}

impl FromValue for ModelHandle {
    fn from_value(value: Value) -> ModelResult<Self> {
        match value {
            Value::Model(handle) => Ok(handle),
            other => other.mismatch("model"),
        }
    }
}
