//! Flattened state - the storage-representable form of a model instance
//!
//! A `StateRecord` is an ordered JSON object. Two keys are reserved: `_id`
//! holds the storage identifier and `_type` the model name. Nested models
//! appear either as a reference `{"_id": .., "_type": ..}` or, for unsaved
//! instances in document stores, as an embedded object with `_type` and no
//! `_id`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::error::{ModelError, ModelResult};
use crate::object_id::ObjectId;

/// Reserved key holding the storage identifier
pub const ID_KEY: &str = "_id";

/// Reserved key holding the model name
pub const TYPE_KEY: &str = "_type";

/// Ordered map of field name to JSON value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateRecord(Map<String, JsonValue>);

impl StateRecord {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Embedded form of a nested record, with `_type` leading
    pub fn embedded(model: &str, record: StateRecord) -> Self {
        let mut map = Map::with_capacity(record.len() + 1);
        map.insert(TYPE_KEY.to_string(), JsonValue::String(model.to_string()));
        for (key, value) in record.0 {
            if key != TYPE_KEY {
                map.insert(key, value);
            }
        }
        Self(map)
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: JsonValue) -> Option<JsonValue> {
        self.0.insert(key.into(), value)
    }

    pub fn remove(&mut self, key: &str) -> Option<JsonValue> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &JsonValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn id(&self) -> Option<ObjectId> {
        self.0.get(ID_KEY).and_then(ObjectId::from_json)
    }

    /// Copy of this record with `_id` as the leading key
    pub fn with_id(self, id: &ObjectId) -> Self {
        let mut map = Map::with_capacity(self.len() + 1);
        map.insert(ID_KEY.to_string(), id.to_json());
        for (key, value) in self.0 {
            if key != ID_KEY {
                map.insert(key, value);
            }
        }
        Self(map)
    }

    pub fn model_type(&self) -> Option<&str> {
        self.0.get(TYPE_KEY).and_then(JsonValue::as_str)
    }

    pub fn as_map(&self) -> &Map<String, JsonValue> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, JsonValue> {
        self.0
    }

    pub fn into_json(self) -> JsonValue {
        JsonValue::Object(self.0)
    }
}

impl From<Map<String, JsonValue>> for StateRecord {
    fn from(map: Map<String, JsonValue>) -> Self {
        Self(map)
    }
}

impl TryFrom<JsonValue> for StateRecord {
    type Error = ModelError;

    fn try_from(value: JsonValue) -> ModelResult<Self> {
        match value {
            JsonValue::Object(map) => Ok(Self(map)),
            other => Err(ModelError::Serialization(format!(
                "state record must be a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }
}

impl IntoIterator for StateRecord {
    type Item = (String, JsonValue);
    type IntoIter = serde_json::map::IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Pointer to a stored instance of some model
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    pub model: String,
    pub id: ObjectId,
}

impl ObjectRef {
    pub fn new(model: impl Into<String>, id: ObjectId) -> Self {
        Self {
            model: model.into(),
            id,
        }
    }

    pub fn to_json(&self) -> JsonValue {
        let mut map = Map::with_capacity(2);
        map.insert(ID_KEY.to_string(), self.id.to_json());
        map.insert(TYPE_KEY.to_string(), JsonValue::String(self.model.clone()));
        JsonValue::Object(map)
    }

    /// Read a reference object. A missing `_type` falls back to the declared
    /// model; objects without a usable `_id` are not references.
    pub fn parse(value: &JsonValue, declared_model: &str) -> Option<Self> {
        let object = value.as_object()?;
        let id = object.get(ID_KEY).and_then(ObjectId::from_json)?;
        let model = object
            .get(TYPE_KEY)
            .and_then(JsonValue::as_str)
            .unwrap_or(declared_model);
        Some(Self::new(model, id))
    }
}

/// Conjunction of field equalities used to select records
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<(String, JsonValue)>,
}

impl Filter {
    /// Matches every record
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_id(id: ObjectId) -> Self {
        Self::all().and_eq(ID_KEY, id.to_json())
    }

    pub fn eq(field: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self::all().and_eq(field, value)
    }

    pub fn and_eq(mut self, field: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.conditions.push((field.into(), value.into()));
        self
    }

    pub fn conditions(&self) -> &[(String, JsonValue)] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Identifier this filter pins, if it has an `_id` condition
    pub fn id(&self) -> Option<ObjectId> {
        self.conditions
            .iter()
            .find(|(field, _)| field == ID_KEY)
            .and_then(|(_, value)| ObjectId::from_json(value))
    }

    pub fn matches(&self, record: &StateRecord) -> bool {
        self.conditions.iter().all(|(field, expected)| {
            record
                .get(field)
                .map(|actual| value_matches(actual, expected))
                .unwrap_or_else(|| expected.is_null())
        })
    }
}

impl TryFrom<JsonValue> for Filter {
    type Error = ModelError;

    fn try_from(value: JsonValue) -> ModelResult<Self> {
        match value {
            JsonValue::Object(map) => Ok(Self {
                conditions: map.into_iter().collect(),
            }),
            other => Err(ModelError::Serialization(format!(
                "filter must be a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }
}

/// Equality with array membership: a condition on an array-valued field
/// matches when the array holds the expected value
pub fn value_matches(actual: &JsonValue, expected: &JsonValue) -> bool {
    if actual == expected {
        return true;
    }
    match actual {
        JsonValue::Array(items) if !expected.is_array() => {
            items.iter().any(|item| item == expected)
        }
        _ => false,
    }
}

/// Short name of a JSON value's type, for error messages
pub fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(n) if n.is_i64() || n.is_u64() => "integer",
        JsonValue::Number(_) => "float",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}
