//! Object identifiers - storage-assigned identity of persisted instances
//!
//! Document stores hand out string identifiers, relational stores usually
//! integer keys. Both round-trip through JSON as-is.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Identifier assigned by a backend on first save
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ObjectId {
    /// Integer key, e.g. an auto-incrementing primary key
    Integer(i64),
    /// String key, e.g. a document store identifier
    String(String),
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectId::Integer(id) => write!(f, "{}", id),
            ObjectId::String(id) => write!(f, "{}", id),
        }
    }
}

impl ObjectId {
    /// Fresh random identifier in the hyphenated UUID form
    pub fn generate() -> Self {
        ObjectId::String(Uuid::new_v4().to_string())
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ObjectId::Integer(id) => Some(*id),
            ObjectId::String(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ObjectId::String(id) => Some(id),
            ObjectId::Integer(_) => None,
        }
    }

    /// Check if this identifier can address a stored record
    pub fn is_valid(&self) -> bool {
        match self {
            ObjectId::Integer(id) => *id > 0,
            ObjectId::String(id) => !id.is_empty(),
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            ObjectId::Integer(id) => JsonValue::from(*id),
            ObjectId::String(id) => JsonValue::String(id.clone()),
        }
    }

    /// Read an identifier back from its JSON form; floats, objects and null
    /// are not identifiers
    pub fn from_json(value: &JsonValue) -> Option<Self> {
        match value {
            JsonValue::Number(n) => n.as_i64().map(ObjectId::Integer),
            JsonValue::String(s) => Some(ObjectId::String(s.clone())),
            _ => None,
        }
    }
}

impl From<i64> for ObjectId {
    fn from(id: i64) -> Self {
        ObjectId::Integer(id)
    }
}

impl From<String> for ObjectId {
    fn from(id: String) -> Self {
        ObjectId::String(id)
    }
}

impl From<&str> for ObjectId {
    fn from(id: &str) -> Self {
        ObjectId::String(id.to_string())
    }
}

impl From<Uuid> for ObjectId {
    fn from(id: Uuid) -> Self {
        ObjectId::String(id.to_string())
    }
}
