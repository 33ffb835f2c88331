//! Field metadata - what a model declares about each of its members
//!
//! A model lists its fields once through `Model::fields()`. The resulting
//! `FieldTable` is frozen inside the model's descriptor and drives both
//! flattening and restoring. Tags are kept verbatim so backends can read
//! their own hints (column names, lengths, ordering).

use std::collections::{BTreeMap, HashMap};

use serde_json::Value as JsonValue;

use crate::error::{ModelError, ModelResult};

/// Tag marking a field as stored (`false`) or not stored (`true`)
pub const EXCLUDE_TAG: &str = "exclude";

/// Tag ordering field assignment during restore, lower first
pub const RESTORE_ORDER_TAG: &str = "restore_order";

/// Restore order of fields that carry no `restore_order` tag
pub const DEFAULT_RESTORE_ORDER: i64 = 1000;

/// Scalar value types a field can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    Bool,
    Integer,
    Float,
    String,
    Bytes,
    Uuid,
    DateTime,
    /// Calendar date without a time zone
    Date,
    /// Time of day without a time zone
    Time,
    /// Arbitrary JSON, stored as-is
    Json,
}

impl std::fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PrimitiveType::Bool => "bool",
            PrimitiveType::Integer => "integer",
            PrimitiveType::Float => "float",
            PrimitiveType::String => "string",
            PrimitiveType::Bytes => "bytes",
            PrimitiveType::Uuid => "uuid",
            PrimitiveType::DateTime => "datetime",
            PrimitiveType::Date => "date",
            PrimitiveType::Time => "time",
            PrimitiveType::Json => "json",
        };
        write!(f, "{}", name)
    }
}

/// Element type of a container field
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Element {
    Primitive(PrimitiveType),
    /// Nested model, by registered name
    Model(String),
}

impl Element {
    pub fn model(name: impl Into<String>) -> Self {
        Element::Model(name.into())
    }

    pub fn model_name(&self) -> Option<&str> {
        match self {
            Element::Model(name) => Some(name),
            Element::Primitive(_) => None,
        }
    }
}

impl From<PrimitiveType> for Element {
    fn from(ty: PrimitiveType) -> Self {
        Element::Primitive(ty)
    }
}

/// Declared shape of a field
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Primitive(PrimitiveType),
    /// Single nested model, by registered name
    Model(String),
    SequenceOf(Element),
    SetOf(Element),
    /// String-keyed mapping
    Mapping(Element),
}

impl FieldKind {
    /// Name of the model this field nests, directly or as container element
    pub fn nested_model(&self) -> Option<&str> {
        match self {
            FieldKind::Model(name) => Some(name),
            FieldKind::SequenceOf(element)
            | FieldKind::SetOf(element)
            | FieldKind::Mapping(element) => element.model_name(),
            FieldKind::Primitive(_) => None,
        }
    }

    pub fn is_container(&self) -> bool {
        matches!(
            self,
            FieldKind::SequenceOf(_) | FieldKind::SetOf(_) | FieldKind::Mapping(_)
        )
    }
}

/// One declared member of a model
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    name: String,
    kind: FieldKind,
    tags: BTreeMap<String, JsonValue>,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            tags: BTreeMap::new(),
        }
    }

    pub fn primitive(name: impl Into<String>, ty: PrimitiveType) -> Self {
        Self::new(name, FieldKind::Primitive(ty))
    }

    pub fn model(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Model(model.into()))
    }

    pub fn sequence_of(name: impl Into<String>, element: impl Into<Element>) -> Self {
        Self::new(name, FieldKind::SequenceOf(element.into()))
    }

    pub fn set_of(name: impl Into<String>, element: impl Into<Element>) -> Self {
        Self::new(name, FieldKind::SetOf(element.into()))
    }

    pub fn mapping(name: impl Into<String>, element: impl Into<Element>) -> Self {
        Self::new(name, FieldKind::Mapping(element.into()))
    }

    /// Attach a tag; later tags with the same key replace earlier ones
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Keep this field out of stored state
    pub fn exclude(self) -> Self {
        self.tag(EXCLUDE_TAG, true)
    }

    pub fn restore_order_tag(self, order: i64) -> Self {
        self.tag(RESTORE_ORDER_TAG, order)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    pub fn tags(&self) -> &BTreeMap<String, JsonValue> {
        &self.tags
    }

    pub fn tag_value(&self, key: &str) -> Option<&JsonValue> {
        self.tags.get(key)
    }

    pub fn tag_str(&self, key: &str) -> Option<&str> {
        self.tags.get(key).and_then(JsonValue::as_str)
    }

    pub fn tag_bool(&self, key: &str) -> Option<bool> {
        self.tags.get(key).and_then(JsonValue::as_bool)
    }

    pub fn tag_u64(&self, key: &str) -> Option<u64> {
        self.tags.get(key).and_then(JsonValue::as_u64)
    }

    /// Whether this field is part of stored state.
    ///
    /// An explicit `exclude` tag wins; otherwise names starting with an
    /// underscore are private and not stored.
    pub fn is_stored(&self) -> bool {
        match self.tag_bool(EXCLUDE_TAG) {
            Some(excluded) => !excluded,
            None => !self.name.starts_with('_'),
        }
    }

    pub fn restore_order(&self) -> i64 {
        self.tags
            .get(RESTORE_ORDER_TAG)
            .and_then(JsonValue::as_i64)
            .unwrap_or(DEFAULT_RESTORE_ORDER)
    }

    pub fn nested_model(&self) -> Option<&str> {
        self.kind.nested_model()
    }
}

/// Ordered, name-indexed field list of one model
#[derive(Debug, Clone, PartialEq)]
pub struct FieldTable {
    model: String,
    fields: Vec<FieldDescriptor>,
    index: HashMap<String, usize>,
}

impl FieldTable {
    /// Build the table, rejecting duplicate field names
    pub fn new(model: impl Into<String>, fields: Vec<FieldDescriptor>) -> ModelResult<Self> {
        let model = model.into();
        let mut index = HashMap::with_capacity(fields.len());

        for (position, field) in fields.iter().enumerate() {
            if index.insert(field.name.clone(), position).is_some() {
                return Err(ModelError::Configuration(format!(
                    "Model '{}' declares field '{}' more than once",
                    model, field.name
                )));
            }
        }

        Ok(Self {
            model,
            fields,
            index,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn get(&self, name: &str) -> ModelResult<&FieldDescriptor> {
        self.index
            .get(name)
            .map(|&position| &self.fields[position])
            .ok_or_else(|| ModelError::unknown_field(&self.model, name))
    }

    /// Declaration position of a field
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter()
    }

    /// Stored fields in declaration order
    pub fn stored(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|field| field.is_stored())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
