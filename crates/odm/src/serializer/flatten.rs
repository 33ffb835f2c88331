//! Flattening live instances into state records

use serde_json::{Map, Number, Value as JsonValue};

use crate::error::{ModelError, ModelResult};
use crate::model::ModelHandle;
use crate::registry::{ModelDescriptor, Registry};
use crate::state::{ObjectRef, StateRecord};
use crate::value::{Value, DATE_FORMAT, TIME_FORMAT};

use super::ReferencePolicy;

/// State of one flatten call: the registry and the chain of instances
/// currently being embedded
pub struct FlattenContext<'r> {
    registry: &'r Registry,
    embedding: Vec<usize>,
}

impl<'r> FlattenContext<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        Self {
            registry,
            embedding: Vec::new(),
        }
    }

    pub fn registry(&self) -> &'r Registry {
        self.registry
    }

    /// Flatten an instance through its model's serializer. The result holds
    /// the stored fields only; identity travels separately.
    pub fn flatten_model(&mut self, instance: &ModelHandle) -> ModelResult<StateRecord> {
        let address = instance.addr();
        if self.embedding.contains(&address) {
            return Err(ModelError::CyclicEmbed(instance.model_name().to_string()));
        }

        let descriptor = instance.descriptor(self.registry)?;
        let serializer = self.registry.serializer_for(descriptor.name())?;

        self.embedding.push(address);
        let record = serializer.flatten(self, instance, &descriptor);
        self.embedding.pop();
        record
    }

    /// Flatten the stored fields of `instance` in declaration order
    pub fn flatten_fields(
        &mut self,
        instance: &ModelHandle,
        descriptor: &ModelDescriptor,
        policy: ReferencePolicy,
    ) -> ModelResult<StateRecord> {
        let stored: Vec<&str> = descriptor.fields().stored().map(|field| field.name()).collect();
        let values = instance.read_fields(&stored)?;

        let mut record = StateRecord::new();
        for (field, value) in stored.into_iter().zip(values) {
            let flat = self.flatten_value(descriptor.name(), field, value, policy)?;
            record.insert(field, flat);
        }
        Ok(record)
    }

    fn flatten_value(
        &mut self,
        model: &str,
        field: &str,
        value: Value,
        policy: ReferencePolicy,
    ) -> ModelResult<JsonValue> {
        let flat = match value {
            Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(b),
            Value::Integer(i) => JsonValue::from(i),
            Value::Float(f) => Number::from_f64(f).map(JsonValue::Number).ok_or_else(|| {
                ModelError::invalid_value(
                    format!("finite float for {}.{}", model, field),
                    f.to_string(),
                )
            })?,
            Value::String(s) => JsonValue::String(s),
            Value::Bytes(bytes) => {
                JsonValue::Array(bytes.into_iter().map(JsonValue::from).collect())
            }
            Value::Uuid(uuid) => JsonValue::String(uuid.to_string()),
            Value::DateTime(dt) => JsonValue::String(dt.to_rfc3339()),
            Value::Date(date) => JsonValue::String(date.format(DATE_FORMAT).to_string()),
            Value::Time(time) => JsonValue::String(time.format(TIME_FORMAT).to_string()),
            Value::Json(json) => json,
            Value::Model(nested) => self.flatten_nested(model, field, &nested, policy)?,
            Value::List(items) => JsonValue::Array(
                items
                    .into_iter()
                    .map(|item| self.flatten_value(model, field, item, policy))
                    .collect::<ModelResult<Vec<_>>>()?,
            ),
            Value::Map(entries) => {
                let mut object = Map::with_capacity(entries.len());
                for (key, item) in entries {
                    object.insert(key, self.flatten_value(model, field, item, policy)?);
                }
                JsonValue::Object(object)
            }
        };
        Ok(flat)
    }

    fn flatten_nested(
        &mut self,
        model: &str,
        field: &str,
        nested: &ModelHandle,
        policy: ReferencePolicy,
    ) -> ModelResult<JsonValue> {
        if let Some(id) = nested.object_id() {
            return Ok(ObjectRef::new(nested.model_name(), id).to_json());
        }

        match policy {
            ReferencePolicy::RequireSaved => Err(ModelError::UnsavedDependency {
                model: model.to_string(),
                field: field.to_string(),
                dependency: nested.model_name().to_string(),
            }),
            ReferencePolicy::EmbedTransient => {
                let record = self.flatten_model(nested)?;
                Ok(StateRecord::embedded(nested.model_name(), record).into_json())
            }
        }
    }
}
