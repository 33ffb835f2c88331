//! Restoring state records into live instance graphs
//!
//! Nested values of a record, and elements of a container, are resolved
//! concurrently. A per-call `ResolutionScope` maps `(model, id)` to the
//! instance built for it: the first reference claims the slot and fetches,
//! every later reference joins the same instance. Cycles therefore close
//! on the instance already under construction instead of fetching again.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use futures::future::{self, try_join_all, BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::{ModelError, ModelResult};
use crate::fields::{Element, FieldDescriptor, FieldKind, PrimitiveType};
use crate::model::ModelHandle;
use crate::object_id::ObjectId;
use crate::registry::{ModelDescriptor, Registry};
use crate::state::{json_kind, ObjectRef, StateRecord, TYPE_KEY};
use crate::value::{Value, DATE_FORMAT, TIME_FORMAT};

enum Claim {
    /// Another reference already owns this instance
    Joined(ModelHandle),
    /// The caller owns this instance and must fetch its state
    Claimed(ModelHandle),
}

/// Instances resolved during one restore call
#[derive(Default)]
pub struct ResolutionScope {
    instances: Mutex<HashMap<(String, ObjectId), ModelHandle>>,
    fetches: AtomicUsize,
    joins: AtomicUsize,
}

/// Counters of one resolution scope
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScopeStats {
    pub resolved: usize,
    pub fetches: usize,
    pub joins: usize,
}

impl fmt::Display for ScopeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "resolved: {}, fetches: {}, joins: {}",
            self.resolved, self.fetches, self.joins
        )
    }
}

impl ResolutionScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Instance already resolved for `(model, id)`
    pub fn get(&self, model: &str, id: &ObjectId) -> Option<ModelHandle> {
        self.instances
            .lock()
            .get(&(model.to_string(), id.clone()))
            .cloned()
    }

    /// Record an instance the caller already holds
    pub fn seed(&self, model: &str, id: ObjectId, instance: ModelHandle) {
        self.instances.lock().insert((model.to_string(), id), instance);
    }

    pub fn stats(&self) -> ScopeStats {
        ScopeStats {
            resolved: self.instances.lock().len(),
            fetches: self.fetches.load(Ordering::Relaxed),
            joins: self.joins.load(Ordering::Relaxed),
        }
    }

    fn claim<F>(&self, model: &str, id: &ObjectId, create: F) -> ModelResult<Claim>
    where
        F: FnOnce() -> ModelResult<ModelHandle>,
    {
        let mut instances = self.instances.lock();
        let key = (model.to_string(), id.clone());
        if let Some(existing) = instances.get(&key) {
            self.joins.fetch_add(1, Ordering::Relaxed);
            return Ok(Claim::Joined(existing.clone()));
        }

        let instance = create()?;
        instances.insert(key, instance.clone());
        Ok(Claim::Claimed(instance))
    }
}

/// State of one restore call
pub struct RestoreContext<'r> {
    registry: &'r Registry,
    scope: ResolutionScope,
}

impl<'r> RestoreContext<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        Self {
            registry,
            scope: ResolutionScope::new(),
        }
    }

    pub fn registry(&self) -> &'r Registry {
        self.registry
    }

    pub fn scope(&self) -> &ResolutionScope {
        &self.scope
    }

    pub fn stats(&self) -> ScopeStats {
        self.scope.stats()
    }

    /// Restore a top-level record as an instance of `model`
    pub async fn restore(&self, model: &str, state: StateRecord) -> ModelResult<ModelHandle> {
        if let Some(found) = state.model_type() {
            if found != model {
                return Err(ModelError::TypeMismatch {
                    expected: model.to_string(),
                    found: found.to_string(),
                });
            }
        }

        let descriptor = self.registry.resolve(model)?;
        let instance = descriptor.instantiate()?;
        self.restore_into(instance.clone(), descriptor, state).await?;
        Ok(instance)
    }

    /// Restore a record into an existing instance. The record's `_id`
    /// becomes the instance's identifier and seeds the scope.
    pub async fn restore_into(
        &self,
        target: ModelHandle,
        descriptor: Arc<ModelDescriptor>,
        state: StateRecord,
    ) -> ModelResult<()> {
        if let Some(id) = state.id() {
            target.set_object_id(Some(id.clone()));
            self.scope.seed(descriptor.name(), id, target.clone());
        }
        self.unflatten_with_serializer(target, descriptor, state).await
    }

    /// Resolve every stored field present in `state` and assign them to
    /// `target` in restore order. Unknown keys are ignored.
    pub fn populate<'s>(
        &'s self,
        target: ModelHandle,
        descriptor: Arc<ModelDescriptor>,
        mut state: StateRecord,
    ) -> BoxFuture<'s, ModelResult<()>> {
        async move {
            let pending: Vec<(usize, &FieldDescriptor, JsonValue)> = descriptor
                .fields()
                .iter()
                .enumerate()
                .filter(|(_, field)| field.is_stored())
                .filter_map(|(position, field)| {
                    state.remove(field.name()).map(|raw| (position, field, raw))
                })
                .collect();

            let values = try_join_all(
                pending
                    .iter()
                    .map(|(_, field, raw)| self.unflatten_field(descriptor.name(), field, raw)),
            )
            .await?;

            let mut assignments: Vec<(i64, usize, String, Value)> = pending
                .iter()
                .zip(values)
                .map(|((position, field, _), value)| {
                    (field.restore_order(), *position, field.name().to_string(), value)
                })
                .collect();
            assignments.sort_by_key(|(order, position, _, _)| (*order, *position));

            target.write_fields(
                assignments
                    .into_iter()
                    .map(|(_, _, name, value)| (name, value))
                    .collect(),
            )
        }
        .boxed()
    }

    fn unflatten_with_serializer<'s>(
        &'s self,
        target: ModelHandle,
        descriptor: Arc<ModelDescriptor>,
        state: StateRecord,
    ) -> BoxFuture<'s, ModelResult<()>> {
        async move {
            let serializer = self.registry.serializer_for(descriptor.name())?;
            serializer.unflatten(self, target, descriptor, state).await
        }
        .boxed()
    }

    fn unflatten_field<'a>(
        &'a self,
        model: &'a str,
        field: &'a FieldDescriptor,
        raw: &'a JsonValue,
    ) -> BoxFuture<'a, ModelResult<Value>> {
        match field.kind() {
            FieldKind::Primitive(ty) => {
                future::ready(coerce(*ty, raw, model, field.name())).boxed()
            }
            FieldKind::Model(declared) => self.unflatten_model(declared, raw),
            FieldKind::SequenceOf(element) | FieldKind::SetOf(element) => {
                self.unflatten_list(model, field.name(), element, raw)
            }
            FieldKind::Mapping(element) => self.unflatten_map(model, field.name(), element, raw),
        }
    }

    fn unflatten_element<'a>(
        &'a self,
        model: &'a str,
        field: &'a str,
        element: &'a Element,
        raw: &'a JsonValue,
    ) -> BoxFuture<'a, ModelResult<Value>> {
        match element {
            Element::Primitive(ty) => future::ready(coerce(*ty, raw, model, field)).boxed(),
            Element::Model(declared) => self.unflatten_model(declared, raw),
        }
    }

    fn unflatten_list<'a>(
        &'a self,
        model: &'a str,
        field: &'a str,
        element: &'a Element,
        raw: &'a JsonValue,
    ) -> BoxFuture<'a, ModelResult<Value>> {
        async move {
            match raw {
                JsonValue::Null => Ok(Value::Null),
                JsonValue::Array(items) => {
                    let values = try_join_all(
                        items
                            .iter()
                            .map(|item| self.unflatten_element(model, field, element, item)),
                    )
                    .await?;
                    Ok(Value::List(values))
                }
                other => Err(ModelError::invalid_value(
                    format!("list for {}.{}", model, field),
                    json_kind(other),
                )),
            }
        }
        .boxed()
    }

    fn unflatten_map<'a>(
        &'a self,
        model: &'a str,
        field: &'a str,
        element: &'a Element,
        raw: &'a JsonValue,
    ) -> BoxFuture<'a, ModelResult<Value>> {
        async move {
            match raw {
                JsonValue::Null => Ok(Value::Null),
                JsonValue::Object(entries) => {
                    let values = try_join_all(
                        entries
                            .values()
                            .map(|item| self.unflatten_element(model, field, element, item)),
                    )
                    .await?;
                    let map: BTreeMap<String, Value> =
                        entries.keys().cloned().zip(values).collect();
                    Ok(Value::Map(map))
                }
                other => Err(ModelError::invalid_value(
                    format!("mapping for {}.{}", model, field),
                    json_kind(other),
                )),
            }
        }
        .boxed()
    }

    /// A nested model value: null, a reference, or an embedded document.
    /// `_type` inside the value overrides the declared model.
    fn unflatten_model<'a>(
        &'a self,
        declared: &'a str,
        raw: &'a JsonValue,
    ) -> BoxFuture<'a, ModelResult<Value>> {
        async move {
            match raw {
                JsonValue::Null => Ok(Value::Null),
                JsonValue::Object(object) => {
                    if let Some(reference) = ObjectRef::parse(raw, declared) {
                        return self.resolve_reference(reference).await.map(Value::Model);
                    }

                    let model = object
                        .get(TYPE_KEY)
                        .and_then(JsonValue::as_str)
                        .unwrap_or(declared);
                    let descriptor = self.registry.resolve(model)?;
                    let instance = descriptor.instantiate()?;

                    let mut state = StateRecord::from(object.clone());
                    state.remove(TYPE_KEY);
                    self.unflatten_with_serializer(instance.clone(), descriptor, state)
                        .await?;
                    Ok(Value::Model(instance))
                }
                other => Err(ModelError::invalid_value(
                    format!("reference to {}", declared),
                    json_kind(other),
                )),
            }
        }
        .boxed()
    }

    fn resolve_reference(&self, reference: ObjectRef) -> BoxFuture<'_, ModelResult<ModelHandle>> {
        async move {
            let descriptor = self.registry.resolve(&reference.model)?;
            let claim = self.scope.claim(&reference.model, &reference.id, || {
                let instance = descriptor.instantiate()?;
                instance.set_object_id(Some(reference.id.clone()));
                Ok(instance)
            })?;

            match claim {
                Claim::Joined(instance) => {
                    tracing::trace!(
                        model = %reference.model,
                        id = %reference.id,
                        "Joined resolved instance"
                    );
                    Ok(instance)
                }
                Claim::Claimed(instance) => {
                    let manager = self.registry.manager_for(&reference.model)?;
                    self.scope.fetches.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(
                        model = %reference.model,
                        id = %reference.id,
                        "Fetching referenced record"
                    );

                    let state = manager.get(&reference.id).await?.ok_or_else(|| {
                        ModelError::DanglingReference {
                            model: reference.model.clone(),
                            id: reference.id.clone(),
                        }
                    })?;
                    self.unflatten_with_serializer(instance.clone(), descriptor, state)
                        .await?;
                    Ok(instance)
                }
            }
        }
        .boxed()
    }
}

/// Coerce a stored scalar to the declared primitive type
fn coerce(ty: PrimitiveType, raw: &JsonValue, model: &str, field: &str) -> ModelResult<Value> {
    if raw.is_null() {
        return Ok(Value::Null);
    }

    let coerced = match ty {
        PrimitiveType::Json => Some(Value::Json(raw.clone())),
        PrimitiveType::Bool => raw.as_bool().map(Value::Bool),
        PrimitiveType::Integer => raw.as_i64().map(Value::Integer),
        PrimitiveType::Float => raw.as_f64().map(Value::Float),
        PrimitiveType::String => raw.as_str().map(|s| Value::String(s.to_string())),
        PrimitiveType::Bytes => raw
            .as_array()
            .and_then(|items| {
                items
                    .iter()
                    .map(|byte| byte.as_u64().and_then(|b| u8::try_from(b).ok()))
                    .collect::<Option<Vec<u8>>>()
            })
            .map(Value::Bytes),
        PrimitiveType::Uuid => raw
            .as_str()
            .and_then(|s| Uuid::parse_str(s).ok())
            .map(Value::Uuid),
        PrimitiveType::DateTime => raw
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| Value::DateTime(dt.with_timezone(&Utc))),
        PrimitiveType::Date => raw
            .as_str()
            .and_then(|s| NaiveDate::parse_from_str(s, DATE_FORMAT).ok())
            .map(Value::Date),
        PrimitiveType::Time => raw
            .as_str()
            .and_then(|s| NaiveTime::parse_from_str(s, TIME_FORMAT).ok())
            .map(Value::Time),
    };

    coerced.ok_or_else(|| {
        ModelError::invalid_value(format!("{} for {}.{}", ty, model, field), json_kind(raw))
    })
}
