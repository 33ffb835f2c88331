//! Shared models and registry fixtures for the integration tests

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Once};

use chrono::{NaiveDate, NaiveTime};
use elif_odm::prelude::*;
use elif_odm::{IdStrategy, MemoryDocumentStore, MemoryRelationalStore};

static TRACING: Once = Once::new();

/// Install a test subscriber honouring `RUST_LOG`
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

#[derive(Debug, Default)]
pub struct Group {
    pub id: Option<ObjectId>,
    pub name: String,
}

impl Group {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }
}

impl Model for Group {
    fn model_name() -> &'static str {
        "Group"
    }

    fn fields() -> Vec<FieldDescriptor> {
        vec![FieldDescriptor::primitive("name", PrimitiveType::String)]
    }

    fn object_id(&self) -> Option<ObjectId> {
        self.id.clone()
    }

    fn set_object_id(&mut self, id: Option<ObjectId>) {
        self.id = id;
    }

    fn get_field(&self, name: &str) -> ModelResult<Value> {
        match name {
            "name" => Ok(self.name.to_value()),
            _ => Err(Self::unknown_field(name)),
        }
    }

    fn set_field(&mut self, name: &str, value: Value) -> ModelResult<()> {
        match name {
            "name" => self.name = FromValue::from_value(value)?,
            _ => return Err(Self::unknown_field(name)),
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct Profile {
    pub id: Option<ObjectId>,
    pub bio: String,
}

impl Model for Profile {
    fn model_name() -> &'static str {
        "Profile"
    }

    fn collection_name() -> &'static str {
        "profiles"
    }

    fn fields() -> Vec<FieldDescriptor> {
        vec![FieldDescriptor::primitive("bio", PrimitiveType::String)]
    }

    fn object_id(&self) -> Option<ObjectId> {
        self.id.clone()
    }

    fn set_object_id(&mut self, id: Option<ObjectId>) {
        self.id = id;
    }

    fn get_field(&self, name: &str) -> ModelResult<Value> {
        match name {
            "bio" => Ok(self.bio.to_value()),
            _ => Err(Self::unknown_field(name)),
        }
    }

    fn set_field(&mut self, name: &str, value: Value) -> ModelResult<()> {
        match name {
            "bio" => self.bio = FromValue::from_value(value)?,
            _ => return Err(Self::unknown_field(name)),
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct User {
    pub id: Option<ObjectId>,
    pub name: String,
    pub groups: Vec<Handle<Group>>,
    pub primary: Option<Handle<Group>>,
    pub tags: BTreeSet<String>,
    pub settings: BTreeMap<String, i64>,
    pub profile: Option<Handle<Profile>>,
    /// Runtime only
    pub session: String,
}

impl User {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }
}

impl Model for User {
    fn model_name() -> &'static str {
        "User"
    }

    fn fields() -> Vec<FieldDescriptor> {
        vec![
            FieldDescriptor::primitive("name", PrimitiveType::String),
            FieldDescriptor::sequence_of("groups", Element::model("Group")),
            FieldDescriptor::model("primary", "Group"),
            FieldDescriptor::set_of("tags", PrimitiveType::String),
            FieldDescriptor::mapping("settings", PrimitiveType::Integer),
            FieldDescriptor::model("profile", "Profile"),
            FieldDescriptor::primitive("session", PrimitiveType::String).exclude(),
        ]
    }

    fn object_id(&self) -> Option<ObjectId> {
        self.id.clone()
    }

    fn set_object_id(&mut self, id: Option<ObjectId>) {
        self.id = id;
    }

    fn get_field(&self, name: &str) -> ModelResult<Value> {
        match name {
            "name" => Ok(self.name.to_value()),
            "groups" => Ok(self.groups.to_value()),
            "primary" => Ok(self.primary.to_value()),
            "tags" => Ok(self.tags.to_value()),
            "settings" => Ok(self.settings.to_value()),
            "profile" => Ok(self.profile.to_value()),
            "session" => Ok(self.session.to_value()),
            _ => Err(Self::unknown_field(name)),
        }
    }

    fn set_field(&mut self, name: &str, value: Value) -> ModelResult<()> {
        match name {
            "name" => self.name = FromValue::from_value(value)?,
            "groups" => self.groups = FromValue::from_value(value)?,
            "primary" => self.primary = FromValue::from_value(value)?,
            "tags" => self.tags = FromValue::from_value(value)?,
            "settings" => self.settings = FromValue::from_value(value)?,
            "profile" => self.profile = FromValue::from_value(value)?,
            "session" => self.session = FromValue::from_value(value)?,
            _ => return Err(Self::unknown_field(name)),
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct Node {
    pub id: Option<ObjectId>,
    pub name: String,
    pub peer: Option<Handle<Node>>,
}

impl Node {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }
}

impl Model for Node {
    fn model_name() -> &'static str {
        "Node"
    }

    fn fields() -> Vec<FieldDescriptor> {
        vec![
            FieldDescriptor::primitive("name", PrimitiveType::String),
            FieldDescriptor::model("peer", "Node"),
        ]
    }

    fn object_id(&self) -> Option<ObjectId> {
        self.id.clone()
    }

    fn set_object_id(&mut self, id: Option<ObjectId>) {
        self.id = id;
    }

    fn get_field(&self, name: &str) -> ModelResult<Value> {
        match name {
            "name" => Ok(self.name.to_value()),
            "peer" => Ok(self.peer.to_value()),
            _ => Err(Self::unknown_field(name)),
        }
    }

    fn set_field(&mut self, name: &str, value: Value) -> ModelResult<()> {
        match name {
            "name" => self.name = FromValue::from_value(value)?,
            "peer" => self.peer = FromValue::from_value(value)?,
            _ => return Err(Self::unknown_field(name)),
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct Author {
    pub id: Option<ObjectId>,
    pub name: String,
}

impl Author {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }
}

impl Model for Author {
    fn model_name() -> &'static str {
        "Author"
    }

    fn collection_name() -> &'static str {
        "authors"
    }

    fn fields() -> Vec<FieldDescriptor> {
        vec![FieldDescriptor::primitive("name", PrimitiveType::String)
            .tag("max_length", 64)
            .tag("nullable", false)]
    }

    fn object_id(&self) -> Option<ObjectId> {
        self.id.clone()
    }

    fn set_object_id(&mut self, id: Option<ObjectId>) {
        self.id = id;
    }

    fn get_field(&self, name: &str) -> ModelResult<Value> {
        match name {
            "name" => Ok(self.name.to_value()),
            _ => Err(Self::unknown_field(name)),
        }
    }

    fn set_field(&mut self, name: &str, value: Value) -> ModelResult<()> {
        match name {
            "name" => self.name = FromValue::from_value(value)?,
            _ => return Err(Self::unknown_field(name)),
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct Book {
    pub id: Option<ObjectId>,
    pub title: String,
    pub author: Option<Handle<Author>>,
    pub reviewers: Vec<Handle<Author>>,
}

impl Book {
    pub fn titled(title: &str) -> Self {
        Self {
            title: title.to_string(),
            ..Self::default()
        }
    }
}

impl Model for Book {
    fn model_name() -> &'static str {
        "Book"
    }

    fn collection_name() -> &'static str {
        "books"
    }

    fn fields() -> Vec<FieldDescriptor> {
        vec![
            FieldDescriptor::primitive("title", PrimitiveType::String).tag("index", true),
            FieldDescriptor::model("author", "Author").tag("column", "author_id"),
            FieldDescriptor::sequence_of("reviewers", Element::model("Author")),
        ]
    }

    fn object_id(&self) -> Option<ObjectId> {
        self.id.clone()
    }

    fn set_object_id(&mut self, id: Option<ObjectId>) {
        self.id = id;
    }

    fn get_field(&self, name: &str) -> ModelResult<Value> {
        match name {
            "title" => Ok(self.title.to_value()),
            "author" => Ok(self.author.to_value()),
            "reviewers" => Ok(self.reviewers.to_value()),
            _ => Err(Self::unknown_field(name)),
        }
    }

    fn set_field(&mut self, name: &str, value: Value) -> ModelResult<()> {
        match name {
            "title" => self.title = FromValue::from_value(value)?,
            "author" => self.author = FromValue::from_value(value)?,
            "reviewers" => self.reviewers = FromValue::from_value(value)?,
            _ => return Err(Self::unknown_field(name)),
        }
        Ok(())
    }
}

/// Sensor reading; kelvin values below absolute zero are refused
#[derive(Debug, Default)]
pub struct Reading {
    pub id: Option<ObjectId>,
    pub station: String,
    pub kelvin: f64,
    pub taken_on: Option<NaiveDate>,
    pub taken_at: Option<NaiveTime>,
}

impl Reading {
    pub fn at(station: &str, kelvin: f64) -> Self {
        Self {
            station: station.to_string(),
            kelvin,
            ..Self::default()
        }
    }
}

impl Model for Reading {
    fn model_name() -> &'static str {
        "Reading"
    }

    fn fields() -> Vec<FieldDescriptor> {
        vec![
            FieldDescriptor::primitive("station", PrimitiveType::String),
            FieldDescriptor::primitive("kelvin", PrimitiveType::Float),
            FieldDescriptor::primitive("taken_on", PrimitiveType::Date),
            FieldDescriptor::primitive("taken_at", PrimitiveType::Time),
        ]
    }

    fn object_id(&self) -> Option<ObjectId> {
        self.id.clone()
    }

    fn set_object_id(&mut self, id: Option<ObjectId>) {
        self.id = id;
    }

    fn get_field(&self, name: &str) -> ModelResult<Value> {
        match name {
            "station" => Ok(self.station.to_value()),
            "kelvin" => Ok(self.kelvin.to_value()),
            "taken_on" => Ok(self.taken_on.to_value()),
            "taken_at" => Ok(self.taken_at.to_value()),
            _ => Err(Self::unknown_field(name)),
        }
    }

    fn set_field(&mut self, name: &str, value: Value) -> ModelResult<()> {
        match name {
            "station" => self.station = FromValue::from_value(value)?,
            "kelvin" => {
                let kelvin = f64::from_value(value)?;
                if kelvin < 0.0 {
                    return Err(ModelError::invalid_value("kelvin >= 0", kelvin.to_string()));
                }
                self.kelvin = kelvin;
            }
            "taken_on" => self.taken_on = FromValue::from_value(value)?,
            "taken_at" => self.taken_at = FromValue::from_value(value)?,
            _ => return Err(Self::unknown_field(name)),
        }
        Ok(())
    }
}

/// Records the order its fields are assigned in
#[derive(Debug, Default)]
pub struct Ledger {
    pub id: Option<ObjectId>,
    pub total: i64,
    pub currency: String,
    pub note: String,
    pub assigned: Vec<String>,
}

impl Model for Ledger {
    fn model_name() -> &'static str {
        "Ledger"
    }

    fn fields() -> Vec<FieldDescriptor> {
        vec![
            FieldDescriptor::primitive("note", PrimitiveType::String),
            FieldDescriptor::primitive("total", PrimitiveType::Integer).restore_order_tag(10),
            FieldDescriptor::primitive("currency", PrimitiveType::String).restore_order_tag(1),
        ]
    }

    fn object_id(&self) -> Option<ObjectId> {
        self.id.clone()
    }

    fn set_object_id(&mut self, id: Option<ObjectId>) {
        self.id = id;
    }

    fn get_field(&self, name: &str) -> ModelResult<Value> {
        match name {
            "total" => Ok(self.total.to_value()),
            "currency" => Ok(self.currency.to_value()),
            "note" => Ok(self.note.to_value()),
            _ => Err(Self::unknown_field(name)),
        }
    }

    fn set_field(&mut self, name: &str, value: Value) -> ModelResult<()> {
        match name {
            "total" => self.total = FromValue::from_value(value)?,
            "currency" => self.currency = FromValue::from_value(value)?,
            "note" => self.note = FromValue::from_value(value)?,
            _ => return Err(Self::unknown_field(name)),
        }
        self.assigned.push(name.to_string());
        Ok(())
    }
}

/// Points at a `Group` by declaration, but holds any model
#[derive(Debug, Default)]
pub struct Pin {
    pub id: Option<ObjectId>,
    pub label: String,
    pub target: Option<ModelHandle>,
}

impl Model for Pin {
    fn model_name() -> &'static str {
        "Pin"
    }

    fn fields() -> Vec<FieldDescriptor> {
        vec![
            FieldDescriptor::primitive("label", PrimitiveType::String),
            FieldDescriptor::model("target", "Group"),
        ]
    }

    fn object_id(&self) -> Option<ObjectId> {
        self.id.clone()
    }

    fn set_object_id(&mut self, id: Option<ObjectId>) {
        self.id = id;
    }

    fn get_field(&self, name: &str) -> ModelResult<Value> {
        match name {
            "label" => Ok(self.label.to_value()),
            "target" => Ok(self.target.to_value()),
            _ => Err(Self::unknown_field(name)),
        }
    }

    fn set_field(&mut self, name: &str, value: Value) -> ModelResult<()> {
        match name {
            "label" => self.label = FromValue::from_value(value)?,
            "target" => self.target = FromValue::from_value(value)?,
            _ => return Err(Self::unknown_field(name)),
        }
        Ok(())
    }
}

/// Groups keyed by role
#[derive(Debug, Default)]
pub struct Roster {
    pub id: Option<ObjectId>,
    pub teams: BTreeMap<String, Handle<Group>>,
}

impl Model for Roster {
    fn model_name() -> &'static str {
        "Roster"
    }

    fn fields() -> Vec<FieldDescriptor> {
        vec![FieldDescriptor::mapping("teams", Element::model("Group"))]
    }

    fn object_id(&self) -> Option<ObjectId> {
        self.id.clone()
    }

    fn set_object_id(&mut self, id: Option<ObjectId>) {
        self.id = id;
    }

    fn get_field(&self, name: &str) -> ModelResult<Value> {
        match name {
            "teams" => Ok(self.teams.to_value()),
            _ => Err(Self::unknown_field(name)),
        }
    }

    fn set_field(&mut self, name: &str, value: Value) -> ModelResult<()> {
        match name {
            "teams" => self.teams = FromValue::from_value(value)?,
            _ => return Err(Self::unknown_field(name)),
        }
        Ok(())
    }
}

/// Registry over an in-memory document store with integer identifiers
pub fn document_registry() -> (Registry, MemoryDocumentStore) {
    init_tracing();
    let store = MemoryDocumentStore::with_id_strategy(IdStrategy::Sequential);
    let registry = Registry::new().with_document_store(Arc::new(store.clone()));
    registry.register::<Group>().expect("register Group");
    registry.register::<Profile>().expect("register Profile");
    registry.register::<User>().expect("register User");
    registry.register::<Node>().expect("register Node");
    registry.register::<Reading>().expect("register Reading");
    registry.register::<Ledger>().expect("register Ledger");
    registry.register::<Pin>().expect("register Pin");
    registry.register::<Roster>().expect("register Roster");
    (registry, store)
}

/// Registry over in-memory relational tables
pub fn relational_registry() -> (Registry, MemoryRelationalStore) {
    init_tracing();
    let store = MemoryRelationalStore::new();
    let registry = Registry::new().with_relational_store(Arc::new(store.clone()));
    registry.register::<Author>().expect("register Author");
    registry.register::<Book>().expect("register Book");
    (registry, store)
}
