//! # elif-odm: Object-Document Mapping for elif.rs
//!
//! Persists graphs of Rust objects to document stores and relational
//! databases. Models describe their fields once; the serializer flattens
//! instances into state records with nested objects stored as references
//! (`{"_id", "_type"}`), and restores them back into shared instance graphs,
//! fetching each referenced record once per call and closing cycles on the
//! instance already being built.
//!
//! ```ignore
//! let registry = Registry::connect(&OdmConfig::testing()).await?;
//!
//! let admins = Handle::new(Group::named("admins"));
//! admins.save(&registry).await?;
//!
//! let user = Handle::new(User::named("ada"));
//! user.write().groups.push(admins.clone());
//! let id = user.save(&registry).await?;
//!
//! let restored = User::get(&registry, &id).await?;
//! ```

pub mod backends;
pub mod config;
pub mod error;
pub mod fields;
pub mod manager;
pub mod model;
pub mod object_id;
pub mod registry;
pub mod schema;
pub mod serializer;
pub mod state;
pub mod value;

// Re-export core traits and types
pub use backends::*;
pub use config::*;
pub use error::*;
pub use fields::*;
pub use manager::*;
pub use model::*;
pub use object_id::*;
pub use registry::*;
pub use schema::*;
pub use serializer::*;
pub use state::*;
pub use value::*;

/// Everything a model definition and its callers need
pub mod prelude {
    pub use crate::config::OdmConfig;
    pub use crate::error::{ModelError, ModelResult};
    pub use crate::fields::{Element, FieldDescriptor, PrimitiveType};
    pub use crate::model::{Handle, Model, ModelExt, ModelHandle};
    pub use crate::object_id::ObjectId;
    pub use crate::registry::Registry;
    pub use crate::state::{Filter, StateRecord};
    pub use crate::value::{FromValue, ToValue, Value};
}
