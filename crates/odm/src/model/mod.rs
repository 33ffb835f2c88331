//! Model System - Core trait, shared handles and persistence operations
//!
//! The model system is split into focused modules:
//! - `core_trait`: the `Model` trait user types implement
//! - `handle`: typed and type-erased shared instances
//! - `operations`: save, restore, delete and lookup built on the registry

pub mod core_trait;
pub mod handle;
pub mod operations;

pub use core_trait::Model;
pub use handle::{Handle, ModelHandle};
pub use operations::ModelExt;
