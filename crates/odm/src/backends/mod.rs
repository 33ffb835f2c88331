//! Storage drivers behind the document and relational managers

pub mod memory;
pub mod postgres;

pub use memory::{
    MemoryCollection, MemoryDocumentStore, MemoryRelationalStore, MemoryTable, OperationStats,
};
pub use postgres::{PgStore, PgTable, SqlStatements, Statement};
