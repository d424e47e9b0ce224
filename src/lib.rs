//! Versioned SQLite database handle for the Runar ecosystem.
//!
//! # Intention
//!
//! - Open or create a database file stamped with a schema version.
//! - Keep key/value metadata in the `self` meta table.
//! - Offer small helpers for table creation and bulk row retrieval.
//!
//! # Architectural Boundaries
//!
//! - Only SQLite/database code belongs here.
//! - No business logic: callers decide which tables and fields exist.

pub mod config;
pub mod error;
pub mod schema;
pub mod service;
pub mod sqlite;
pub mod value;

pub use config::{DatabaseConfig, JournalMode};
pub use error::{Error, Result};
pub use schema::{ColumnDefinition, DataType, Schema, TableDefinition};
pub use service::{Lifecycle, MetaStoreService};
pub use sqlite::{Database, TableDict, META_TABLE, VERSION_KEY};
pub use value::{Row, Value};
