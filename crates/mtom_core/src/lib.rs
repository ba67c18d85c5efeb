//! Many-to-many relations through explicit junction records.
//!
//! Entities on both sides implement `RelationEndpoint`; each junction type
//! implements `Junction`. A `Schema` validates the declarations, and an
//! `EntityStore` (SQLite by default) persists rows and runs cascade deletes.

pub mod db;
pub mod error;
pub mod logging;
pub mod model;
pub mod relation;
pub mod schema;
pub mod school;
pub mod store;

pub use db::{open_db, open_db_in_memory, DbError, DbResult};
pub use error::{MtomError, MtomResult};
pub use logging::{default_log_level, init_logging, logging_status, LoggingConfig};
pub use model::entity::{Entity, EntityId, FieldMap, FieldValue, StoredRow};
pub use relation::endpoint::{OtherRef, RelationEndpoint};
pub use relation::junction::{Junction, JunctionQuery, JunctionRecord};
pub use schema::{
    HasManyDef, RelationField, RelationOptions, RelationSpec, Relations, Schema, SchemaBuilder,
    Side,
};
pub use store::{EntityStore, Query, SqliteEntityStore};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
