//! Error taxonomy shared by the store, schema and relation layers.
//!
//! # Responsibility
//! - Give every relation failure a distinct, matchable kind.
//! - Wrap storage transport errors without losing their source.
//!
//! # Invariants
//! - Errors are returned to the direct caller; nothing here retries.
//! - `Configuration` is only produced while building a schema or store.

use crate::db::DbError;
use crate::model::entity::EntityId;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type MtomResult<T> = Result<T, MtomError>;

/// Errors raised by junction and relation operations.
#[derive(Debug)]
pub enum MtomError {
    /// Malformed junction declaration or relation registration.
    Configuration(String),
    /// Entity type is neither side of the junction.
    NotARelationParticipant {
        junction: &'static str,
        entity: String,
    },
    /// Entity has no id yet.
    EntityNotLoaded { entity: &'static str },
    /// The counterpart argument has the wrong entity type.
    WrongEntityType {
        expected: &'static str,
        actual: &'static str,
    },
    /// Id lookup found no row.
    EntityNotFound { entity: &'static str, id: EntityId },
    /// No junction row matched the given conditions.
    RelationNotFound {
        junction: &'static str,
        conditions: String,
    },
    /// Store-level uniqueness rejected a second row for the same pair.
    DuplicateRelation {
        junction: &'static str,
        left_id: Option<EntityId>,
        right_id: Option<EntityId>,
    },
    /// Field is not declared on the target table.
    UnknownField { table: String, field: String },
    /// Required field was null on save.
    MissingRequiredField { table: String, field: String },
    /// Unique or primary key constraint violation outside junction saves.
    UniqueViolation { table: String, message: String },
    /// Registered table is missing from the connection.
    MissingRequiredTable(String),
    /// Registered column is missing from an existing table.
    MissingRequiredColumn { table: String, column: String },
    /// Persisted or supplied data cannot be converted.
    InvalidData(String),
    Db(DbError),
}

impl MtomError {
    pub(crate) fn not_a_participant(junction: &'static str, entity: &str) -> Self {
        Self::NotARelationParticipant {
            junction,
            entity: entity.to_string(),
        }
    }
}

impl Display for MtomError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Configuration(message) => write!(f, "invalid relation configuration: {message}"),
            Self::NotARelationParticipant { junction, entity } => {
                write!(f, "`{entity}` is not a participant of junction `{junction}`")
            }
            Self::EntityNotLoaded { entity } => {
                write!(f, "`{entity}` entity must be loaded (has no id)")
            }
            Self::WrongEntityType { expected, actual } => {
                write!(f, "entity of wrong type passed: `{expected}` expected, `{actual}` passed")
            }
            Self::EntityNotFound { entity, id } => write!(f, "`{entity}` not found: {id}"),
            Self::RelationNotFound {
                junction,
                conditions,
            } => write!(f, "no `{junction}` row matches {conditions}"),
            Self::DuplicateRelation {
                junction,
                left_id,
                right_id,
            } => write!(
                f,
                "`{junction}` row already exists for pair ({}, {})",
                display_id(*left_id),
                display_id(*right_id)
            ),
            Self::UnknownField { table, field } => {
                write!(f, "field `{field}` is not declared on `{table}`")
            }
            Self::MissingRequiredField { table, field } => {
                write!(f, "field `{field}` on `{table}` must not be null")
            }
            Self::UniqueViolation { table, message } => {
                write!(f, "unique constraint violated on `{table}`: {message}")
            }
            Self::MissingRequiredTable(table) => write!(f, "store requires table `{table}`"),
            Self::MissingRequiredColumn { table, column } => {
                write!(f, "store requires column `{column}` in table `{table}`")
            }
            Self::InvalidData(message) => write!(f, "invalid data: {message}"),
            Self::Db(err) => write!(f, "{err}"),
        }
    }
}

impl Error for MtomError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for MtomError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for MtomError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

fn display_id(id: Option<EntityId>) -> String {
    id.map_or_else(|| "null".to_string(), |value| value.to_string())
}
