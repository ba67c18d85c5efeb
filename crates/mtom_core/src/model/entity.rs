//! Entity abstraction for both sides of a many-to-many relation.
//!
//! # Responsibility
//! - Describe what a relation participant must expose: a type name, a table
//!   and an optional row id.
//! - Convert entities to and from flat field maps via serde.
//!
//! # Invariants
//! - An entity is "loaded" iff `id()` returns `Some`.
//! - The `id` key never appears in a `FieldMap`; it travels as `StoredRow::id`.

use crate::error::{MtomError, MtomResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt::Debug;

/// Row identifier shared by all entity tables.
pub type EntityId = i64;

/// Single persisted attribute value.
pub type FieldValue = Value;

/// Attribute values keyed by column name, excluding the row id.
pub type FieldMap = BTreeMap<String, FieldValue>;

/// Column holding the row id in every table.
pub const ID_FIELD: &str = "id";

/// One row as returned by an entity store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub id: EntityId,
    pub fields: FieldMap,
}

/// Capability shared by every persisted entity type.
///
/// Implementors serialize to a flat object whose `id` key mirrors `id()`.
pub trait Entity: Serialize + DeserializeOwned + Clone + Debug + 'static {
    /// Stable type name used in relation declarations and errors.
    const TYPE_NAME: &'static str;
    /// Backing table name.
    const TABLE: &'static str;

    fn id(&self) -> Option<EntityId>;

    fn set_id(&mut self, id: EntityId);

    fn is_loaded(&self) -> bool {
        self.id().is_some()
    }

    /// Returns the id or `EntityNotLoaded`.
    fn loaded_id(&self) -> MtomResult<EntityId> {
        self.id().ok_or(MtomError::EntityNotLoaded {
            entity: Self::TYPE_NAME,
        })
    }
}

/// Serializes an entity into its persisted attribute map.
pub fn entity_to_fields<E: Entity>(entity: &E) -> MtomResult<FieldMap> {
    let value = serde_json::to_value(entity).map_err(|err| {
        MtomError::InvalidData(format!("cannot serialize `{}`: {err}", E::TYPE_NAME))
    })?;

    match value {
        Value::Object(map) => Ok(map
            .into_iter()
            .filter(|(key, _)| key != ID_FIELD)
            .collect()),
        other => Err(MtomError::InvalidData(format!(
            "`{}` must serialize to an object, got `{other}`",
            E::TYPE_NAME
        ))),
    }
}

/// Rebuilds an entity from a stored row.
pub fn entity_from_row<E: Entity>(row: StoredRow) -> MtomResult<E> {
    let mut map: Map<String, Value> = row.fields.into_iter().collect();
    map.insert(ID_FIELD.to_string(), Value::from(row.id));

    serde_json::from_value(Value::Object(map)).map_err(|err| {
        MtomError::InvalidData(format!(
            "row {} of `{}` does not match `{}`: {err}",
            row.id,
            E::TABLE,
            E::TYPE_NAME
        ))
    })
}
