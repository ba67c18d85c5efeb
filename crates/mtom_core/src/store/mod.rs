//! Entity store contracts consumed by the relation layer.
//!
//! # Responsibility
//! - Define the load/save/delete/query primitives junction operations use.
//! - Provide typed entity helpers on top of row-level primitives.
//! - Run the pre-delete cascade from the entity delete path.
//!
//! # Invariants
//! - `delete` removes owned junction rows before the owner row, in the same
//!   transaction when the store supports one.
//! - `save` on an entity without id inserts and assigns the new id.

pub mod cascade;
mod sqlite_store;

pub use sqlite_store::SqliteEntityStore;

use crate::error::{MtomError, MtomResult};
use crate::model::entity::{
    entity_from_row, entity_to_fields, Entity, EntityId, FieldMap, FieldValue, StoredRow,
};
use crate::schema::Schema;

/// Equality filter on one column.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: String,
    pub value: FieldValue,
}

/// Conjunctive equality query over one table, ordered by id.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table: String,
    pub conditions: Vec<Condition>,
    pub limit: Option<u32>,
}

impl Query {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            conditions: Vec::new(),
            limit: None,
        }
    }

    pub fn add_condition(
        &mut self,
        field: impl Into<String>,
        value: impl Into<FieldValue>,
    ) -> &mut Self {
        self.conditions.push(Condition {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Renders conditions as `a=1, b=2` for error messages.
    pub fn describe_conditions(&self) -> String {
        if self.conditions.is_empty() {
            return "no conditions".to_string();
        }
        self.conditions
            .iter()
            .map(|condition| format!("{}={}", condition.field, condition.value))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Persistence collaborator for entities and junction rows.
pub trait EntityStore {
    /// Schema the store was built against.
    fn schema(&self) -> &Schema;

    fn load_row(&self, table: &str, id: EntityId) -> MtomResult<Option<StoredRow>>;

    fn query_rows(&self, query: &Query) -> MtomResult<Vec<StoredRow>>;

    /// Inserts one row, with an explicit id when given, and returns its id.
    fn insert_row(&self, table: &str, id: Option<EntityId>, fields: &FieldMap)
        -> MtomResult<EntityId>;

    /// Updates one row; returns `false` when no row has `id`.
    fn update_row(&self, table: &str, id: EntityId, fields: &FieldMap) -> MtomResult<bool>;

    /// Deletes one row; returns `false` when no row has `id`.
    fn delete_row(&self, table: &str, id: EntityId) -> MtomResult<bool>;

    fn row_exists(&self, table: &str, id: EntityId) -> MtomResult<bool> {
        Ok(self.load_row(table, id)?.is_some())
    }

    /// Runs `work` atomically where the backend supports it.
    fn in_transaction<T, F>(&self, work: F) -> MtomResult<T>
    where
        Self: Sized,
        F: FnOnce(&Self) -> MtomResult<T>,
    {
        work(self)
    }

    fn try_load<E: Entity>(&self, id: EntityId) -> MtomResult<Option<E>>
    where
        Self: Sized,
    {
        self.load_row(E::TABLE, id)?
            .map(entity_from_row::<E>)
            .transpose()
    }

    fn load<E: Entity>(&self, id: EntityId) -> MtomResult<E>
    where
        Self: Sized,
    {
        self.try_load(id)?.ok_or(MtomError::EntityNotFound {
            entity: E::TYPE_NAME,
            id,
        })
    }

    /// Inserts or updates `entity`, assigning its id on insert.
    fn save<E: Entity>(&self, entity: &mut E) -> MtomResult<()>
    where
        Self: Sized,
    {
        let fields = entity_to_fields(entity)?;
        if let Some(id) = entity.id() {
            if self.update_row(E::TABLE, id, &fields)? {
                return Ok(());
            }
        }

        let id = self.insert_row(E::TABLE, entity.id(), &fields)?;
        entity.set_id(id);
        Ok(())
    }

    /// Deletes `entity` after cascading to its owned junction rows.
    fn delete<E: Entity>(&self, entity: &E) -> MtomResult<()>
    where
        Self: Sized,
    {
        let id = entity.loaded_id()?;
        self.in_transaction(|store| {
            cascade::before_delete(store, E::TYPE_NAME, id)?;
            if store.delete_row(E::TABLE, id)? {
                Ok(())
            } else {
                Err(MtomError::EntityNotFound {
                    entity: E::TYPE_NAME,
                    id,
                })
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::Query;

    #[test]
    fn describes_conditions_in_insertion_order() {
        let mut query = Query::new("student_to_lesson");
        query
            .add_condition("student_id", 1)
            .add_condition("lesson_id", 2);
        assert_eq!(query.describe_conditions(), "student_id=1, lesson_id=2");
        assert_eq!(Query::new("x").describe_conditions(), "no conditions");
    }
}
