//! Junction records: one row of a many-to-many link table.
//!
//! # Responsibility
//! - Hold the two foreign keys, declared extra fields and the transient
//!   cache of both resolved entities.
//! - Implement the upsert-link, remove-link and existence-check protocols.
//!
//! # Invariants
//! - Both foreign keys must be set before a row is saved.
//! - Changing a foreign key drops the cached entity for that side.
//! - Link lookups filter by both ids, so argument order never matters.
//! - The cache is never persisted.

use crate::error::{MtomError, MtomResult};
use crate::model::entity::{Entity, EntityId, FieldMap, FieldValue, StoredRow, ID_FIELD};
use crate::schema::{RelationField, RelationSpec, Side};
use crate::store::{EntityStore, Query};
use log::info;
use std::any::Any;
use std::fmt::{Debug, Formatter};
use std::marker::PhantomData;

/// Declaration of a junction type linking `Left` and `Right`.
///
/// ```ignore
/// impl Junction for StudentToLesson {
///     type Left = Student;
///     type Right = Lesson;
///     const TYPE_NAME: &'static str = "StudentToLesson";
///     const TABLE: &'static str = "student_to_lesson";
///     const LEFT_FIELD: &'static str = "student_id";
///     const RIGHT_FIELD: &'static str = "lesson_id";
/// }
/// ```
pub trait Junction: 'static {
    type Left: Entity;
    type Right: Entity;

    const TYPE_NAME: &'static str;
    const TABLE: &'static str;
    const LEFT_FIELD: &'static str;
    const RIGHT_FIELD: &'static str;
    /// Optional attribute columns callers may set when linking.
    const EXTRA_FIELDS: &'static [&'static str] = &[];

    /// Declared `(field -> entity type)` pairs, checked at schema build.
    fn relation_fields() -> Vec<RelationField> {
        vec![
            RelationField::new(Self::LEFT_FIELD, <Self::Left as Entity>::TYPE_NAME),
            RelationField::new(Self::RIGHT_FIELD, <Self::Right as Entity>::TYPE_NAME),
        ]
    }
}

/// One junction row plus its resolved-entity cache.
pub struct JunctionRecord<J: Junction> {
    id: Option<EntityId>,
    left_id: Option<EntityId>,
    right_id: Option<EntityId>,
    extra: FieldMap,
    cached_left: Option<J::Left>,
    cached_right: Option<J::Right>,
}

impl<J: Junction> Default for JunctionRecord<J> {
    fn default() -> Self {
        Self {
            id: None,
            left_id: None,
            right_id: None,
            extra: FieldMap::new(),
            cached_left: None,
            cached_right: None,
        }
    }
}

impl<J: Junction> Clone for JunctionRecord<J> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            left_id: self.left_id,
            right_id: self.right_id,
            extra: self.extra.clone(),
            cached_left: self.cached_left.clone(),
            cached_right: self.cached_right.clone(),
        }
    }
}

impl<J: Junction> Debug for JunctionRecord<J> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JunctionRecord")
            .field("junction", &J::TYPE_NAME)
            .field("id", &self.id)
            .field(J::LEFT_FIELD, &self.left_id)
            .field(J::RIGHT_FIELD, &self.right_id)
            .field("extra", &self.extra)
            .finish_non_exhaustive()
    }
}

impl<J: Junction> JunctionRecord<J> {
    /// Creates an unsaved record with nothing resolved.
    pub fn new() -> Self {
        Self::default()
    }

    /// Relation spec derived from the typed declaration.
    pub fn spec() -> RelationSpec {
        RelationSpec::from_sides(
            J::TYPE_NAME,
            RelationField::new(J::LEFT_FIELD, <J::Left as Entity>::TYPE_NAME),
            RelationField::new(J::RIGHT_FIELD, <J::Right as Entity>::TYPE_NAME),
        )
    }

    pub fn field_name_for_entity_type(entity_type: &str) -> MtomResult<&'static str> {
        Self::spec().field_name_for_entity_type(entity_type)
    }

    pub fn other_entity_type(entity_type: &str) -> MtomResult<&'static str> {
        Self::spec().other_entity_type(entity_type)
    }

    /// Starts a query over this junction's table.
    pub fn query() -> JunctionQuery<J> {
        JunctionQuery::new()
    }

    pub fn id(&self) -> Option<EntityId> {
        self.id
    }

    pub fn is_loaded(&self) -> bool {
        self.id.is_some()
    }

    pub fn foreign_key(&self, side: Side) -> Option<EntityId> {
        match side {
            Side::Left => self.left_id,
            Side::Right => self.right_id,
        }
    }

    pub fn left_id(&self) -> Option<EntityId> {
        self.left_id
    }

    pub fn right_id(&self) -> Option<EntityId> {
        self.right_id
    }

    pub fn set_foreign_key(&mut self, side: Side, id: EntityId) {
        match side {
            Side::Left => {
                if self.left_id != Some(id) {
                    self.cached_left = None;
                }
                self.left_id = Some(id);
            }
            Side::Right => {
                if self.right_id != Some(id) {
                    self.cached_right = None;
                }
                self.right_id = Some(id);
            }
        }
    }

    /// Points the foreign key of `E`'s side at `entity`.
    pub fn set_foreign_key_for<E: Entity>(&mut self, entity: &E) -> MtomResult<()> {
        let side = Self::spec().side_of(E::TYPE_NAME)?;
        self.set_foreign_key(side, entity.loaded_id()?);
        Ok(())
    }

    /// Reads a foreign key or extra field.
    pub fn get(&self, field: &str) -> Option<FieldValue> {
        match Self::spec().side_of_field(field) {
            Some(side) => self.foreign_key(side).map(FieldValue::from),
            None => self.extra.get(field).cloned(),
        }
    }

    /// Writes a foreign key or declared extra field.
    pub fn set(&mut self, field: &str, value: impl Into<FieldValue>) -> MtomResult<()> {
        let value = value.into();
        if let Some(side) = Self::spec().side_of_field(field) {
            let id = value.as_i64().ok_or_else(|| {
                MtomError::InvalidData(format!(
                    "foreign key `{field}` of `{}` must be an integer id, got `{value}`",
                    J::TYPE_NAME
                ))
            })?;
            self.set_foreign_key(side, id);
            return Ok(());
        }

        if !J::EXTRA_FIELDS.iter().any(|extra| *extra == field) {
            return Err(MtomError::UnknownField {
                table: J::TABLE.to_string(),
                field: field.to_string(),
            });
        }
        self.extra.insert(field.to_string(), value);
        Ok(())
    }

    pub fn extra_fields(&self) -> &FieldMap {
        &self.extra
    }

    /// Stores `entity` in the cache slot of its side. Last write wins.
    pub fn cache_resolved_entity<E: Entity>(&mut self, entity: E) -> MtomResult<()> {
        let side = Self::spec().side_of(E::TYPE_NAME)?;
        let slot = self
            .cache_slot_mut::<E>(side)
            .ok_or_else(|| MtomError::not_a_participant(J::TYPE_NAME, E::TYPE_NAME))?;
        *slot = Some(entity);
        Ok(())
    }

    /// Cached entity of type `E`, without touching the store.
    pub fn cached<E: Entity>(&self) -> Option<&E> {
        let side = Self::spec().side_of(E::TYPE_NAME).ok()?;
        let slot: &dyn Any = match side {
            Side::Left => &self.cached_left,
            Side::Right => &self.cached_right,
        };
        slot.downcast_ref::<Option<E>>()?.as_ref()
    }

    /// Returns the linked entity of type `E`, loading it on first access.
    ///
    /// # Errors
    /// - `NotARelationParticipant` when `E` is neither side.
    /// - `MissingRequiredField` when the side's foreign key is unset.
    /// - `EntityNotFound` when the foreign key does not resolve.
    pub fn resolved_entity<E: Entity, S: EntityStore>(&mut self, store: &S) -> MtomResult<&E> {
        let side = Self::spec().side_of(E::TYPE_NAME)?;
        let foreign_key = self.foreign_key(side);
        let slot = self
            .cache_slot_mut::<E>(side)
            .ok_or_else(|| MtomError::not_a_participant(J::TYPE_NAME, E::TYPE_NAME))?;

        if slot.is_none() {
            let id = foreign_key.ok_or_else(|| MtomError::MissingRequiredField {
                table: J::TABLE.to_string(),
                field: Self::spec().field(side).to_string(),
            })?;
            *slot = Some(store.load::<E>(id)?);
        }

        slot.as_ref()
            .ok_or_else(|| MtomError::not_a_participant(J::TYPE_NAME, E::TYPE_NAME))
    }

    pub fn left<S: EntityStore>(&mut self, store: &S) -> MtomResult<&J::Left> {
        self.resolved_entity::<J::Left, S>(store)
    }

    pub fn right<S: EntityStore>(&mut self, store: &S) -> MtomResult<&J::Right> {
        self.resolved_entity::<J::Right, S>(store)
    }

    /// Inserts or updates this row.
    ///
    /// # Errors
    /// - `Configuration` when `J` is not part of the store's schema.
    /// - `MissingRequiredField` when a foreign key is unset.
    /// - `DuplicateRelation` when the store rejects the pair as a duplicate.
    pub fn save<S: EntityStore>(&mut self, store: &S) -> MtomResult<()> {
        let def = store.schema().junction(J::TYPE_NAME)?;
        let fields = self.to_fields();
        for required in def.required_fields() {
            if fields.get(required.name).map_or(true, FieldValue::is_null) {
                return Err(MtomError::MissingRequiredField {
                    table: J::TABLE.to_string(),
                    field: required.name.to_string(),
                });
            }
        }

        let saved = match self.id {
            Some(id) => match store.update_row(J::TABLE, id, &fields) {
                Ok(true) => Ok(id),
                Ok(false) => store.insert_row(J::TABLE, Some(id), &fields),
                Err(err) => Err(err),
            },
            None => store.insert_row(J::TABLE, None, &fields),
        };

        match saved {
            Ok(id) => {
                self.id = Some(id);
                Ok(())
            }
            Err(MtomError::UniqueViolation { .. }) => Err(MtomError::DuplicateRelation {
                junction: J::TYPE_NAME,
                left_id: self.left_id,
                right_id: self.right_id,
            }),
            Err(err) => Err(err),
        }
    }

    /// Deletes this row. The in-memory record stays populated.
    pub fn delete<S: EntityStore>(&self, store: &S) -> MtomResult<()> {
        let id = self.id.ok_or(MtomError::EntityNotLoaded {
            entity: J::TYPE_NAME,
        })?;
        if store.delete_row(J::TABLE, id)? {
            Ok(())
        } else {
            Err(MtomError::RelationNotFound {
                junction: J::TYPE_NAME,
                conditions: format!("{ID_FIELD}={id}"),
            })
        }
    }

    /// Finds the row linking `a` and `b` or creates it, then applies `extra`.
    ///
    /// Runs inside one store transaction. The returned record has both
    /// entities cached.
    ///
    /// # Errors
    /// - `UnknownField` when `extra` names a foreign key or an undeclared column.
    pub fn upsert_link<A, B, S>(store: &S, a: &A, b: &B, extra: FieldMap) -> MtomResult<Self>
    where
        A: Entity,
        B: Entity,
        S: EntityStore,
    {
        let query = Self::pair_query(a, b)?;
        // Keys come from `a` and `b` only.
        if let Some(field) = extra
            .keys()
            .find(|field| !J::EXTRA_FIELDS.iter().any(|extra| *extra == field.as_str()))
        {
            return Err(MtomError::UnknownField {
                table: J::TABLE.to_string(),
                field: field.clone(),
            });
        }
        let mut record = store.in_transaction(|store| {
            let existing = query.try_load_first(store)?;
            let path = if existing.is_some() { "update" } else { "insert" };
            let mut record = existing.unwrap_or_default();
            record.set_foreign_key_for(a)?;
            record.set_foreign_key_for(b)?;
            for (field, value) in extra {
                record.set(&field, value)?;
            }
            record.save(store)?;
            info!(
                "event=relation_link module=relation status=ok junction={} path={path} conditions=[{}]",
                J::TYPE_NAME,
                query.as_query().describe_conditions()
            );
            Ok(record)
        })?;

        record.cache_resolved_entity(a.clone())?;
        record.cache_resolved_entity(b.clone())?;
        Ok(record)
    }

    /// Deletes the row linking `a` and `b`.
    ///
    /// # Errors
    /// - `RelationNotFound` when no such row exists.
    pub fn remove_link<A, B, S>(store: &S, a: &A, b: &B) -> MtomResult<Self>
    where
        A: Entity,
        B: Entity,
        S: EntityStore,
    {
        let query = Self::pair_query(a, b)?;
        let record = store.in_transaction(|store| {
            let record = query.load_first(store)?;
            record.delete(store)?;
            Ok(record)
        })?;

        info!(
            "event=relation_unlink module=relation status=ok junction={} conditions=[{}]",
            J::TYPE_NAME,
            query.as_query().describe_conditions()
        );
        Ok(record)
    }

    /// Returns whether a row links `a` and `b`. Never mutates.
    pub fn link_exists<A, B, S>(store: &S, a: &A, b: &B) -> MtomResult<bool>
    where
        A: Entity,
        B: Entity,
        S: EntityStore,
    {
        Ok(Self::pair_query(a, b)?.try_load_first(store)?.is_some())
    }

    fn pair_query<A: Entity, B: Entity>(a: &A, b: &B) -> MtomResult<JunctionQuery<J>> {
        if A::TYPE_NAME == B::TYPE_NAME {
            return Err(MtomError::WrongEntityType {
                expected: Self::other_entity_type(A::TYPE_NAME)?,
                actual: B::TYPE_NAME,
            });
        }

        let mut query = Self::query();
        query.add_condition_for_entity(a)?.add_condition_for_entity(b)?;
        Ok(query)
    }

    pub(crate) fn from_row(row: StoredRow) -> MtomResult<Self> {
        let mut record = Self::new();
        record.id = Some(row.id);
        for (field, value) in row.fields {
            match Self::spec().side_of_field(&field) {
                Some(side) => {
                    let id = value.as_i64().ok_or_else(|| {
                        MtomError::InvalidData(format!(
                            "row {} of `{}` has non-integer `{field}` value `{value}`",
                            row.id,
                            J::TABLE
                        ))
                    })?;
                    record.set_foreign_key(side, id);
                }
                None => {
                    record.extra.insert(field, value);
                }
            }
        }
        Ok(record)
    }

    fn to_fields(&self) -> FieldMap {
        let mut fields = self.extra.clone();
        fields.insert(
            J::LEFT_FIELD.to_string(),
            self.left_id.map_or(FieldValue::Null, FieldValue::from),
        );
        fields.insert(
            J::RIGHT_FIELD.to_string(),
            self.right_id.map_or(FieldValue::Null, FieldValue::from),
        );
        fields
    }

    fn cache_slot_mut<E: Entity>(&mut self, side: Side) -> Option<&mut Option<E>> {
        let slot: &mut dyn Any = match side {
            Side::Left => &mut self.cached_left,
            Side::Right => &mut self.cached_right,
        };
        slot.downcast_mut::<Option<E>>()
    }
}

/// Equality query over rows of junction `J`.
pub struct JunctionQuery<J: Junction> {
    query: Query,
    _junction: PhantomData<fn() -> J>,
}

impl<J: Junction> Default for JunctionQuery<J> {
    fn default() -> Self {
        Self::new()
    }
}

impl<J: Junction> JunctionQuery<J> {
    pub fn new() -> Self {
        Self {
            query: Query::new(J::TABLE),
            _junction: PhantomData,
        }
    }

    /// Filters on `entity`'s foreign key, e.g. `student_id = 5`.
    ///
    /// # Errors
    /// - `NotARelationParticipant` when `E` is neither side.
    /// - `EntityNotLoaded` when `entity` has no id.
    pub fn add_condition_for_entity<E: Entity>(&mut self, entity: &E) -> MtomResult<&mut Self> {
        let field = JunctionRecord::<J>::field_name_for_entity_type(E::TYPE_NAME)?;
        let id = entity.loaded_id()?;
        self.query.add_condition(field, id);
        Ok(self)
    }

    /// Filters on any declared column of the junction.
    pub fn add_condition(
        &mut self,
        field: &str,
        value: impl Into<FieldValue>,
    ) -> MtomResult<&mut Self> {
        let declared = field == ID_FIELD
            || field == J::LEFT_FIELD
            || field == J::RIGHT_FIELD
            || J::EXTRA_FIELDS.iter().any(|extra| *extra == field);
        if !declared {
            return Err(MtomError::UnknownField {
                table: J::TABLE.to_string(),
                field: field.to_string(),
            });
        }

        self.query.add_condition(field, value);
        Ok(self)
    }

    pub fn as_query(&self) -> &Query {
        &self.query
    }

    pub fn try_load_first<S: EntityStore>(&self, store: &S) -> MtomResult<Option<JunctionRecord<J>>> {
        let first = self.query.clone().with_limit(1);
        store
            .query_rows(&first)?
            .into_iter()
            .next()
            .map(JunctionRecord::<J>::from_row)
            .transpose()
    }

    /// Like `try_load_first`, but zero matches is `RelationNotFound`.
    pub fn load_first<S: EntityStore>(&self, store: &S) -> MtomResult<JunctionRecord<J>> {
        self.try_load_first(store)?
            .ok_or_else(|| MtomError::RelationNotFound {
                junction: J::TYPE_NAME,
                conditions: self.query.describe_conditions(),
            })
    }

    pub fn load_all<S: EntityStore>(&self, store: &S) -> MtomResult<Vec<JunctionRecord<J>>> {
        store
            .query_rows(&self.query)?
            .into_iter()
            .map(JunctionRecord::<J>::from_row)
            .collect()
    }
}
