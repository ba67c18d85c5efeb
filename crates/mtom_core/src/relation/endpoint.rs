//! Entity-side relation helpers.
//!
//! Any entity type that takes part in a junction implements
//! `RelationEndpoint` and gets `add_relation`, `remove_relation`,
//! `has_relation` and `related` for free.

use crate::error::{MtomError, MtomResult};
use crate::model::entity::{Entity, EntityId, FieldMap};
use crate::relation::junction::{Junction, JunctionRecord};
use crate::schema::Relations;
use crate::store::EntityStore;
use std::borrow::Cow;

/// The counterpart of a relation call: an id or an already loaded entity.
#[derive(Debug, Clone, Copy)]
pub enum OtherRef<'a, O> {
    Id(EntityId),
    Entity(&'a O),
}

impl<O> From<EntityId> for OtherRef<'_, O> {
    fn from(id: EntityId) -> Self {
        Self::Id(id)
    }
}

impl<'a, O> From<&'a O> for OtherRef<'a, O> {
    fn from(entity: &'a O) -> Self {
        Self::Entity(entity)
    }
}

/// Checks that `O` is the counterpart of `Me` in `J`, then resolves `other`.
///
/// Ids are loaded through `store`. Entity references are borrowed as-is,
/// but their id must still name a stored row.
pub fn resolve_other<'a, Me, J, O, S>(store: &S, other: OtherRef<'a, O>) -> MtomResult<Cow<'a, O>>
where
    Me: Entity,
    J: Junction,
    O: Entity,
    S: EntityStore,
{
    let expected = JunctionRecord::<J>::other_entity_type(Me::TYPE_NAME)?;
    if expected != O::TYPE_NAME {
        return Err(MtomError::WrongEntityType {
            expected,
            actual: O::TYPE_NAME,
        });
    }

    match other {
        OtherRef::Id(id) => Ok(Cow::Owned(store.load::<O>(id)?)),
        OtherRef::Entity(entity) => {
            stored_id(store, entity)?;
            Ok(Cow::Borrowed(entity))
        }
    }
}

/// Returns `entity`'s id once the store confirms its row exists.
///
/// # Errors
/// - `EntityNotLoaded` when `entity` has no id.
/// - `EntityNotFound` when no row has that id.
pub fn stored_id<E: Entity, S: EntityStore>(store: &S, entity: &E) -> MtomResult<EntityId> {
    let id = entity.loaded_id()?;
    if store.row_exists(E::TABLE, id)? {
        Ok(id)
    } else {
        Err(MtomError::EntityNotFound {
            entity: E::TYPE_NAME,
            id,
        })
    }
}

/// Relation operations available on every participating entity.
pub trait RelationEndpoint: Entity {
    /// Declares this type's one-to-many pointers to junction rows.
    ///
    /// Called once per schema build. Types that own no junction rows keep
    /// the default.
    fn register_relations(_relations: &mut Relations<'_>) -> MtomResult<()> {
        Ok(())
    }

    /// Links `self` to `other` through `J`, creating the junction row if
    /// missing and then applying `extra`.
    ///
    /// # Errors
    /// - `EntityNotLoaded` when `self` or a referenced `other` has no id.
    /// - `EntityNotFound` when an id, given or carried, has no stored row.
    /// - `NotARelationParticipant` when `Self` is not a side of `J`.
    /// - `WrongEntityType` when `O` is not the counterpart of `Self`.
    fn add_relation<'o, J, O, S>(
        &self,
        store: &S,
        other: impl Into<OtherRef<'o, O>>,
        extra: FieldMap,
    ) -> MtomResult<JunctionRecord<J>>
    where
        J: Junction,
        O: Entity,
        S: EntityStore,
    {
        stored_id(store, self)?;
        let other = resolve_other::<Self, J, O, S>(store, other.into())?;
        JunctionRecord::<J>::upsert_link(store, self, &*other, extra)
    }

    /// Deletes the junction row linking `self` and `other`.
    ///
    /// # Errors
    /// Those of `add_relation`, plus `RelationNotFound` when no row links
    /// the pair.
    fn remove_relation<'o, J, O, S>(
        &self,
        store: &S,
        other: impl Into<OtherRef<'o, O>>,
    ) -> MtomResult<JunctionRecord<J>>
    where
        J: Junction,
        O: Entity,
        S: EntityStore,
    {
        stored_id(store, self)?;
        let other = resolve_other::<Self, J, O, S>(store, other.into())?;
        JunctionRecord::<J>::remove_link(store, self, &*other)
    }

    /// Returns whether a junction row links `self` and `other`.
    fn has_relation<'o, J, O, S>(&self, store: &S, other: impl Into<OtherRef<'o, O>>) -> MtomResult<bool>
    where
        J: Junction,
        O: Entity,
        S: EntityStore,
    {
        stored_id(store, self)?;
        let other = resolve_other::<Self, J, O, S>(store, other.into())?;
        JunctionRecord::<J>::link_exists(store, self, &*other)
    }

    /// Junction rows reachable through a registered pointer, ordered by id.
    ///
    /// `relation_name` defaults to the junction type name.
    fn related<J, S>(&self, store: &S, relation_name: Option<&str>) -> MtomResult<Vec<JunctionRecord<J>>>
    where
        J: Junction,
        S: EntityStore,
    {
        let id = self.loaded_id()?;
        let name = relation_name.unwrap_or(J::TYPE_NAME);
        let relation = store
            .schema()
            .entity(Self::TYPE_NAME)?
            .relation(name)
            .ok_or_else(|| {
                MtomError::Configuration(format!(
                    "`{}` has no relation named `{name}`",
                    Self::TYPE_NAME
                ))
            })?;
        if relation.junction != J::TYPE_NAME {
            return Err(MtomError::Configuration(format!(
                "relation `{name}` of `{}` points at `{}`, not `{}`",
                Self::TYPE_NAME,
                relation.junction,
                J::TYPE_NAME
            )));
        }

        store
            .query_rows(&relation.query_for(id))?
            .into_iter()
            .map(JunctionRecord::<J>::from_row)
            .collect()
    }
}
