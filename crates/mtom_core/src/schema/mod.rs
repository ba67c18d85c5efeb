//! Typed registry of entity types, junction types and their relations.
//!
//! # Responsibility
//! - Validate junction declarations once, before any persistence happens.
//! - Record the one-to-many pointers each entity registers towards its
//!   junction rows, and whether deleting the entity cascades to them.
//!
//! # Invariants
//! - Every junction in a built `Schema` links two distinct registered types.
//! - Both foreign keys of a junction are required fields.
//! - Relation names are unique per owning entity type.
//! - Table and field names are plain identifiers (safe to quote into SQL).

mod relation_spec;

pub use relation_spec::{RelationField, RelationSpec, Side};

use crate::error::{MtomError, MtomResult};
use crate::model::entity::{EntityId, FieldMap, FieldValue, ID_FIELD};
use crate::relation::endpoint::RelationEndpoint;
use crate::relation::junction::{Junction, JunctionRecord};
use crate::store::Query;
use log::{error, info};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

/// Returns whether `value` can be used as a table or column name.
pub fn is_identifier(value: &str) -> bool {
    IDENTIFIER_RE.is_match(value)
}

pub(crate) fn validate_identifier(kind: &str, value: &str) -> MtomResult<()> {
    if is_identifier(value) {
        Ok(())
    } else {
        Err(MtomError::Configuration(format!(
            "{kind} name `{value}` is not a plain identifier"
        )))
    }
}

/// Declared column of a junction table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDef {
    pub name: &'static str,
    pub required: bool,
}

/// Validated junction type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JunctionDef {
    pub spec: RelationSpec,
    pub table: &'static str,
    pub fields: Vec<FieldDef>,
}

impl JunctionDef {
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|field| field.required)
    }
}

/// One-to-many pointer from an entity to its junction rows.
#[derive(Debug, Clone, PartialEq)]
pub struct HasManyDef {
    pub name: String,
    pub junction: &'static str,
    pub junction_table: &'static str,
    /// Junction column holding the owner's id.
    pub their_field: &'static str,
    /// Extra equality filters scoping which rows belong to this pointer.
    pub conditions: FieldMap,
    /// Delete reachable rows before the owner is deleted.
    pub cascade: bool,
}

impl HasManyDef {
    /// Query selecting every junction row owned by `owner_id`.
    pub fn query_for(&self, owner_id: EntityId) -> Query {
        let mut query = Query::new(self.junction_table);
        query.add_condition(self.their_field, owner_id);
        for (field, value) in &self.conditions {
            query.add_condition(field.as_str(), value.clone());
        }
        query
    }
}

/// Registered entity type.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityDef {
    pub type_name: &'static str,
    pub table: &'static str,
    pub relations: Vec<HasManyDef>,
}

impl EntityDef {
    pub fn relation(&self, name: &str) -> Option<&HasManyDef> {
        self.relations.iter().find(|relation| relation.name == name)
    }

    pub fn cascading_relations(&self) -> impl Iterator<Item = &HasManyDef> {
        self.relations.iter().filter(|relation| relation.cascade)
    }
}

/// Options for registering a one-to-many pointer to a junction type.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationOptions {
    /// Pointer name. Defaults to the junction's type name.
    pub name: Option<String>,
    /// Overrides which junction foreign key holds the owner's id.
    pub their_field: Option<&'static str>,
    /// Junction defaults: equality filters applied to traversal and cascade.
    pub conditions: FieldMap,
    /// Install the pre-delete cascade. Defaults to `true`.
    pub cascade: bool,
}

impl Default for RelationOptions {
    fn default() -> Self {
        Self {
            name: None,
            their_field: None,
            conditions: FieldMap::new(),
            cascade: true,
        }
    }
}

impl RelationOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn without_cascade(mut self) -> Self {
        self.cascade = false;
        self
    }

    pub fn with_condition(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.conditions.insert(field.into(), value.into());
        self
    }
}

/// Registrar handed to `RelationEndpoint::register_relations`.
pub struct Relations<'a> {
    owner: &'static str,
    junctions: &'a BTreeMap<&'static str, JunctionDef>,
    defs: Vec<HasManyDef>,
}

impl Relations<'_> {
    /// Entity type the registered pointers start from.
    pub fn owner(&self) -> &'static str {
        self.owner
    }

    /// Declares a one-to-many pointer from the owner to rows of `J`.
    ///
    /// # Errors
    /// - `Configuration` when `J` was not added to the schema builder, the
    ///   owner is not a participant of `J`, `their_field` is not one of the
    ///   junction's foreign keys, a condition names an undeclared field, or
    ///   the name is already taken on this owner.
    pub fn register<J: Junction>(&mut self, options: RelationOptions) -> MtomResult<&HasManyDef> {
        let junction = self.junctions.get(J::TYPE_NAME).ok_or_else(|| {
            MtomError::Configuration(format!(
                "junction type `{}` is not registered; cannot relate `{}` to it",
                J::TYPE_NAME,
                self.owner
            ))
        })?;

        let their_field = match options.their_field {
            Some(field) if junction.spec.side_of_field(field).is_some() => field,
            Some(field) => {
                return Err(MtomError::Configuration(format!(
                    "`{field}` is not a foreign key of junction `{}`",
                    J::TYPE_NAME
                )))
            }
            None => junction
                .spec
                .field_name_for_entity_type(self.owner)
                .map_err(|_| {
                    MtomError::Configuration(format!(
                        "`{}` does not participate in junction `{}`",
                        self.owner,
                        J::TYPE_NAME
                    ))
                })?,
        };

        for field in options.conditions.keys() {
            if junction.field(field).is_none() {
                return Err(MtomError::Configuration(format!(
                    "relation condition field `{field}` is not declared on junction `{}`",
                    J::TYPE_NAME
                )));
            }
        }

        let name = options
            .name
            .unwrap_or_else(|| J::TYPE_NAME.to_string());
        if self.defs.iter().any(|existing| existing.name == name) {
            return Err(MtomError::Configuration(format!(
                "relation `{name}` is already registered on `{}`",
                self.owner
            )));
        }

        let index = self.defs.len();
        self.defs.push(HasManyDef {
            name,
            junction: J::TYPE_NAME,
            junction_table: junction.table,
            their_field,
            conditions: options.conditions,
            cascade: options.cascade,
        });
        Ok(&self.defs[index])
    }
}

type RegisterRelations = fn(&mut Relations<'_>) -> MtomResult<()>;

struct PendingEntity {
    type_name: &'static str,
    table: &'static str,
    register: RegisterRelations,
}

struct PendingJunction {
    type_name: &'static str,
    table: &'static str,
    declared: Vec<RelationField>,
    typed: RelationSpec,
    extra_fields: &'static [&'static str],
}

/// Collects entity and junction types, then validates them together.
#[derive(Default)]
pub struct SchemaBuilder {
    entities: Vec<PendingEntity>,
    junctions: Vec<PendingJunction>,
}

impl SchemaBuilder {
    pub fn entity<E: RelationEndpoint>(mut self) -> Self {
        self.entities.push(PendingEntity {
            type_name: E::TYPE_NAME,
            table: E::TABLE,
            register: E::register_relations,
        });
        self
    }

    pub fn junction<J: Junction>(mut self) -> Self {
        self.junctions.push(PendingJunction {
            type_name: J::TYPE_NAME,
            table: J::TABLE,
            declared: J::relation_fields(),
            typed: JunctionRecord::<J>::spec(),
            extra_fields: J::EXTRA_FIELDS,
        });
        self
    }

    /// Validates every declaration and runs each entity's relation setup.
    pub fn build(self) -> MtomResult<Schema> {
        match self.try_build() {
            Ok(schema) => {
                info!(
                    "event=schema_build module=schema status=ok entities={} junctions={} relations={}",
                    schema.entities.len(),
                    schema.junctions.len(),
                    schema
                        .entities
                        .values()
                        .map(|entity| entity.relations.len())
                        .sum::<usize>()
                );
                Ok(schema)
            }
            Err(err) => {
                error!("event=schema_build module=schema status=error error={err}");
                Err(err)
            }
        }
    }

    fn try_build(self) -> MtomResult<Schema> {
        let mut entities = BTreeMap::new();
        for pending in &self.entities {
            validate_identifier("table", pending.table)?;
            if entities.contains_key(pending.type_name) {
                return Err(MtomError::Configuration(format!(
                    "entity type `{}` is registered twice",
                    pending.type_name
                )));
            }
            entities.insert(
                pending.type_name,
                EntityDef {
                    type_name: pending.type_name,
                    table: pending.table,
                    relations: Vec::new(),
                },
            );
        }

        let mut junctions = BTreeMap::new();
        for pending in &self.junctions {
            let def = build_junction(pending, |name| entities.contains_key(name))?;
            if junctions.insert(pending.type_name, def).is_some() {
                return Err(MtomError::Configuration(format!(
                    "junction type `{}` is registered twice",
                    pending.type_name
                )));
            }
        }

        for pending in &self.entities {
            let mut relations = Relations {
                owner: pending.type_name,
                junctions: &junctions,
                defs: Vec::new(),
            };
            (pending.register)(&mut relations)?;
            if let Some(def) = entities.get_mut(pending.type_name) {
                def.relations = relations.defs;
            }
        }

        Ok(Schema {
            entities,
            junctions,
        })
    }
}

fn build_junction(
    pending: &PendingJunction,
    is_known_entity: impl Fn(&str) -> bool,
) -> MtomResult<JunctionDef> {
    validate_identifier("table", pending.table)?;
    let spec = RelationSpec::validate(pending.type_name, &pending.declared, is_known_entity)?;
    if spec != pending.typed {
        return Err(MtomError::Configuration(format!(
            "junction `{}` declares {:?} but its typed sides are {:?}",
            pending.type_name,
            spec.fields(),
            pending.typed.fields()
        )));
    }

    let mut fields: Vec<FieldDef> = spec
        .fields()
        .iter()
        .map(|declared| FieldDef {
            name: declared.field,
            required: true,
        })
        .collect();
    for &extra in pending.extra_fields {
        validate_identifier("field", extra)?;
        if extra == ID_FIELD || fields.iter().any(|field| field.name == extra) {
            return Err(MtomError::Configuration(format!(
                "junction `{}` declares field `{extra}` twice",
                pending.type_name
            )));
        }
        fields.push(FieldDef {
            name: extra,
            required: false,
        });
    }

    Ok(JunctionDef {
        spec,
        table: pending.table,
        fields,
    })
}

/// Built, immutable registry consulted by stores and relation operations.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    entities: BTreeMap<&'static str, EntityDef>,
    junctions: BTreeMap<&'static str, JunctionDef>,
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    pub fn find_entity(&self, type_name: &str) -> Option<&EntityDef> {
        self.entities.get(type_name)
    }

    pub fn entity(&self, type_name: &str) -> MtomResult<&EntityDef> {
        self.find_entity(type_name).ok_or_else(|| {
            MtomError::Configuration(format!("entity type `{type_name}` is not registered"))
        })
    }

    pub fn junction(&self, type_name: &str) -> MtomResult<&JunctionDef> {
        self.junctions.get(type_name).ok_or_else(|| {
            MtomError::Configuration(format!("junction type `{type_name}` is not registered"))
        })
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityDef> {
        self.entities.values()
    }

    pub fn junctions(&self) -> impl Iterator<Item = &JunctionDef> {
        self.junctions.values()
    }
}

#[cfg(test)]
mod tests {
    use super::{is_identifier, HasManyDef, RelationOptions, Relations};
    use crate::error::{MtomError, MtomResult};
    use crate::school::{school_schema, StudentToLesson, TeacherToLesson};
    use serde_json::json;

    fn register_on(
        owner: &'static str,
        register: impl FnOnce(&mut Relations<'_>) -> MtomResult<()>,
    ) -> MtomResult<Vec<HasManyDef>> {
        let schema = school_schema().expect("school schema should build");
        let mut relations = Relations {
            owner,
            junctions: &schema.junctions,
            defs: Vec::new(),
        };
        register(&mut relations)?;
        Ok(relations.defs)
    }

    fn configuration_message(result: MtomResult<Vec<HasManyDef>>) -> String {
        match result {
            Err(MtomError::Configuration(message)) => message,
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn identifiers_are_plain_words() {
        assert!(is_identifier("student_to_lesson"));
        assert!(is_identifier("_private2"));
        assert!(!is_identifier("2fast"));
        assert!(!is_identifier("students; DROP TABLE x"));
        assert!(!is_identifier(""));
    }

    #[test]
    fn relation_options_default_to_cascading_unnamed_pointer() {
        let options = RelationOptions::default();
        assert!(options.cascade);
        assert!(options.name.is_none());

        let custom = RelationOptions::named("Mentoring")
            .without_cascade()
            .with_condition("note", json!("mentor"));
        assert_eq!(custom.name.as_deref(), Some("Mentoring"));
        assert!(!custom.cascade);
        assert_eq!(custom.conditions.get("note"), Some(&json!("mentor")));
    }

    #[test]
    fn register_returns_created_pointer() {
        let defs = register_on("Lesson", |relations| {
            let def = relations.register::<TeacherToLesson>(RelationOptions::default())?;
            assert_eq!(def.name, "TeacherToLesson");
            assert_eq!(def.junction_table, "teacher_to_lesson");
            assert_eq!(def.their_field, "lesson_id");
            Ok(())
        })
        .expect("registration should succeed");
        assert_eq!(defs.len(), 1);
    }

    #[test]
    fn same_junction_needs_distinct_names() {
        let message = configuration_message(register_on("Lesson", |relations| {
            relations.register::<StudentToLesson>(RelationOptions::default())?;
            relations.register::<StudentToLesson>(RelationOptions::default())?;
            Ok(())
        }));
        assert!(message.contains("already registered"));

        let defs = register_on("Lesson", |relations| {
            relations.register::<StudentToLesson>(RelationOptions::default())?;
            relations.register::<StudentToLesson>(
                RelationOptions::named("Tutoring")
                    .without_cascade()
                    .with_condition("note", "tutoring"),
            )?;
            Ok(())
        })
        .expect("named pointer should register");
        assert_eq!(defs[1].name, "Tutoring");
        assert!(!defs[1].cascade);
        assert_eq!(
            defs[1].query_for(4).describe_conditions(),
            "lesson_id=4, note=\"tutoring\""
        );
    }

    #[test]
    fn their_field_must_be_a_foreign_key() {
        let message = configuration_message(register_on("Student", |relations| {
            let options = RelationOptions {
                their_field: Some("note"),
                ..RelationOptions::default()
            };
            relations.register::<StudentToLesson>(options)?;
            Ok(())
        }));
        assert!(message.contains("not a foreign key"));
    }

    #[test]
    fn conditions_must_name_declared_fields() {
        let message = configuration_message(register_on("Student", |relations| {
            relations
                .register::<StudentToLesson>(RelationOptions::default().with_condition("grade", 1))?;
            Ok(())
        }));
        assert!(message.contains("grade"));
    }

    #[test]
    fn non_participant_owner_is_rejected() {
        let message = configuration_message(register_on("Teacher", |relations| {
            relations.register::<StudentToLesson>(RelationOptions::default())?;
            Ok(())
        }));
        assert!(message.contains("does not participate"));
    }
}
