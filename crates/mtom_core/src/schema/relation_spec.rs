//! Two-sided relation declaration for one junction type.

use crate::error::{MtomError, MtomResult};
use crate::schema::validate_identifier;

/// One declared `(foreign key field -> entity type)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationField {
    pub field: &'static str,
    pub entity: &'static str,
}

impl RelationField {
    pub const fn new(field: &'static str, entity: &'static str) -> Self {
        Self { field, entity }
    }
}

/// Participant role inside a junction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn other(self) -> Self {
        match self {
            Self::Left => Self::Right,
            Self::Right => Self::Left,
        }
    }
}

/// Exactly two relation fields of a junction type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationSpec {
    junction: &'static str,
    left: RelationField,
    right: RelationField,
}

impl RelationSpec {
    /// Builds a spec without validation. Used for typed junction declarations
    /// whose shape is checked once by `SchemaBuilder::build`.
    pub const fn from_sides(
        junction: &'static str,
        left: RelationField,
        right: RelationField,
    ) -> Self {
        Self {
            junction,
            left,
            right,
        }
    }

    /// Validates a declared field list.
    ///
    /// # Errors
    /// - `Configuration` when the list does not hold exactly two entries.
    /// - `Configuration` when an entity type is not known, a field name is not
    ///   a plain identifier, or both entries share a field or entity type.
    pub fn validate(
        junction: &'static str,
        fields: &[RelationField],
        is_known_entity: impl Fn(&str) -> bool,
    ) -> MtomResult<Self> {
        let &[left, right] = fields else {
            return Err(MtomError::Configuration(format!(
                "junction `{junction}` must declare exactly 2 relation fields, got {}",
                fields.len()
            )));
        };

        for declared in [left, right] {
            validate_identifier("field", declared.field)?;
            if !is_known_entity(declared.entity) {
                return Err(MtomError::Configuration(format!(
                    "junction `{junction}` field `{}` references unknown entity type `{}`",
                    declared.field, declared.entity
                )));
            }
        }

        if left.field == right.field {
            return Err(MtomError::Configuration(format!(
                "junction `{junction}` declares field `{}` twice",
                left.field
            )));
        }
        if left.entity == right.entity {
            return Err(MtomError::Configuration(format!(
                "junction `{junction}` links `{}` to itself; both sides must differ",
                left.entity
            )));
        }

        Ok(Self::from_sides(junction, left, right))
    }

    pub fn junction(&self) -> &'static str {
        self.junction
    }

    pub fn side(&self, side: Side) -> RelationField {
        match side {
            Side::Left => self.left,
            Side::Right => self.right,
        }
    }

    pub fn field(&self, side: Side) -> &'static str {
        self.side(side).field
    }

    pub fn entity(&self, side: Side) -> &'static str {
        self.side(side).entity
    }

    pub fn fields(&self) -> [RelationField; 2] {
        [self.left, self.right]
    }

    /// Side occupied by `entity_type`.
    pub fn side_of(&self, entity_type: &str) -> MtomResult<Side> {
        if self.left.entity == entity_type {
            Ok(Side::Left)
        } else if self.right.entity == entity_type {
            Ok(Side::Right)
        } else {
            Err(MtomError::not_a_participant(self.junction, entity_type))
        }
    }

    /// Side whose foreign key column is `field`.
    pub fn side_of_field(&self, field: &str) -> Option<Side> {
        if self.left.field == field {
            Some(Side::Left)
        } else if self.right.field == field {
            Some(Side::Right)
        } else {
            None
        }
    }

    pub fn field_name_for_entity_type(&self, entity_type: &str) -> MtomResult<&'static str> {
        Ok(self.field(self.side_of(entity_type)?))
    }

    pub fn other_entity_type(&self, entity_type: &str) -> MtomResult<&'static str> {
        Ok(self.entity(self.side_of(entity_type)?.other()))
    }
}

#[cfg(test)]
mod tests {
    use super::{RelationField, RelationSpec, Side};
    use crate::error::MtomError;

    const STUDENT: RelationField = RelationField::new("student_id", "Student");
    const LESSON: RelationField = RelationField::new("lesson_id", "Lesson");

    fn known(name: &str) -> bool {
        matches!(name, "Student" | "Lesson")
    }

    #[test]
    fn resolves_fields_and_counterparts() {
        let spec = RelationSpec::validate("StudentToLesson", &[STUDENT, LESSON], known).unwrap();
        assert_eq!(spec.field_name_for_entity_type("Student").unwrap(), "student_id");
        assert_eq!(spec.field_name_for_entity_type("Lesson").unwrap(), "lesson_id");
        assert_eq!(spec.other_entity_type("Student").unwrap(), "Lesson");
        assert_eq!(spec.other_entity_type("Lesson").unwrap(), "Student");
        assert_eq!(spec.side_of_field("lesson_id"), Some(Side::Right));
    }

    #[test]
    fn foreign_type_is_not_a_participant() {
        let spec = RelationSpec::validate("StudentToLesson", &[STUDENT, LESSON], known).unwrap();
        let err = spec.other_entity_type("Teacher").unwrap_err();
        assert!(matches!(
            err,
            MtomError::NotARelationParticipant { entity, .. } if entity == "Teacher"
        ));
    }

    #[test]
    fn rejects_wrong_entry_counts() {
        for fields in [&[STUDENT][..], &[STUDENT, LESSON, STUDENT][..], &[][..]] {
            let err = RelationSpec::validate("Broken", fields, known).unwrap_err();
            assert!(matches!(err, MtomError::Configuration(_)));
        }
    }

    #[test]
    fn rejects_unknown_entity_and_self_links() {
        let unknown = RelationField::new("ghost_id", "Ghost");
        assert!(RelationSpec::validate("Broken", &[STUDENT, unknown], known).is_err());

        let again = RelationField::new("other_student_id", "Student");
        let err = RelationSpec::validate("Broken", &[STUDENT, again], known).unwrap_err();
        assert!(err.to_string().contains("itself"));
    }

    #[test]
    fn rejects_non_identifier_fields() {
        let bad = RelationField::new("lesson id; --", "Lesson");
        assert!(RelationSpec::validate("Broken", &[STUDENT, bad], known).is_err());
    }
}
