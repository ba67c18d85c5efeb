//! Reference domain: students and teachers linked to lessons.
//!
//! # Responsibility
//! - Provide concrete entity and junction types wired through the generic
//!   relation layer.
//! - Offer typed helpers so callers never spell out junction generics.
//!
//! # Invariants
//! - `Lesson` owns both junctions; deleting a lesson drops its student and
//!   teacher links.
//! - `school_schema()` matches the tables created by the bundled migrations.

use crate::error::MtomResult;
use crate::model::entity::{Entity, EntityId, FieldMap, FieldValue};
use crate::relation::endpoint::RelationEndpoint;
use crate::relation::junction::{Junction, JunctionRecord};
use crate::schema::{RelationOptions, Relations, Schema};
use crate::store::EntityStore;
use serde::{Deserialize, Serialize};

/// Extra column on `student_to_lesson`.
pub const NOTE_FIELD: &str = "note";

macro_rules! named_entity {
    ($name:ident, $type_name:literal, $table:literal) => {
        #[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
        pub struct $name {
            #[serde(default)]
            pub id: Option<EntityId>,
            #[serde(default)]
            pub name: Option<String>,
        }

        impl $name {
            pub fn new(name: impl Into<String>) -> Self {
                Self {
                    id: None,
                    name: Some(name.into()),
                }
            }

            /// Builds an unsaved entity that will be inserted under `id`.
            pub fn with_id(id: EntityId, name: impl Into<String>) -> Self {
                Self {
                    id: Some(id),
                    name: Some(name.into()),
                }
            }
        }

        impl Entity for $name {
            const TYPE_NAME: &'static str = $type_name;
            const TABLE: &'static str = $table;

            fn id(&self) -> Option<EntityId> {
                self.id
            }

            fn set_id(&mut self, id: EntityId) {
                self.id = Some(id);
            }
        }
    };
}

named_entity!(Student, "Student", "students");
named_entity!(Lesson, "Lesson", "lessons");
named_entity!(Teacher, "Teacher", "teachers");

/// Student enrolment in a lesson, with an optional free-form note.
#[derive(Debug, Clone, Copy)]
pub struct StudentToLesson;

impl Junction for StudentToLesson {
    type Left = Student;
    type Right = Lesson;

    const TYPE_NAME: &'static str = "StudentToLesson";
    const TABLE: &'static str = "student_to_lesson";
    const LEFT_FIELD: &'static str = "student_id";
    const RIGHT_FIELD: &'static str = "lesson_id";
    const EXTRA_FIELDS: &'static [&'static str] = &[NOTE_FIELD];
}

/// Teacher assignment to a lesson.
#[derive(Debug, Clone, Copy)]
pub struct TeacherToLesson;

impl Junction for TeacherToLesson {
    type Left = Teacher;
    type Right = Lesson;

    const TYPE_NAME: &'static str = "TeacherToLesson";
    const TABLE: &'static str = "teacher_to_lesson";
    const LEFT_FIELD: &'static str = "teacher_id";
    const RIGHT_FIELD: &'static str = "lesson_id";
}

impl RelationEndpoint for Student {
    fn register_relations(relations: &mut Relations<'_>) -> MtomResult<()> {
        relations.register::<StudentToLesson>(RelationOptions::default())?;
        Ok(())
    }
}

impl RelationEndpoint for Lesson {
    fn register_relations(relations: &mut Relations<'_>) -> MtomResult<()> {
        relations.register::<StudentToLesson>(RelationOptions::default())?;
        relations.register::<TeacherToLesson>(RelationOptions::default())?;
        Ok(())
    }
}

impl RelationEndpoint for Teacher {
    fn register_relations(relations: &mut Relations<'_>) -> MtomResult<()> {
        relations.register::<TeacherToLesson>(RelationOptions::default())?;
        Ok(())
    }
}

impl Student {
    pub fn add_lesson<S: EntityStore>(
        &self,
        store: &S,
        lesson: &Lesson,
    ) -> MtomResult<JunctionRecord<StudentToLesson>> {
        self.add_relation::<StudentToLesson, Lesson, S>(store, lesson, FieldMap::new())
    }

    /// Links the lesson and stores `note` on the junction row.
    pub fn add_lesson_with_note<S: EntityStore>(
        &self,
        store: &S,
        lesson: &Lesson,
        note: &str,
    ) -> MtomResult<JunctionRecord<StudentToLesson>> {
        let mut extra = FieldMap::new();
        extra.insert(NOTE_FIELD.to_string(), FieldValue::from(note));
        self.add_relation::<StudentToLesson, Lesson, S>(store, lesson, extra)
    }

    pub fn remove_lesson<S: EntityStore>(
        &self,
        store: &S,
        lesson: &Lesson,
    ) -> MtomResult<JunctionRecord<StudentToLesson>> {
        self.remove_relation::<StudentToLesson, Lesson, S>(store, lesson)
    }

    pub fn has_lesson<S: EntityStore>(&self, store: &S, lesson: &Lesson) -> MtomResult<bool> {
        self.has_relation::<StudentToLesson, Lesson, S>(store, lesson)
    }

    /// Enrolment rows of this student, oldest first.
    pub fn enrolments<S: EntityStore>(
        &self,
        store: &S,
    ) -> MtomResult<Vec<JunctionRecord<StudentToLesson>>> {
        self.related::<StudentToLesson, S>(store, None)
    }
}

impl Lesson {
    pub fn add_student<S: EntityStore>(
        &self,
        store: &S,
        student: &Student,
    ) -> MtomResult<JunctionRecord<StudentToLesson>> {
        self.add_relation::<StudentToLesson, Student, S>(store, student, FieldMap::new())
    }

    pub fn remove_student<S: EntityStore>(
        &self,
        store: &S,
        student: &Student,
    ) -> MtomResult<JunctionRecord<StudentToLesson>> {
        self.remove_relation::<StudentToLesson, Student, S>(store, student)
    }

    pub fn has_student<S: EntityStore>(&self, store: &S, student: &Student) -> MtomResult<bool> {
        self.has_relation::<StudentToLesson, Student, S>(store, student)
    }

    pub fn add_teacher<S: EntityStore>(
        &self,
        store: &S,
        teacher: &Teacher,
    ) -> MtomResult<JunctionRecord<TeacherToLesson>> {
        self.add_relation::<TeacherToLesson, Teacher, S>(store, teacher, FieldMap::new())
    }

    pub fn has_teacher<S: EntityStore>(&self, store: &S, teacher: &Teacher) -> MtomResult<bool> {
        self.has_relation::<TeacherToLesson, Teacher, S>(store, teacher)
    }
}

/// Schema covering every school entity and junction.
pub fn school_schema() -> MtomResult<Schema> {
    Schema::builder()
        .entity::<Student>()
        .entity::<Lesson>()
        .entity::<Teacher>()
        .junction::<StudentToLesson>()
        .junction::<TeacherToLesson>()
        .build()
}

#[cfg(test)]
mod tests {
    use super::{school_schema, Lesson, StudentToLesson, TeacherToLesson};
    use crate::relation::junction::JunctionRecord;
    use crate::schema::Side;

    #[test]
    fn schema_registers_both_lesson_relations() {
        let schema = school_schema().expect("school schema should build");
        let lesson = schema.entity("Lesson").expect("lesson registered");
        let names: Vec<&str> = lesson
            .relations
            .iter()
            .map(|relation| relation.name.as_str())
            .collect();
        assert_eq!(names, vec!["StudentToLesson", "TeacherToLesson"]);
        assert!(lesson.relations.iter().all(|relation| relation.cascade));
        assert!(lesson
            .relations
            .iter()
            .all(|relation| relation.their_field == "lesson_id"));
    }

    #[test]
    fn junction_specs_resolve_sides() {
        let spec = JunctionRecord::<StudentToLesson>::spec();
        assert_eq!(spec.side_of("Student").unwrap(), Side::Left);
        assert_eq!(spec.side_of("Lesson").unwrap(), Side::Right);
        assert_eq!(
            JunctionRecord::<TeacherToLesson>::other_entity_type("Teacher").unwrap(),
            "Lesson"
        );
        assert!(JunctionRecord::<TeacherToLesson>::field_name_for_entity_type("Student").is_err());
    }

    #[test]
    fn constructors_leave_entities_unloaded() {
        let lesson = Lesson::new("Geography");
        assert_eq!(lesson.id, None);
        assert_eq!(lesson.name.as_deref(), Some("Geography"));
        assert_eq!(Lesson::with_id(7, "Art").id, Some(7));
    }
}
