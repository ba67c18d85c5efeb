use mtom_core::db::open_db_in_memory;
use mtom_core::school::{school_schema, Lesson, Student, StudentToLesson, Teacher, NOTE_FIELD};
use mtom_core::{
    Entity, EntityStore, FieldMap, JunctionRecord, MtomError, Side, SqliteEntityStore,
};
use rusqlite::Connection;
use serde_json::json;

type Enrolment = JunctionRecord<StudentToLesson>;

fn school_store(conn: &Connection) -> SqliteEntityStore<'_> {
    SqliteEntityStore::try_new(conn, school_schema().unwrap()).unwrap()
}

fn saved<E: Entity>(store: &SqliteEntityStore<'_>, mut entity: E) -> E {
    store.save(&mut entity).unwrap();
    entity
}

#[test]
fn field_lookup_by_entity_type() {
    assert_eq!(Enrolment::field_name_for_entity_type("Student").unwrap(), "student_id");
    assert_eq!(Enrolment::field_name_for_entity_type("Lesson").unwrap(), "lesson_id");
    assert_eq!(Enrolment::other_entity_type("Student").unwrap(), "Lesson");
    assert_eq!(Enrolment::other_entity_type("Lesson").unwrap(), "Student");

    let err = Enrolment::field_name_for_entity_type("Teacher").unwrap_err();
    assert!(matches!(
        err,
        MtomError::NotARelationParticipant { junction: "StudentToLesson", ref entity } if entity == "Teacher"
    ));
    assert!(Enrolment::other_entity_type("Teacher").is_err());
}

#[test]
fn save_requires_both_foreign_keys() {
    let conn = open_db_in_memory().unwrap();
    let store = school_store(&conn);
    let harry = saved(&store, Student::new("Harry"));

    let mut record = Enrolment::new();
    record.set_foreign_key_for(&harry).unwrap();
    let err = record.save(&store).unwrap_err();
    assert!(matches!(
        err,
        MtomError::MissingRequiredField { ref field, .. } if field == "lesson_id"
    ));
    assert!(!record.is_loaded());
}

#[test]
fn save_inserts_then_updates_same_row() {
    let conn = open_db_in_memory().unwrap();
    let store = school_store(&conn);
    let harry = saved(&store, Student::new("Harry"));
    let geography = saved(&store, Lesson::new("Geography"));

    let mut record = Enrolment::new();
    record.set_foreign_key_for(&harry).unwrap();
    record.set_foreign_key_for(&geography).unwrap();
    record.save(&store).unwrap();
    let id = record.id().unwrap();

    record.set(NOTE_FIELD, "front row").unwrap();
    record.save(&store).unwrap();
    assert_eq!(record.id(), Some(id));

    let rows = Enrolment::query().load_all(&store).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id(), Some(id));
    assert_eq!(rows[0].get(NOTE_FIELD), Some(json!("front row")));
    assert_eq!(rows[0].get("student_id"), Some(json!(harry.id.unwrap())));
}

#[test]
fn saving_second_row_for_same_pair_is_duplicate() {
    let conn = open_db_in_memory().unwrap();
    let store = school_store(&conn);
    let harry = saved(&store, Student::new("Harry"));
    let geography = saved(&store, Lesson::new("Geography"));

    let mut first = Enrolment::new();
    first.set_foreign_key_for(&harry).unwrap();
    first.set_foreign_key_for(&geography).unwrap();
    first.save(&store).unwrap();

    let mut second = Enrolment::new();
    second.set_foreign_key_for(&geography).unwrap();
    second.set_foreign_key_for(&harry).unwrap();
    let err = second.save(&store).unwrap_err();
    match err {
        MtomError::DuplicateRelation {
            junction,
            left_id,
            right_id,
        } => {
            assert_eq!(junction, "StudentToLesson");
            assert_eq!(left_id, harry.id);
            assert_eq!(right_id, geography.id);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn set_validates_field_names_and_key_values() {
    let mut record = Enrolment::new();

    let err = record.set("grade", 1).unwrap_err();
    assert!(matches!(err, MtomError::UnknownField { ref field, .. } if field == "grade"));

    let err = record.set("student_id", "seven").unwrap_err();
    assert!(matches!(err, MtomError::InvalidData(_)));

    record.set("lesson_id", 12).unwrap();
    assert_eq!(record.foreign_key(Side::Right), Some(12));
    assert_eq!(record.get("student_id"), None);
    assert_eq!(record.get(NOTE_FIELD), None);
}

#[test]
fn query_conditions_are_checked() {
    let conn = open_db_in_memory().unwrap();
    let store = school_store(&conn);
    let linda = saved(&store, Teacher::new("Linda"));

    let mut query = Enrolment::query();
    assert!(matches!(
        query.add_condition("grade", 3).err().unwrap(),
        MtomError::UnknownField { .. }
    ));
    assert!(matches!(
        query.add_condition_for_entity(&linda).err().unwrap(),
        MtomError::NotARelationParticipant { .. }
    ));
    assert!(matches!(
        query.add_condition_for_entity(&Student::new("Draco")).err().unwrap(),
        MtomError::EntityNotLoaded { entity: "Student" }
    ));
    assert!(query.as_query().conditions.is_empty());
}

#[test]
fn load_first_reports_conditions_when_nothing_matches() {
    let conn = open_db_in_memory().unwrap();
    let store = school_store(&conn);
    let harry = saved(&store, Student::with_id(5, "Harry"));

    let mut query = Enrolment::query();
    query.add_condition_for_entity(&harry).unwrap();
    assert!(query.try_load_first(&store).unwrap().is_none());

    let err = query.load_first(&store).unwrap_err();
    match err {
        MtomError::RelationNotFound {
            junction,
            conditions,
        } => {
            assert_eq!(junction, "StudentToLesson");
            assert_eq!(conditions, "student_id=5");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn resolved_entities_load_once_and_reset_on_key_change() {
    let conn = open_db_in_memory().unwrap();
    let store = school_store(&conn);
    let harry = saved(&store, Student::new("Harry"));
    let hermione = saved(&store, Student::new("Hermione"));
    let geography = saved(&store, Lesson::new("Geography"));
    harry
        .add_lesson(&store, &geography)
        .unwrap();

    let mut record = Enrolment::query().load_first(&store).unwrap();
    assert!(record.cached::<Student>().is_none());

    assert_eq!(record.left(&store).unwrap(), &harry);
    assert_eq!(record.right(&store).unwrap(), &geography);
    assert_eq!(record.cached::<Student>(), Some(&harry));

    record.set_foreign_key_for(&harry).unwrap();
    assert!(record.cached::<Student>().is_some());

    record.set_foreign_key_for(&hermione).unwrap();
    assert!(record.cached::<Student>().is_none());
    assert_eq!(record.resolved_entity::<Student, _>(&store).unwrap(), &hermione);
    assert_eq!(record.cached::<Lesson>(), Some(&geography));
}

#[test]
fn resolving_requires_participant_key_and_existing_row() {
    let conn = open_db_in_memory().unwrap();
    let store = school_store(&conn);

    let mut record = Enrolment::new();
    assert!(matches!(
        record.resolved_entity::<Teacher, _>(&store).unwrap_err(),
        MtomError::NotARelationParticipant { .. }
    ));
    assert!(matches!(
        record.left(&store).unwrap_err(),
        MtomError::MissingRequiredField { ref field, .. } if field == "student_id"
    ));

    record.set_foreign_key(Side::Left, 999);
    assert!(matches!(
        record.left(&store).unwrap_err(),
        MtomError::EntityNotFound { entity: "Student", id: 999 }
    ));
}

#[test]
fn cache_accepts_only_participants() {
    let mut record = Enrolment::new();
    record
        .cache_resolved_entity(Lesson::with_id(3, "Biology"))
        .unwrap();
    assert_eq!(record.cached::<Lesson>().and_then(|lesson| lesson.id), Some(3));

    let err = record
        .cache_resolved_entity(Teacher::with_id(1, "Linda"))
        .unwrap_err();
    assert!(matches!(err, MtomError::NotARelationParticipant { .. }));
}

#[test]
fn delete_removes_row_and_requires_id() {
    let conn = open_db_in_memory().unwrap();
    let store = school_store(&conn);
    let harry = saved(&store, Student::new("Harry"));
    let geography = saved(&store, Lesson::new("Geography"));

    assert!(matches!(
        Enrolment::new().delete(&store).unwrap_err(),
        MtomError::EntityNotLoaded { .. }
    ));

    let record = harry
        .add_lesson_with_note(&store, &geography, "late joiner")
        .unwrap();
    record.delete(&store).unwrap();
    assert!(Enrolment::query().load_all(&store).unwrap().is_empty());
    assert!(matches!(
        record.delete(&store).unwrap_err(),
        MtomError::RelationNotFound { .. }
    ));
}

#[test]
fn upsert_and_remove_work_without_store_transactions() {
    let conn = open_db_in_memory().unwrap();
    let store = school_store(&conn).with_transactions(false);
    let harry = saved(&store, Student::new("Harry"));
    let geography = saved(&store, Lesson::new("Geography"));

    let linked = Enrolment::upsert_link(&store, &harry, &geography, FieldMap::new()).unwrap();
    assert!(linked.is_loaded());
    assert!(Enrolment::link_exists(&store, &geography, &harry).unwrap());

    let removed = Enrolment::remove_link(&store, &geography, &harry).unwrap();
    assert_eq!(removed.id(), linked.id());
    assert!(!Enrolment::link_exists(&store, &harry, &geography).unwrap());
}

#[test]
fn link_protocols_reject_same_typed_pair() {
    let conn = open_db_in_memory().unwrap();
    let store = school_store(&conn);
    let harry = saved(&store, Student::new("Harry"));
    let ron = saved(&store, Student::new("Ron"));

    let err = Enrolment::upsert_link(&store, &harry, &ron, FieldMap::new()).unwrap_err();
    assert!(matches!(
        err,
        MtomError::WrongEntityType {
            expected: "Lesson",
            actual: "Student"
        }
    ));
    assert!(Enrolment::query().load_all(&store).unwrap().is_empty());
}

#[test]
fn entities_keep_explicit_ids() {
    let conn = open_db_in_memory().unwrap();
    let store = school_store(&conn);

    let mut ron = Student::with_id(40, "Ron");
    store.save(&mut ron).unwrap();
    assert_eq!(ron.id, Some(40));
    assert_eq!(store.load::<Student>(40).unwrap().name.as_deref(), Some("Ron"));

    ron.name = Some("Ronald".to_string());
    store.save(&mut ron).unwrap();
    assert_eq!(store.load::<Student>(40).unwrap().name.as_deref(), Some("Ronald"));
    assert!(matches!(
        store.load::<Student>(41).unwrap_err(),
        MtomError::EntityNotFound { entity: "Student", id: 41 }
    ));
}
