//! CLI smoke entry point.
//!
//! Runs the Harry/Geography walkthrough against an in-memory database, or
//! against the SQLite file given as the first argument, printing one line per
//! step. Set `MTOM_LOG_DIR` to an absolute directory to also write rolling
//! log files there.

use mtom_core::school::{school_schema, Lesson, Student, Teacher};
use mtom_core::{
    open_db, open_db_in_memory, Entity, EntityStore, MtomResult, SqliteEntityStore,
};
use std::process::ExitCode;

const LOG_DIR_ENV: &str = "MTOM_LOG_DIR";

fn main() -> ExitCode {
    if let Ok(log_dir) = std::env::var(LOG_DIR_ENV) {
        if let Err(err) = mtom_core::init_logging(mtom_core::default_log_level(), &log_dir) {
            eprintln!("mtom_cli logging disabled: {err}");
        }
    }

    let db_path = std::env::args().nth(1);
    match run(db_path.as_deref()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("mtom_cli error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(db_path: Option<&str>) -> MtomResult<()> {
    println!("mtom_core version={}", mtom_core::core_version());
    let conn = match db_path {
        Some(path) => open_db(path)?,
        None => open_db_in_memory()?,
    };
    let store = SqliteEntityStore::try_new(&conn, school_schema()?)?;

    let mut harry = Student::new("Harry");
    let mut geography = Lesson::new("Geography");
    let mut biology = Lesson::new("Biology");
    let mut linda = Teacher::new("Linda");
    store.save(&mut harry)?;
    store.save(&mut geography)?;
    store.save(&mut biology)?;
    store.save(&mut linda)?;
    println!(
        "saved student={:?} lessons={:?},{:?} teacher={:?}",
        harry.id, geography.id, biology.id, linda.id
    );

    let enrolment = harry.add_lesson(&store, &geography)?;
    println!(
        "add_lesson id={:?} student_id={:?} lesson_id={:?}",
        enrolment.id(),
        enrolment.left_id(),
        enrolment.right_id()
    );
    println!("has_lesson geography={}", harry.has_lesson(&store, &geography)?);

    let noted = harry.add_lesson_with_note(&store, &biology, "lab partner wanted")?;
    let extra = serde_json::to_string(noted.extra_fields())
        .unwrap_or_else(|err| format!("<unprintable: {err}>"));
    println!("add_lesson biology id={:?} extra={extra}", noted.id());
    biology.add_teacher(&store, &linda)?;
    println!("add_teacher biology teacher={:?}", linda.id);

    harry.remove_lesson(&store, &geography)?;
    println!("remove_lesson geography has_lesson={}", harry.has_lesson(&store, &geography)?);

    store.delete(&biology)?;
    println!(
        "delete biology enrolments_left={} teacher_linked={}",
        harry.enrolments(&store)?.len(),
        store.try_load::<Teacher>(linda.loaded_id()?)?.is_some()
    );

    store.delete(&harry)?;
    println!("delete harry ok");
    Ok(())
}
